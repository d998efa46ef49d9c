use crate::command::DEFAULT_EXPORT_STAGE;
use crate::error::BrokerError;
use serde_json::Value;
use std::path::Path;

/// Configuration file looked up when none is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "imagebroker.json";

/// Validated configuration document.
///
/// `IFF` is forwarded to the runtime untouched; `chains` holds one opaque
/// document per chain, in order.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    runtime: Value,
    chains: Vec<Value>,
    exporter: Option<String>,
}

impl BrokerConfig {
    pub fn load(path: &Path) -> Result<Self, BrokerError> {
        let text = std::fs::read_to_string(path).map_err(|source| BrokerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, BrokerError> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| BrokerError::Configuration(format!("not valid JSON: {e}")))?;
        Self::from_value(document)
    }

    pub fn from_value(document: Value) -> Result<Self, BrokerError> {
        let invalid = |msg: &str| BrokerError::Configuration(msg.to_string());

        let Value::Object(mut root) = document else {
            return Err(invalid("top level must be an object"));
        };
        let runtime = root
            .remove("IFF")
            .ok_or_else(|| invalid("missing `IFF` section"))?;
        let chains = root
            .remove("chains")
            .ok_or_else(|| invalid("missing `chains` section"))?;
        let Value::Array(chains) = chains else {
            return Err(invalid("section `chains` must be an array"));
        };
        if chains.is_empty() {
            return Err(invalid("section `chains` must not be empty"));
        }
        let exporter = match root.remove("exporter") {
            None => None,
            Some(Value::String(name)) if !name.is_empty() => Some(name),
            Some(_) => return Err(invalid("`exporter` must be a non-empty string")),
        };

        Ok(Self {
            runtime,
            chains,
            exporter,
        })
    }

    /// `IFF` section as JSON text
    pub fn runtime_config(&self) -> String {
        self.runtime.to_string()
    }

    pub fn chains(&self) -> &[Value] {
        &self.chains
    }

    /// Name of the export stage switched on chain 0
    pub fn exporter(&self) -> &str {
        self.exporter.as_deref().unwrap_or(DEFAULT_EXPORT_STAGE)
    }

    pub fn set_exporter(&mut self, exporter: impl Into<String>) {
        self.exporter = Some(exporter.into());
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
