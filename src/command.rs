//! Export start/stop commands
//!
//! Commands are JSON documents addressed to a stage by name:
//! `{"exporter": {"command": "on"}}`.

use crate::chain::Chain;
use crate::error::BrokerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Export stage switched by default
pub const DEFAULT_EXPORT_STAGE: &str = "exporter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    On,
    Off,
}

impl std::fmt::Display for Switch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Switch::On => write!(f, "on"),
            Switch::Off => write!(f, "off"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StageCommand {
    command: Switch,
}

/// Serialize a switch command for `stage`
pub fn build_command(stage: &str, switch: Switch) -> Result<String, serde_json::Error> {
    let document = BTreeMap::from([(stage, StageCommand { command: switch })]);
    serde_json::to_string(&document)
}

/// Sends export switches to one named stage. No retries.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    stage: String,
}

impl CommandDispatcher {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Switch the export stage of `chain` on or off
    pub fn send(&self, chain: &mut Chain, switch: Switch) -> Result<(), BrokerError> {
        let command =
            build_command(&self.stage, switch).map_err(|e| BrokerError::CommandExecution {
                chain: chain.index(),
                command: format!("{} {switch}", self.stage),
                reason: e.to_string(),
            })?;

        chain.execute(&command)?;
        chain.record_switch(switch);
        log::info!(
            "Chain #{}: `{}` switched {switch}",
            chain.index(),
            self.stage
        );
        Ok(())
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EXPORT_STAGE)
    }
}
