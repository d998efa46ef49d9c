//! Chain handles and the registry owning them
//!
//! A [`Chain`] wraps the runtime side of one configured pipeline. The
//! [`ChainRegistry`] owns every chain in configuration order and releases
//! them, newest first, before the runtime is finalized.

pub mod policy;
pub mod state;

pub use policy::{ErrorPolicy, NotificationCounter};
pub use state::ChainState;

use crate::command::Switch;
use crate::error::BrokerError;
use crate::runtime::{ChainBackend, ErrorHook, ExportCallback, PipelineRuntime};
use serde_json::Value;

/// One pipeline instance created from a configuration entry
pub struct Chain {
    index: usize,
    config: String,
    state: ChainState,
    backend: Option<Box<dyn ChainBackend>>,
}

impl Chain {
    /// Create the chain at position `index` of the configuration
    pub fn create(
        runtime: &dyn PipelineRuntime,
        index: usize,
        config: &Value,
        on_error: ErrorHook,
    ) -> Result<Self, BrokerError> {
        let config = config.to_string();
        let backend = runtime
            .create_chain(&config, on_error)
            .map_err(|e| BrokerError::ChainCreation {
                index,
                reason: format!("{e:#}"),
            })?;

        log::debug!("Chain #{index} created");
        Ok(Self {
            index,
            config,
            state: ChainState::Created,
            backend: Some(backend),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Configuration document the chain was created from, as JSON text
    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    fn backend(&mut self, command: &str) -> Result<&mut Box<dyn ChainBackend>, BrokerError> {
        let index = self.index;
        self.backend
            .as_mut()
            .ok_or_else(|| BrokerError::CommandExecution {
                chain: index,
                command: command.to_string(),
                reason: "chain already destroyed".into(),
            })
    }

    /// Install the producer callback on the export stage `stage`
    pub fn set_export_callback(
        &mut self,
        stage: &str,
        callback: ExportCallback,
    ) -> Result<(), BrokerError> {
        let index = self.index;
        let describe = || format!("set export callback on `{stage}`");
        self.backend(&describe())?
            .set_export_callback(stage, callback)
            .map_err(|e| BrokerError::CommandExecution {
                chain: index,
                command: describe(),
                reason: format!("{e:#}"),
            })
    }

    /// Send a JSON command to the chain
    pub fn execute(&mut self, command: &str) -> Result<(), BrokerError> {
        let index = self.index;
        self.backend(command)?
            .execute(command)
            .map_err(|e| BrokerError::CommandExecution {
                chain: index,
                command: command.to_string(),
                reason: format!("{e:#}"),
            })
    }

    /// Track a successfully executed export switch
    pub(crate) fn record_switch(&mut self, switch: Switch) {
        let next = self.state.after(switch);
        if !self.state.can_transition_to(&next) {
            return;
        }
        if let (Some(ran), ChainState::Stopped) = (self.state.running_duration(), next) {
            log::info!("Chain #{}: export ran for {:.1}s", self.index, ran.as_secs_f64());
        }
        self.state = next;
    }

    /// Release the chain's runtime resources. Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if let Some(backend) = self.backend.take() {
            drop(backend);
            self.state = ChainState::Destroyed;
            log::debug!("Chain #{} destroyed", self.index);
        }
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("index", &self.index)
            .field("state", &self.state)
            .finish()
    }
}

/// Owns every chain built from the `chains` configuration section
#[derive(Debug)]
pub struct ChainRegistry {
    chains: Vec<Chain>,
}

impl ChainRegistry {
    /// Create one chain per configuration entry, in order.
    ///
    /// If any chain is rejected, the ones already created are destroyed
    /// before the error is returned.
    pub fn build(
        runtime: &dyn PipelineRuntime,
        configs: &[Value],
        on_error: ErrorHook,
    ) -> Result<Self, BrokerError> {
        if configs.is_empty() {
            return Err(BrokerError::Configuration(
                "section `chains` must not be empty".into(),
            ));
        }

        let mut registry = ChainRegistry {
            chains: Vec::with_capacity(configs.len()),
        };
        for (index, config) in configs.iter().enumerate() {
            let chain = Chain::create(runtime, index, config, on_error.clone())?;
            registry.chains.push(chain);
        }

        log::info!("Created {} chain(s)", registry.len());
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Chain> {
        self.chains.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Chain> {
        self.chains.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chain> {
        self.chains.iter()
    }

    /// Release every chain, newest first. Safe to call more than once.
    pub fn destroy_all(&mut self) {
        if self.chains.is_empty() {
            return;
        }
        let count = self.chains.len();
        while let Some(mut chain) = self.chains.pop() {
            chain.destroy();
        }
        log::info!("Destroyed {count} chain(s)");
    }
}

impl Drop for ChainRegistry {
    fn drop(&mut self) {
        self.destroy_all();
    }
}
