//! Error taxonomy for the broker

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid configuration provided: {0}")]
    Configuration(String),
    #[error("failed to read configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pipeline runtime initialization failed: {0}")]
    RuntimeInit(String),
    #[error("failed to create chain #{index}: {reason}")]
    ChainCreation { index: usize, reason: String },
    #[error("chain #{chain}: command `{command}` failed: {reason}")]
    CommandExecution {
        chain: usize,
        command: String,
        reason: String,
    },
    #[error("stage `{stage}` reported error code {code}")]
    RuntimeNotification { stage: String, code: i32 },
    #[error("presentation failed: {0}")]
    Presentation(String),
}

impl BrokerError {
    /// Whether the error aborts startup rather than being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BrokerError::RuntimeNotification { .. } | BrokerError::Presentation(_)
        )
    }
}
