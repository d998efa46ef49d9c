//! Capability interface of the pipeline runtime
//!
//! The runtime that builds chains and produces frames is an external
//! collaborator. The broker only talks to it through these traits, so any
//! native SDK binding, or the built-in [`SyntheticRuntime`], can drive it.

pub mod synthetic;

pub use synthetic::SyntheticRuntime;

use crate::frame::FrameMetadata;
use std::sync::Arc;

/// Receives `(stage_id, error_code)` notifications, possibly from the
/// producer thread.
pub type ErrorHook = Arc<dyn Fn(&str, i32) + Send + Sync>;

/// Receives raw BGRA pixels that are only valid for the duration of the call.
pub type ExportCallback = Box<dyn Fn(&[u8], FrameMetadata) + Send + Sync>;

/// Process-wide runtime owning every chain it creates
pub trait PipelineRuntime {
    /// Initialize with the global (`IFF`) configuration, as JSON text
    fn initialize(&self, config: &str) -> anyhow::Result<()>;

    /// Build a chain from its JSON configuration document
    fn create_chain(&self, config: &str, on_error: ErrorHook)
    -> anyhow::Result<Box<dyn ChainBackend>>;

    /// Release the runtime. Every chain must have been dropped before.
    fn finalize(&self);
}

/// Runtime side of one chain. Dropping it releases the chain's resources.
pub trait ChainBackend: Send {
    /// Install the producer callback on the named export stage
    fn set_export_callback(&mut self, stage: &str, callback: ExportCallback)
    -> anyhow::Result<()>;

    /// Execute a JSON command such as `{"exporter": {"command": "on"}}`
    fn execute(&mut self, command: &str) -> anyhow::Result<()>;
}
