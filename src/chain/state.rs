//! Chain state overlay

use crate::command::Switch;
use std::time::Instant;

/// Logical state of a chain.
///
/// Only `Created` and `Destroyed` are enforced; `Running` and `Stopped`
/// describe whether the export callback is expected to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Chain exists in the runtime, no export command sent yet
    Created,

    /// Export was switched on
    Running {
        /// When the export was switched on
        started_at: Instant,
    },

    /// Export was switched off (or never switched on)
    Stopped,

    /// Runtime resources released, no further commands accepted
    Destroyed,
}

impl ChainState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &ChainState) -> bool {
        use ChainState::*;

        match (self, target) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (_, Created) => matches!(self, Created),
            // Repeated or out-of-order switches are left to the runtime
            (Created | Running { .. } | Stopped, Running { .. } | Stopped) => true,
        }
    }

    /// State reached after a successful export switch
    pub fn after(self, switch: Switch) -> ChainState {
        match (self, switch) {
            (ChainState::Destroyed, _) => ChainState::Destroyed,
            (running @ ChainState::Running { .. }, Switch::On) => running,
            (_, Switch::On) => ChainState::Running {
                started_at: Instant::now(),
            },
            (_, Switch::Off) => ChainState::Stopped,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            ChainState::Created => "Created",
            ChainState::Running { .. } => "Running",
            ChainState::Stopped => "Stopped",
            ChainState::Destroyed => "Destroyed",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ChainState::Running { .. })
    }

    /// Get the duration since export was switched on (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let ChainState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
