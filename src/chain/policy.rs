//! What to do with errors the runtime reports asynchronously

use crate::error::BrokerError;
use crate::runtime::ErrorHook;
use crate::utils::sos::SignalOfStop;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reaction to `(stage, code)` notifications from a chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Count only
    Ignore,
    /// Count and log, keep running
    #[default]
    Log,
    /// Count, log and request the display loop to stop
    Escalate,
}

/// Number of notifications received, shared with the hook.
#[derive(Debug, Clone, Default)]
pub struct NotificationCounter(Arc<AtomicU64>);

impl NotificationCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

impl ErrorPolicy {
    /// Build the hook handed to every chain.
    ///
    /// The hook may run on the producer thread; it only touches atomics and
    /// the stop signal.
    pub fn hook(self, counter: NotificationCounter, stop: SignalOfStop) -> ErrorHook {
        Arc::new(move |stage: &str, code: i32| {
            counter.bump();
            if self == ErrorPolicy::Ignore {
                return;
            }

            let error = BrokerError::RuntimeNotification {
                stage: stage.to_string(),
                code,
            };
            match self {
                ErrorPolicy::Escalate => {
                    log::error!("{error}, stopping");
                    stop.cancel();
                }
                _ => log::warn!("{error}"),
            }
        })
    }
}
