//! Lifecycle of one broker run
//!
//! ```text
//! initialize → chains → callback → "on" → display loop → "off"
//!            → close surface → destroy chains → finalize
//! ```
//!
//! Any failure up to "on" aborts the run. Everything after the display loop
//! is best effort, and the runtime is finalized on every exit path once it
//! was initialized, always after the chains are gone.

use crate::chain::{ChainRegistry, ErrorPolicy, NotificationCounter};
use crate::command::{CommandDispatcher, Switch};
use crate::config::BrokerConfig;
use crate::display::{DisplayLoop, DisplayOptions, DisplaySummary, OutputSurface};
use crate::error::BrokerError;
use crate::frame::{FrameBuffer, FrameMetadata};
use crate::runtime::{ErrorHook, PipelineRuntime};
use crate::utils::sos::SignalOfStop;
use std::sync::Arc;

/// Chain whose export stage is switched and displayed
const PRIMARY_CHAIN: usize = 0;

/// Finalizes the runtime when dropped
struct RuntimeSession<'r> {
    runtime: &'r dyn PipelineRuntime,
}

impl<'r> RuntimeSession<'r> {
    fn start(runtime: &'r dyn PipelineRuntime, config: &str) -> Result<Self, BrokerError> {
        runtime
            .initialize(config)
            .map_err(|e| BrokerError::RuntimeInit(format!("{e:#}")))?;
        log::info!("Pipeline runtime initialized");
        Ok(Self { runtime })
    }
}

impl Drop for RuntimeSession<'_> {
    fn drop(&mut self) {
        self.runtime.finalize();
        log::info!("Pipeline runtime finalized");
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub display: DisplaySummary,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub runtime_notifications: u64,
}

pub struct ImageBroker<'r> {
    runtime: &'r dyn PipelineRuntime,
    config: BrokerConfig,
    options: DisplayOptions,
    policy: ErrorPolicy,
    hook: Option<ErrorHook>,
    stop: SignalOfStop,
}

impl<'r> ImageBroker<'r> {
    pub fn new(runtime: &'r dyn PipelineRuntime, config: BrokerConfig, stop: SignalOfStop) -> Self {
        Self {
            runtime,
            config,
            options: DisplayOptions::default(),
            policy: ErrorPolicy::default(),
            hook: None,
            stop,
        }
    }

    pub fn with_display_options(mut self, options: DisplayOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the policy hook with a custom one
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Run the whole lifecycle on `surface`, returning once cancelled.
    pub fn run(&self, surface: &mut dyn OutputSurface) -> Result<RunSummary, BrokerError> {
        let counter = NotificationCounter::default();
        let hook = match &self.hook {
            Some(hook) => {
                let hook = hook.clone();
                let counter = counter.clone();
                let counted: ErrorHook = Arc::new(move |stage: &str, code: i32| {
                    counter.bump();
                    hook(stage, code)
                });
                counted
            }
            None => self.policy.hook(counter.clone(), self.stop.clone()),
        };

        // Declared before the registry so it is dropped after it
        let session = RuntimeSession::start(self.runtime, &self.config.runtime_config())?;
        let mut registry = ChainRegistry::build(self.runtime, self.config.chains(), hook)?;

        let buffer = Arc::new(FrameBuffer::new());
        let dispatcher = CommandDispatcher::new(self.config.exporter());
        {
            let chain = registry
                .get_mut(PRIMARY_CHAIN)
                .ok_or_else(|| BrokerError::Configuration("no chain to display".into()))?;

            let producer = Arc::clone(&buffer);
            chain.set_export_callback(
                dispatcher.stage(),
                Box::new(move |raw: &[u8], meta: FrameMetadata| {
                    if let Err(e) = producer.replace_from_raw(raw, meta) {
                        log::warn!("Discarding delivered frame: {e}");
                    }
                }),
            )?;
            dispatcher.send(chain, Switch::On)?;
        }

        let display =
            DisplayLoop::new(buffer.clone(), self.options.clone(), self.stop.clone()).run(surface);

        if let Some(chain) = registry.get_mut(PRIMARY_CHAIN) {
            if let Err(e) = dispatcher.send(chain, Switch::Off) {
                log::error!("{e}");
            }
        }
        surface.close();
        registry.destroy_all();
        drop(session);

        let stats = buffer.stats();
        Ok(RunSummary {
            display,
            frames_delivered: stats.delivered(),
            frames_dropped: stats.dropped(),
            runtime_notifications: counter.get(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, EventLog, FakeRuntime, FakeSurface};
    use serde_json::json;
    use std::sync::Mutex;

    const ON: &str = r#"{"exporter":{"command":"on"}}"#;
    const OFF: &str = r#"{"exporter":{"command":"off"}}"#;

    fn config(chains: usize) -> BrokerConfig {
        BrokerConfig::from_value(json!({
            "IFF": {"log_level": "info"},
            "chains": vec![json!({}); chains],
        }))
        .unwrap()
    }

    fn position(log: &EventLog, event: Event) -> usize {
        log.position(|e| *e == event)
            .unwrap_or_else(|| panic!("{event:?} not recorded"))
    }

    #[test]
    fn test_full_sequence() {
        let log = EventLog::new();
        let runtime = FakeRuntime::new(log.clone()).with_frames(vec![(1920, 1080, 1), (1920, 1080, 2)]);
        let mut surface = FakeSurface::new(log.clone(), 2);

        let summary = ImageBroker::new(&runtime, config(2), SignalOfStop::new())
            .run(&mut surface)
            .unwrap();

        assert_eq!(
            log.events(),
            vec![
                Event::Initialize(r#"{"log_level":"info"}"#.into()),
                Event::CreateChain(0),
                Event::CreateChain(1),
                Event::SetCallback(0, "exporter".into()),
                Event::Execute(0, ON.into()),
                Event::Resize(1280, 720),
                Event::Present(1920, 1080),
                Event::Present(1920, 1080),
                Event::Execute(0, OFF.into()),
                Event::Close,
                Event::DestroyChain(1),
                Event::DestroyChain(0),
                Event::Finalize,
            ]
        );
        assert_eq!(summary.frames_delivered, 2);
        assert_eq!(summary.frames_dropped, 1);
        assert_eq!(summary.display.presented, 2);
        // Latest frame wins
        assert_eq!(surface.presented, vec![(1920, 1080, 2), (1920, 1080, 2)]);
    }

    #[test]
    fn test_command_bracket_on_cancellation() {
        let log = EventLog::new();
        let runtime = FakeRuntime::new(log.clone());
        let stop = SignalOfStop::new();
        stop.cancel();
        let mut surface = FakeSurface::new(log.clone(), 100);

        ImageBroker::new(&runtime, config(3), stop)
            .run(&mut surface)
            .unwrap();

        assert_eq!(log.count(|e| *e == Event::Execute(0, ON.into())), 1);
        assert_eq!(log.count(|e| *e == Event::Execute(0, OFF.into())), 1);
        // Other chains are never commanded
        assert_eq!(log.count(|e| matches!(e, Event::Execute(i, _) if *i != 0)), 0);
        assert!(position(&log, Event::Execute(0, ON.into())) < position(&log, Event::Execute(0, OFF.into())));
        assert_eq!(surface.polls, 1);
    }

    #[test]
    fn test_init_failure_creates_nothing() {
        let log = EventLog::new();
        let runtime = FakeRuntime::new(log.clone()).fail_init();
        let mut surface = FakeSurface::new(log.clone(), 1);

        let err = ImageBroker::new(&runtime, config(1), SignalOfStop::new())
            .run(&mut surface)
            .unwrap_err();

        assert!(matches!(err, BrokerError::RuntimeInit(_)));
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_chain_failure_still_finalizes_after_teardown() {
        let log = EventLog::new();
        let runtime = FakeRuntime::new(log.clone()).reject_chain(2);
        let mut surface = FakeSurface::new(log.clone(), 1);

        let err = ImageBroker::new(&runtime, config(3), SignalOfStop::new())
            .run(&mut surface)
            .unwrap_err();

        assert!(matches!(err, BrokerError::ChainCreation { index: 2, .. }));
        let finalize = position(&log, Event::Finalize);
        assert!(position(&log, Event::DestroyChain(0)) < finalize);
        assert!(position(&log, Event::DestroyChain(1)) < finalize);
        assert_eq!(finalize, log.events().len() - 1);
        assert_eq!(surface.polls, 0);
    }

    #[test]
    fn test_start_command_failure_is_fatal() {
        let log = EventLog::new();
        let runtime = FakeRuntime::new(log.clone()).fail_command("on");
        let mut surface = FakeSurface::new(log.clone(), 1);

        let err = ImageBroker::new(&runtime, config(1), SignalOfStop::new())
            .run(&mut surface)
            .unwrap_err();

        assert!(matches!(err, BrokerError::CommandExecution { chain: 0, .. }));
        assert_eq!(surface.polls, 0);
        assert!(position(&log, Event::DestroyChain(0)) < position(&log, Event::Finalize));
    }

    #[test]
    fn test_stop_command_failure_does_not_block_teardown() {
        let log = EventLog::new();
        let runtime = FakeRuntime::new(log.clone()).fail_command("off");
        let mut surface = FakeSurface::new(log.clone(), 1);

        ImageBroker::new(&runtime, config(1), SignalOfStop::new())
            .run(&mut surface)
            .unwrap();

        let events = log.events();
        assert_eq!(
            events[events.len() - 4..],
            [
                Event::Execute(0, OFF.into()),
                Event::Close,
                Event::DestroyChain(0),
                Event::Finalize,
            ]
        );
    }

    #[test]
    fn test_custom_export_stage() {
        let log = EventLog::new();
        let runtime = FakeRuntime::new(log.clone());
        let mut config = config(1);
        config.set_exporter("sink");

        ImageBroker::new(&runtime, config, SignalOfStop::new())
            .run(&mut FakeSurface::new(log.clone(), 1))
            .unwrap();

        assert_eq!(position(&log, Event::SetCallback(0, "sink".into())), 2);
        assert_eq!(log.count(|e| *e == Event::Execute(0, r#"{"sink":{"command":"on"}}"#.into())), 1);
    }

    #[test]
    fn test_injected_error_hook() {
        let log = EventLog::new();
        let runtime = FakeRuntime::new(log.clone()).notify_on_start("cam", 7);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let summary = ImageBroker::new(&runtime, config(1), SignalOfStop::new())
            .with_error_hook(Arc::new(move |stage: &str, code: i32| {
                sink.lock().unwrap().push((stage.to_string(), code));
            }))
            .run(&mut FakeSurface::new(log.clone(), 2))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![("cam".to_string(), 7)]);
        assert_eq!(summary.runtime_notifications, 1);
        assert_eq!(summary.display.iterations, 2);
    }

    #[test]
    fn test_escalating_policy_stops_display() {
        let log = EventLog::new();
        let runtime = FakeRuntime::new(log.clone()).notify_on_start("cam", 3);
        let mut surface = FakeSurface::new(log.clone(), 1000);

        let summary = ImageBroker::new(&runtime, config(1), SignalOfStop::new())
            .with_error_policy(ErrorPolicy::Escalate)
            .run(&mut surface)
            .unwrap();

        assert_eq!(summary.display.iterations, 1);
        assert_eq!(log.count(|e| *e == Event::Execute(0, OFF.into())), 1);
    }

    #[test]
    fn test_synthetic_runtime_end_to_end() {
        use crate::runtime::SyntheticRuntime;

        let runtime = SyntheticRuntime::new();
        let config = BrokerConfig::from_value(json!({
            "IFF": {},
            "chains": [{
                "elements": [
                    {"id": "cam", "type": "generator", "width": 64, "height": 32, "fps": 200},
                    {"id": "exporter", "type": "frame_exporter"}
                ]
            }]
        }))
        .unwrap();

        // Cancel once something was presented
        struct UntilPresented {
            inner: FakeSurface,
            deadline: std::time::Instant,
        }
        impl OutputSurface for UntilPresented {
            fn create_or_resize(&mut self, w: u32, h: u32) -> Result<(), BrokerError> {
                self.inner.create_or_resize(w, h)
            }
            fn present(&mut self, frame: &crate::frame::Frame) -> Result<(), BrokerError> {
                self.inner.present(frame)
            }
            fn poll_cancel(&mut self, timeout: std::time::Duration) -> bool {
                std::thread::sleep(timeout);
                !self.inner.presented.is_empty() || std::time::Instant::now() > self.deadline
            }
        }

        let log = EventLog::new();
        let mut surface = UntilPresented {
            inner: FakeSurface::new(log.clone(), usize::MAX),
            deadline: std::time::Instant::now() + std::time::Duration::from_secs(5),
        };
        let summary = ImageBroker::new(&runtime, config, SignalOfStop::new())
            .run(&mut surface)
            .unwrap();

        assert!(summary.display.presented >= 1);
        assert_eq!(summary.display.output_size, Some((64, 32)));
        assert_eq!(runtime.live_chains(), 0);
        assert_eq!(log.events()[0], Event::Resize(64, 32));
    }
}
