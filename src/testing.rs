//! Recording fakes of the runtime and output surface used by unit tests

use crate::error::BrokerError;
use crate::frame::{Frame, FrameMetadata};
use crate::runtime::{ChainBackend, ErrorHook, ExportCallback, PipelineRuntime};
use anyhow::{Result, anyhow, bail};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialize(String),
    CreateChain(usize),
    SetCallback(usize, String),
    Execute(usize, String),
    DestroyChain(usize),
    Finalize,
    Resize(u32, u32),
    Present(u32, u32),
    Close,
}

/// Ordered record of every call made on the fakes
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| predicate(e))
    }
}

/// Runtime that delivers `frames` synchronously when an export is switched on
pub struct FakeRuntime {
    log: EventLog,
    fail_init: bool,
    reject_chain: Option<usize>,
    fail_command: Option<&'static str>,
    frames: Vec<(u32, u32, u8)>,
    notify_on_start: Option<(&'static str, i32)>,
    created: Mutex<usize>,
}

impl FakeRuntime {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_init: false,
            reject_chain: None,
            fail_command: None,
            frames: Vec::new(),
            notify_on_start: None,
            created: Mutex::new(0),
        }
    }

    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn reject_chain(mut self, index: usize) -> Self {
        self.reject_chain = Some(index);
        self
    }

    /// Fail every command switching `on` or `off`
    pub fn fail_command(mut self, switch: &'static str) -> Self {
        self.fail_command = Some(switch);
        self
    }

    /// Uniform frames `(width, height, value)` delivered on "on"
    pub fn with_frames(mut self, frames: Vec<(u32, u32, u8)>) -> Self {
        self.frames = frames;
        self
    }

    /// Report `(stage, code)` through the error hook on "on"
    pub fn notify_on_start(mut self, stage: &'static str, code: i32) -> Self {
        self.notify_on_start = Some((stage, code));
        self
    }
}

impl PipelineRuntime for FakeRuntime {
    fn initialize(&self, config: &str) -> Result<()> {
        if self.fail_init {
            bail!("license check failed");
        }
        self.log.push(Event::Initialize(config.to_string()));
        Ok(())
    }

    fn create_chain(&self, _config: &str, on_error: ErrorHook) -> Result<Box<dyn ChainBackend>> {
        let mut created = self.created.lock().unwrap();
        let index = *created;
        *created += 1;
        if self.reject_chain == Some(index) {
            return Err(anyhow!("unknown stage type"));
        }
        self.log.push(Event::CreateChain(index));
        Ok(Box::new(FakeChain {
            index,
            log: self.log.clone(),
            callback: None,
            on_error,
            fail_command: self.fail_command,
            frames: self.frames.clone(),
            notify_on_start: self.notify_on_start,
        }))
    }

    fn finalize(&self) {
        self.log.push(Event::Finalize);
    }
}

struct FakeChain {
    index: usize,
    log: EventLog,
    callback: Option<ExportCallback>,
    on_error: ErrorHook,
    fail_command: Option<&'static str>,
    frames: Vec<(u32, u32, u8)>,
    notify_on_start: Option<(&'static str, i32)>,
}

impl ChainBackend for FakeChain {
    fn set_export_callback(&mut self, stage: &str, callback: ExportCallback) -> Result<()> {
        self.log.push(Event::SetCallback(self.index, stage.to_string()));
        self.callback = Some(callback);
        Ok(())
    }

    fn execute(&mut self, command: &str) -> Result<()> {
        self.log.push(Event::Execute(self.index, command.to_string()));
        let is_on = command.contains(r#""command":"on""#);
        let switch = if is_on { "on" } else { "off" };
        if self.fail_command == Some(switch) {
            bail!("command rejected by runtime");
        }

        if is_on {
            if let Some((stage, code)) = self.notify_on_start {
                (self.on_error)(stage, code);
            }
            if let Some(callback) = &self.callback {
                for &(width, height, value) in &self.frames {
                    let raw = vec![value; (width * height * 4) as usize];
                    callback(&raw, FrameMetadata::new(width, height));
                }
            }
        }
        Ok(())
    }
}

impl Drop for FakeChain {
    fn drop(&mut self) {
        self.log.push(Event::DestroyChain(self.index));
    }
}

/// Surface that requests cancellation after a fixed number of polls
pub struct FakeSurface {
    log: EventLog,
    polls_left: usize,
    failing_presents: usize,
    pub polls: usize,
    /// `(width, height, first byte)` of every presented frame
    pub presented: Vec<(u32, u32, u8)>,
}

impl FakeSurface {
    pub fn new(log: EventLog, polls: usize) -> Self {
        Self {
            log,
            polls_left: polls,
            failing_presents: 0,
            polls: 0,
            presented: Vec::new(),
        }
    }

    /// Fail the first `count` presents
    pub fn failing_presents(mut self, count: usize) -> Self {
        self.failing_presents = count;
        self
    }
}

impl crate::display::OutputSurface for FakeSurface {
    fn create_or_resize(&mut self, width: u32, height: u32) -> Result<(), BrokerError> {
        self.log.push(Event::Resize(width, height));
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<(), BrokerError> {
        if self.failing_presents > 0 {
            self.failing_presents -= 1;
            return Err(BrokerError::Presentation("device lost".into()));
        }
        self.log.push(Event::Present(frame.width(), frame.height()));
        self.presented
            .push((frame.width(), frame.height(), frame.data()[0]));
        Ok(())
    }

    fn poll_cancel(&mut self, _timeout: Duration) -> bool {
        self.polls += 1;
        if self.polls_left == 0 {
            return true;
        }
        self.polls_left -= 1;
        self.polls_left == 0
    }

    fn close(&mut self) {
        self.log.push(Event::Close);
    }
}
