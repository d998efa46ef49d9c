use super::OutputSurface;
use crate::error::BrokerError;
use crate::frame::Frame;
use crate::utils::sos::SignalOfStop;
use std::time::Duration;

/// Surface without a window: counts frames, cancels on the stop signal.
pub struct HeadlessSurface {
    stop: SignalOfStop,
    size: Option<(u32, u32)>,
    presented: u64,
}

impl HeadlessSurface {
    pub fn new(stop: SignalOfStop) -> Self {
        Self {
            stop,
            size: None,
            presented: 0,
        }
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl OutputSurface for HeadlessSurface {
    fn create_or_resize(&mut self, width: u32, height: u32) -> Result<(), BrokerError> {
        log::info!("Headless output sized {width}x{height}");
        self.size = Some((width, height));
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<(), BrokerError> {
        if self.size.is_none() {
            return Err(BrokerError::Presentation("output not sized yet".into()));
        }
        self.presented += 1;
        log::trace!("Presented {}x{} frame", frame.width(), frame.height());
        Ok(())
    }

    fn poll_cancel(&mut self, timeout: Duration) -> bool {
        self.stop.wait_timeout(timeout)
    }

    fn close(&mut self) {
        log::info!("Headless output closed after {} frame(s)", self.presented);
        self.size = None;
    }
}
