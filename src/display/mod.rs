//! Display side of the broker: output surfaces and the polling loop

pub mod headless;
#[cfg(feature = "window")]
pub mod window;

pub use headless::HeadlessSurface;
#[cfg(feature = "window")]
pub use window::WindowSurface;

use crate::error::BrokerError;
use crate::frame::{Frame, FrameBuffer};
use crate::utils::sos::SignalOfStop;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_WIDTH: u32 = 1280;
pub const DEFAULT_MAX_HEIGHT: u32 = 1024;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Where frames end up: a window, a headless sink, a test double.
pub trait OutputSurface {
    /// Create the output at the given size, or resize it if it exists
    fn create_or_resize(&mut self, width: u32, height: u32) -> Result<(), BrokerError>;

    /// Show one frame
    fn present(&mut self, frame: &Frame) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for a cancellation request (Esc, window closed...)
    fn poll_cancel(&mut self, timeout: Duration) -> bool;

    /// Tear the output down
    fn close(&mut self) {}
}

/// Fit `width`x`height` within the bounds, keeping the aspect ratio.
///
/// Width is clamped first; if the recomputed height is still too large it
/// is clamped and the width recomputed from the already clamped size.
pub fn fit_to_bounds(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let (mut w, mut h) = (width.max(1) as f64, height.max(1) as f64);
    let (max_w, max_h) = (max_width.max(1) as f64, max_height.max(1) as f64);

    if w > max_w {
        h = (max_w / (w / h)).round_ties_even();
        w = max_w;
    }
    if h > max_h {
        w = (max_h * (w / h)).round_ties_even();
        h = max_h;
    }

    ((w as u32).max(1), (h as u32).max(1))
}

#[derive(Debug, Clone)]
pub struct DisplayOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// Bounded wait for cancellation, also the frame polling period
    pub poll_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

/// Consumer-local output state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowState {
    pub negotiated: bool,
    pub width: u32,
    pub height: u32,
}

/// What a finished display loop did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplaySummary {
    pub iterations: u64,
    pub presented: u64,
    pub present_failures: u64,
    /// Negotiated output size, if any frame ever arrived
    pub output_size: Option<(u32, u32)>,
}

/// Polls the frame buffer and presents the latest frame until cancelled.
pub struct DisplayLoop {
    buffer: Arc<FrameBuffer>,
    options: DisplayOptions,
    stop: SignalOfStop,
    state: WindowState,
    summary: DisplaySummary,
}

impl DisplayLoop {
    pub fn new(buffer: Arc<FrameBuffer>, options: DisplayOptions, stop: SignalOfStop) -> Self {
        Self {
            buffer,
            options,
            stop,
            state: WindowState::default(),
            summary: DisplaySummary::default(),
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    /// Run until the surface or the stop signal requests cancellation
    pub fn run(&mut self, surface: &mut dyn OutputSurface) -> DisplaySummary {
        let mut last_stats = Instant::now();

        loop {
            self.summary.iterations += 1;
            self.step(surface);

            if surface.poll_cancel(self.options.poll_interval) || self.stop.cancelled() {
                log::info!("Cancellation requested, leaving display loop");
                break;
            }

            if last_stats.elapsed() >= self.options.stats_interval {
                self.log_summary();
                last_stats = Instant::now();
            }
        }

        self.log_summary();
        self.summary.clone()
    }

    fn step(&mut self, surface: &mut dyn OutputSurface) {
        let Some(frame) = self.buffer.read_snapshot() else {
            return;
        };

        if !self.state.negotiated {
            let (width, height) = fit_to_bounds(
                frame.width(),
                frame.height(),
                self.options.max_width,
                self.options.max_height,
            );
            match surface.create_or_resize(width, height) {
                Ok(()) => {
                    log::info!(
                        "Output negotiated at {width}x{height} for {}x{} frames",
                        frame.width(),
                        frame.height()
                    );
                    self.state = WindowState {
                        negotiated: true,
                        width,
                        height,
                    };
                    self.summary.output_size = Some((width, height));
                }
                Err(e) => {
                    self.summary.present_failures += 1;
                    log::warn!("{e}, retrying with the next frame");
                    return;
                }
            }
        }

        match surface.present(&frame) {
            Ok(()) => self.summary.presented += 1,
            Err(e) => {
                self.summary.present_failures += 1;
                log::warn!("{e}, skipping frame");
            }
        }
    }

    fn log_summary(&self) {
        let stats = self.buffer.stats();
        log::info!(
            "Display: presented={} failures={} | delivered={} dropped={}",
            self.summary.presented,
            self.summary.present_failures,
            stats.delivered(),
            stats.dropped(),
        );
    }
}
