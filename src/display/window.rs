//! Preview window backed by minifb

use super::OutputSurface;
use crate::error::BrokerError;
use crate::frame::Frame;
use minifb::{Key, ScaleMode, Window, WindowOptions};
use std::thread;
use std::time::Duration;

/// Size of the window shown until the first frame is negotiated
pub const INITIAL_WINDOW_SIZE: (u32, u32) = (640, 480);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelReason {
    Closed,
    Escape,
}

/// Cancellation decision from the key and window state sampled once per poll.
fn cancel_reason(open: bool, escape_down: bool) -> Option<CancelReason> {
    if !open {
        Some(CancelReason::Closed)
    } else if escape_down {
        Some(CancelReason::Escape)
    } else {
        None
    }
}

fn create_window(title: &str, width: u32, height: u32) -> Result<Window, BrokerError> {
    let options = WindowOptions {
        resize: true,
        scale_mode: ScaleMode::AspectRatioStretch,
        ..WindowOptions::default()
    };
    Window::new(title, width as usize, height as usize, options)
        .map_err(|e| BrokerError::Presentation(e.to_string()))
}

/// Native preview window. It is open from the start, so Esc or closing it
/// cancels even before any frame arrived.
pub struct WindowSurface {
    title: String,
    window: Option<Window>,
    size: (u32, u32),
    pixels: Vec<u32>,
}

impl WindowSurface {
    pub fn open(title: impl Into<String>) -> Result<Self, BrokerError> {
        let title = title.into();
        let (width, height) = INITIAL_WINDOW_SIZE;
        let window = create_window(&title, width, height)?;
        Ok(Self {
            title,
            window: Some(window),
            size: INITIAL_WINDOW_SIZE,
            pixels: Vec::new(),
        })
    }
}

impl OutputSurface for WindowSurface {
    fn create_or_resize(&mut self, width: u32, height: u32) -> Result<(), BrokerError> {
        if self.window.is_some() && self.size == (width, height) {
            return Ok(());
        }
        // minifb windows cannot be resized from code. The new window replaces
        // the old one only once it exists, so a failure keeps the old one
        // open for cancellation.
        let window = create_window(&self.title, width, height)?;
        self.window = Some(window);
        self.size = (width, height);
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<(), BrokerError> {
        let Some(window) = self.window.as_mut() else {
            return Err(BrokerError::Presentation("window not created".into()));
        };
        if !window.is_open() {
            return Err(BrokerError::Presentation("window closed".into()));
        }

        // BGRA bytes read as a little-endian u32 give 0xAARRGGBB, which is
        // what minifb expects (alpha ignored)
        self.pixels.clear();
        self.pixels.extend(
            frame
                .data()
                .chunks_exact(4)
                .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]])),
        );

        window
            .update_with_buffer(&self.pixels, frame.width() as usize, frame.height() as usize)
            .map_err(|e| BrokerError::Presentation(e.to_string()))
    }

    fn poll_cancel(&mut self, timeout: Duration) -> bool {
        thread::sleep(timeout);
        let Some(window) = self.window.as_mut() else {
            return false;
        };

        // Key state is level-triggered: a press seen by any update, here or
        // in `present`, stays visible while the key is held
        window.update();
        match cancel_reason(window.is_open(), window.is_key_down(Key::Escape)) {
            Some(CancelReason::Closed) => {
                log::info!("Window was closed, stopping the program");
                true
            }
            Some(CancelReason::Escape) => {
                log::info!("Esc key was pressed, stopping the program");
                true
            }
            None => false,
        }
    }

    fn close(&mut self) {
        if self.window.take().is_some() {
            log::debug!("Window `{}` destroyed", self.title);
        }
    }
}
