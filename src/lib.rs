//! Latest-frame broker between pipeline chains and a display
//!
//! A pipeline runtime delivers decoded BGRA frames to a callback on its own
//! thread. The broker copies each frame into a latest-wins
//! [`frame::FrameBuffer`], while a [`display::DisplayLoop`] polls that
//! buffer at a fixed cadence and presents the newest frame. The
//! [`broker::ImageBroker`] brackets the display loop with export on/off
//! commands and tears everything down in order.

pub mod broker;
pub mod chain;
pub mod command;
pub mod config;
pub mod display;
pub mod error;
pub mod frame;
pub mod runtime;
pub mod utils;

#[cfg(test)]
mod testing;

pub use broker::{ImageBroker, RunSummary};
pub use error::BrokerError;
