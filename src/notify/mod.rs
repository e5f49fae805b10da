//! Transition detection and notification dispatch.
//!
//! The [`TransitionDetector`] turns consecutive samples into status-change
//! events; the [`Notifier`] fans events out to every configured channel,
//! gated by per-channel dedupe state.

pub mod channels;
mod dedupe;
mod detector;
mod events;
mod service;

pub use channels::build_channels;
pub use dedupe::*;
pub use detector::*;
pub use events::*;
pub use service::*;

#[cfg(test)]
pub(crate) use service::tests::RecordingChannel;

use std::time::Duration;
use thiserror::Error;

/// Delivery error types. Always contained to the failing channel.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Http(String),
    #[error("channel returned HTTP {0}: {1}")]
    Status(u16, String),
    #[error("invalid channel configuration: {0}")]
    Config(String),
}
