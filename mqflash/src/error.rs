//! Error types for mqflash.

use std::io;
use thiserror::Error;

use crate::protocol::frame::FrameError;
use crate::session::Step;

/// Result type for mqflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mqflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A response frame failed field validation.
    #[error("Frame validation failed: {0}")]
    Frame(#[from] FrameError),

    /// No valid response within the step's retry/timeout budget.
    #[error("Timeout during {step}: {detail}")]
    Timeout {
        /// The session step that ran out of budget.
        step: Step,
        /// Human-readable diagnostic.
        detail: String,
    },

    /// Firmware image is larger than the device's flash.
    #[error("Image is {len} bytes but flash capacity is {capacity} bytes")]
    CapacityExceeded {
        /// Length of the rejected image.
        len: usize,
        /// Addressable flash capacity of the device.
        capacity: usize,
    },

    /// Quit was not acknowledged; the device needs a power cycle to leave
    /// ISP mode.
    #[error("Device left in ISP mode: {0}")]
    DeviceLeftInIsp(String),

    /// A session step failed after exhausting its retry budget.
    #[error("{step} failed: {detail}")]
    StepFailed {
        /// The failing session step.
        step: Step,
        /// Human-readable diagnostic.
        detail: String,
    },
}
