//! # mqflash
//!
//! A library for programming MQ79-series MCUs over the serial ISP boot
//! protocol.
//!
//! This crate is the protocol engine used by the factory test station to
//! push firmware onto a device-under-test. It owns:
//!
//! - Frame building, parsing, and checksum computation for the MQ79 ISP
//!   wire protocol
//! - The session state machine that takes a target from power-up into
//!   programming mode and back out
//! - The chunked flash-write loop that streams an image into fixed-size
//!   sector windows
//!
//! The surrounding station — GUI, result storage, measurement scripts —
//! stays outside: it supplies a firmware image as a raw byte buffer and a
//! serial port, and consumes a `Result` plus diagnostics.
//!
//! ## Supported Devices
//!
//! - MQ79F121 (model code `0x7912`)
//!
//! ## Features
//!
//! - `serde`: Serialization support for the option types
//!
//! ## Example
//!
//! ```rust,no_run
//! use mqflash::{FlashImage, ProgramOptions, Programmer};
//!
//! fn main() -> mqflash::Result<()> {
//!     let image = FlashImage::new(std::fs::read("firmware.bin")?)?;
//!
//!     let mut programmer = Programmer::open("/dev/ttyUSB0")?;
//!     programmer.initialize()?;
//!     programmer.program(&image, &ProgramOptions::default())?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chip;
pub mod error;
pub mod image;
pub mod options;
pub mod port;
pub mod protocol;
pub mod session;

// Re-exports for convenience
pub use {
    error::{Error, Result},
    image::{check_image, FlashImage, SectorWindow},
    options::{
        AddressRange, BrownOutLevel, EraseKind, ExternResetPolarity, ProgramOptions,
        ResetWaitTime,
    },
    port::{NativePort, NativePortEnumerator, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::frame::{Command, FrameError, Opcode, ParsedFrame, Status},
    session::{Programmer, RetryPolicy, SessionConfig, SessionState, Step},
};
