//! MQ79 device identity and flash geometry.
//!
//! The ISP engine targets exactly one variant of the MQ79 family. The
//! model code reported by the induct response is compared against an
//! explicit allow-list rather than a range check, so that adding a second
//! variant is a deliberate decision and not an accident of arithmetic.

/// Addressable flash capacity of the MQ79F121, in bytes.
pub const FLASH_CAPACITY: usize = 12 * 1024;

/// Size of one flash sector window. LoadFlash always carries exactly one
/// full window; the final window of an image is zero-padded.
pub const SECTOR_SIZE: usize = 128;

/// Baud rate of the ISP protocol. Every step runs at this rate; only the
/// bare induct magic may already be on the wire at another rate if the
/// caller has not yet switched.
pub const DEFAULT_BAUD: u32 = 57_600;

/// Model code reported by the MQ79F121 induct response.
pub const MODEL_MQ79F121: u16 = 0x7912;

/// Model code of the MQ79F081. The ISP firmware defines it, but this
/// engine never accepts it; only the MQ79F121 path is wired up.
pub const MODEL_MQ79F081: u16 = 0x7908;

/// Returns whether `model` is a variant this engine programs.
pub fn is_supported_model(model: u16) -> bool {
    model == MODEL_MQ79F121
}
