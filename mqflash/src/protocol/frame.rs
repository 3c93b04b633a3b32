//! MQ79 ISP frame codec and command builders.
//!
//! Every exchange except the bare induct magic uses the same fixed frame
//! layout:
//!
//! ```text
//! +--------+------------+--------+---------+--------+---------+----------+---------+
//! | Header | Identifier | Series | Command | Length | Payload | Checksum | Trailer |
//! +--------+------------+--------+---------+--------+---------+----------+---------+
//! | 2 LE   | 2 LE       | 2 LE   | 2 LE    | 2 BE   | 0..N    | 2        | 1       |
//! +--------+------------+--------+---------+--------+---------+----------+---------+
//! | 0xB946 | host/dev   | 0x000A | opcode  | N      | payload | XOR-fold | 0x16    |
//! +--------+------------+--------+---------+--------+---------+----------+---------+
//! ```
//!
//! The length field is the one big-endian quantity on an otherwise
//! little-endian wire, and the checksum bytes are swapped relative to
//! natural order (see [`crate::protocol::checksum`]). Both quirks are part
//! of the device's boot ROM and not negotiable.

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use thiserror::Error;

use crate::chip::SECTOR_SIZE;
use crate::options::{AddressRange, EraseKind, ProgramOptions};
use crate::protocol::checksum::checksum;

/// Frame header magic identifying the protocol revision.
pub const FRAME_HEADER: u16 = 0xB946;

/// Identifier carried by host-to-device frames.
pub const HOST_IDENTIFIER: u16 = 0x006A;

/// Identifier carried by device-to-host frames.
pub const DEVICE_IDENTIFIER: u16 = 0x0068;

/// Hardware series code tying the protocol to the MQ79 family.
pub const HARDWARE_SERIES: u16 = 0x000A;

/// Frame terminator byte.
pub const FRAME_TRAILER: u8 = 0x16;

/// Bare induct request: the three low bytes of `0x255A7F`, sent LSB first
/// and without a frame wrapper. The device is not yet running the ISP
/// firmware at that point and cannot parse full frames.
pub const INDUCT_MAGIC: [u8; 3] = [0x7F, 0x5A, 0x25];

/// Byte offset of the payload inside a frame.
pub const PAYLOAD_OFFSET: usize = 10;

/// Fixed bytes around the payload: header through length, plus checksum
/// and trailer.
pub const FRAME_OVERHEAD: usize = 13;

/// Total size of every status response frame.
pub const STATUS_RESPONSE_LEN: usize = 15;

/// Total size of the induct response frame.
pub const INDUCT_RESPONSE_LEN: usize = 17;

/// Payload size of the induct response: status word plus model code.
pub const INDUCT_PAYLOAD_LEN: usize = 4;

/// Payload size of a SetCustomerInfo frame.
pub const CUSTOMER_INFO_LEN: usize = 16;

/// Reserved zero bytes in a SetOption payload.
const OPTION_RESERVED: usize = 8;

/// Reserved zero bytes in a SetProtectOption payload.
const PROTECT_RESERVED: usize = 31;

/// Command and status opcodes of the ISP protocol.
///
/// Requests and responses share one opcode namespace: a response frame
/// echoes the request opcode in its command field and carries a status
/// opcode in its payload. The induct response is the exception and uses
/// [`Opcode::RespondInduct`] as its command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// Handshake (0x0001).
    Handshake = 0x0001,
    /// Erase flash (0x0002).
    EraseFlash = 0x0002,
    /// Write one sector window (0x0003).
    LoadFlash = 0x0003,
    /// Write the option bytes (0x0004).
    SetOption = 0x0004,
    /// Write the protect option bytes (0x0005).
    SetProtectOption = 0x0005,
    /// Write the customer info block (0x0006).
    SetCustomerInfo = 0x0006,
    /// Leave ISP mode and resume normal execution (0x0007).
    Quit = 0x0007,
    /// Read option byte 0 (0x0010).
    ReadOption0 = 0x0010,
    /// Read option byte 1 (0x0011).
    ReadOption1 = 0x0011,
    /// Read option byte 2 (0x0012).
    ReadOption2 = 0x0012,
    /// Induct response (0x0080).
    RespondInduct = 0x0080,
    /// Status: command accepted (0x0090).
    StatusOkey = 0x0090,
    /// Status: payload failed device-side validation (0x0091).
    StatusValidationError = 0x0091,
    /// Status: flash is encrypted and cannot be written (0x0092).
    StatusFlashEncrypted = 0x0092,
    /// Status: any other device-side failure (0x0093).
    StatusOtherError = 0x0093,
}

impl Opcode {
    /// Look up an opcode by its wire value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Handshake),
            0x0002 => Some(Self::EraseFlash),
            0x0003 => Some(Self::LoadFlash),
            0x0004 => Some(Self::SetOption),
            0x0005 => Some(Self::SetProtectOption),
            0x0006 => Some(Self::SetCustomerInfo),
            0x0007 => Some(Self::Quit),
            0x0010 => Some(Self::ReadOption0),
            0x0011 => Some(Self::ReadOption1),
            0x0012 => Some(Self::ReadOption2),
            0x0080 => Some(Self::RespondInduct),
            0x0090 => Some(Self::StatusOkey),
            0x0091 => Some(Self::StatusValidationError),
            0x0092 => Some(Self::StatusFlashEncrypted),
            0x0093 => Some(Self::StatusOtherError),
            _ => None,
        }
    }
}

/// Device status carried in a response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command accepted.
    Okey,
    /// Payload failed device-side validation.
    ValidationError,
    /// Flash is encrypted.
    FlashEncrypted,
    /// Any other device-side failure.
    OtherError,
}

impl Status {
    /// Parse a status word from the wire.
    pub fn from_u16(value: u16) -> Option<Self> {
        match Opcode::from_u16(value)? {
            Opcode::StatusOkey => Some(Self::Okey),
            Opcode::StatusValidationError => Some(Self::ValidationError),
            Opcode::StatusFlashEncrypted => Some(Self::FlashEncrypted),
            Opcode::StatusOtherError => Some(Self::OtherError),
            _ => None,
        }
    }

    /// Whether the device accepted the command.
    pub fn is_ok(self) -> bool {
        self == Self::Okey
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Okey => write!(f, "OK"),
            Self::ValidationError => write!(f, "validation error"),
            Self::FlashEncrypted => write!(f, "flash encrypted"),
            Self::OtherError => write!(f, "other error"),
        }
    }
}

/// Frame decode failure. One variant per validated field, produced in
/// wire order with the first mismatch winning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame shorter than the fixed overhead.
    #[error("frame truncated at {len} bytes")]
    Truncated {
        /// Bytes actually present.
        len: usize,
    },

    /// Header magic mismatch.
    #[error("bad header {actual:#06x}, expected {FRAME_HEADER:#06x}")]
    BadHeader {
        /// Header value found on the wire.
        actual: u16,
    },

    /// Identifier is not the device-to-host value.
    #[error("bad identifier {actual:#06x}, expected {DEVICE_IDENTIFIER:#06x}")]
    BadIdentifier {
        /// Identifier value found on the wire.
        actual: u16,
    },

    /// Hardware series mismatch.
    #[error("bad hardware series {actual:#06x}, expected {HARDWARE_SERIES:#06x}")]
    BadSeries {
        /// Series value found on the wire.
        actual: u16,
    },

    /// Command field does not match the request awaiting a response.
    #[error("bad command {actual:#06x}, expected {expected:?}")]
    BadCommand {
        /// The opcode the caller was waiting for.
        expected: Opcode,
        /// Command value found on the wire.
        actual: u16,
    },

    /// Declared payload length disagrees with the frame size.
    #[error("bad length: declared {declared} bytes, frame carries {actual}")]
    BadLength {
        /// Length field value.
        declared: usize,
        /// Payload bytes actually present.
        actual: usize,
    },

    /// Checksum mismatch.
    #[error("bad checksum {actual:#06x}, expected {expected:#06x}")]
    BadChecksum {
        /// Recomputed checksum.
        expected: u16,
        /// Checksum found on the wire.
        actual: u16,
    },

    /// Trailer byte mismatch.
    #[error("bad trailer {actual:#04x}, expected {FRAME_TRAILER:#04x}")]
    BadTrailer {
        /// Trailer byte found on the wire.
        actual: u8,
    },
}

/// One ISP request. Each variant carries exactly the data its payload
/// needs; a single `encode` match owns all offset arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Probe that the device is listening.
    Handshake,
    /// Erase flash before programming.
    Erase {
        /// Erase mode.
        kind: EraseKind,
        /// Range for partial erase; zero-filled on the wire for full-chip.
        range: AddressRange,
    },
    /// Write one 128-byte sector window.
    LoadFlash {
        /// Destination flash address of the window.
        address: u32,
        /// Window contents, zero-padded by the caller if short.
        data: [u8; SECTOR_SIZE],
    },
    /// Write the option bytes.
    SetOption(ProgramOptions),
    /// Write the protect option bytes.
    SetProtect(ProgramOptions),
    /// Write the customer info block. Present in the protocol but skipped
    /// by the default programming sequence.
    SetCustomerInfo([u8; CUSTOMER_INFO_LEN]),
    /// Leave ISP mode.
    Quit,
}

impl Command {
    /// The opcode this command goes out under, and that its response
    /// echoes back.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Handshake => Opcode::Handshake,
            Self::Erase { .. } => Opcode::EraseFlash,
            Self::LoadFlash { .. } => Opcode::LoadFlash,
            Self::SetOption(_) => Opcode::SetOption,
            Self::SetProtect(_) => Opcode::SetProtectOption,
            Self::SetCustomerInfo(_) => Opcode::SetCustomerInfo,
            Self::Quit => Opcode::Quit,
        }
    }

    /// Build this command's payload bytes.
    #[allow(clippy::cast_possible_truncation)] // sector size fits in u16
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    fn payload(&self) -> Vec<u8> {
        match self {
            Self::Handshake | Self::Quit => Vec::new(),
            Self::Erase { kind, range } => {
                // Full-chip erase ignores the range; zero-fill it on the
                // wire rather than leaking whatever the caller configured.
                let range = if *kind == EraseKind::FullChip {
                    AddressRange::default()
                } else {
                    *range
                };
                let mut buf = Vec::with_capacity(5);
                buf.push(kind.wire_byte());
                buf.write_u16::<LittleEndian>(range.start).unwrap();
                buf.write_u16::<LittleEndian>(range.end).unwrap();
                buf
            }
            Self::LoadFlash { address, data } => {
                let mut buf = Vec::with_capacity(4 + 2 + SECTOR_SIZE);
                buf.write_u32::<LittleEndian>(*address).unwrap();
                buf.write_u16::<LittleEndian>(SECTOR_SIZE as u16).unwrap();
                buf.extend_from_slice(data);
                buf
            }
            Self::SetOption(options) => {
                let mut buf = Vec::with_capacity(2 + OPTION_RESERVED);
                buf.push(options.option_byte0());
                buf.push(options.option_byte1());
                buf.extend_from_slice(&[0u8; OPTION_RESERVED]);
                buf
            }
            Self::SetProtect(options) => {
                let mut buf = Vec::with_capacity(1 + PROTECT_RESERVED);
                buf.push(u8::from(options.iap_protect));
                buf.extend_from_slice(&[0u8; PROTECT_RESERVED]);
                buf
            }
            Self::SetCustomerInfo(info) => info.to_vec(),
        }
    }

    /// Encode the complete host-to-device frame.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(HOST_IDENTIFIER, self.opcode(), &self.payload())
    }
}

/// Assemble a complete frame around `payload`.
///
/// The checksum is computed over header through payload immediately before
/// the final two bytes are filled; it is never computed over bytes that
/// already contain a checksum.
#[allow(clippy::cast_possible_truncation)] // payloads are far below 64 KiB
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode_frame(identifier: u16, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());

    buf.write_u16::<LittleEndian>(FRAME_HEADER).unwrap();
    buf.write_u16::<LittleEndian>(identifier).unwrap();
    buf.write_u16::<LittleEndian>(HARDWARE_SERIES).unwrap();
    buf.write_u16::<LittleEndian>(opcode as u16).unwrap();

    // Length is the one big-endian field on the wire.
    buf.write_u16::<BigEndian>(payload.len() as u16).unwrap();
    buf.extend_from_slice(payload);

    let sum = checksum(&buf);
    buf.write_u16::<LittleEndian>(sum).unwrap();
    buf.push(FRAME_TRAILER);

    buf
}

/// A validated device-to-host frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    /// Command field of the frame.
    pub opcode: Opcode,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl ParsedFrame {
    /// Status word from the first two payload bytes.
    pub fn status(&self) -> Option<Status> {
        let word = u16::from_le_bytes([*self.payload.first()?, *self.payload.get(1)?]);
        Status::from_u16(word)
    }

    /// Model code from payload bytes 2-3 of an induct response.
    pub fn model_code(&self) -> Option<u16> {
        Some(u16::from_le_bytes([
            *self.payload.get(2)?,
            *self.payload.get(3)?,
        ]))
    }
}

fn read_u16_le(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

/// Validate and parse a device-to-host frame.
///
/// Fields are checked in wire order — header, identifier, series, command
/// against `expected`, length, checksum, trailer — and the first mismatch
/// short-circuits. The caller decides whether a mismatch is retried or
/// fatal.
pub fn decode(raw: &[u8], expected: Opcode) -> Result<ParsedFrame, FrameError> {
    if raw.len() < FRAME_OVERHEAD {
        return Err(FrameError::Truncated { len: raw.len() });
    }

    let header = read_u16_le(raw, 0);
    if header != FRAME_HEADER {
        return Err(FrameError::BadHeader { actual: header });
    }

    let identifier = read_u16_le(raw, 2);
    if identifier != DEVICE_IDENTIFIER {
        return Err(FrameError::BadIdentifier { actual: identifier });
    }

    let series = read_u16_le(raw, 4);
    if series != HARDWARE_SERIES {
        return Err(FrameError::BadSeries { actual: series });
    }

    let command = read_u16_le(raw, 6);
    if Opcode::from_u16(command) != Some(expected) {
        return Err(FrameError::BadCommand {
            expected,
            actual: command,
        });
    }

    let declared = usize::from(u16::from_be_bytes([raw[8], raw[9]]));
    let actual = raw.len() - FRAME_OVERHEAD;
    if declared != actual {
        return Err(FrameError::BadLength { declared, actual });
    }

    let checksum_offset = PAYLOAD_OFFSET + declared;
    let stored = read_u16_le(raw, checksum_offset);
    let computed = checksum(&raw[..checksum_offset]);
    if stored != computed {
        return Err(FrameError::BadChecksum {
            expected: computed,
            actual: stored,
        });
    }

    let trailer = raw[checksum_offset + 2];
    if trailer != FRAME_TRAILER {
        return Err(FrameError::BadTrailer { actual: trailer });
    }

    Ok(ParsedFrame {
        opcode: expected,
        payload: raw[PAYLOAD_OFFSET..checksum_offset].to_vec(),
    })
}
