//! Programming options written to the device's option bytes.
//!
//! These are pure value objects: a `ProgramOptions` bundle lives for the
//! duration of one `program()` call and carries no other state. The wire
//! encoding of each field is owned by this module so the command builders
//! never do bit arithmetic of their own.

/// Delay between releasing reset and the first instruction fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResetWaitTime {
    /// 8 ms (power-on default).
    #[default]
    Ms8,
    /// 4 ms.
    Ms4,
    /// 1 ms.
    Ms1,
    /// 16 ms.
    Ms16,
}

impl ResetWaitTime {
    /// Selector bits in option byte 0.
    pub(crate) fn bits(self) -> u8 {
        match self {
            Self::Ms8 => 0b00,
            Self::Ms4 => 0b01,
            Self::Ms1 => 0b10,
            Self::Ms16 => 0b11,
        }
    }

    /// The configured wait in milliseconds.
    pub fn millis(self) -> u32 {
        match self {
            Self::Ms8 => 8,
            Self::Ms4 => 4,
            Self::Ms1 => 1,
            Self::Ms16 => 16,
        }
    }
}

/// Brown-out reset threshold voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BrownOutLevel {
    /// 1.8 V (power-on default).
    #[default]
    V1_8,
    /// 2.0 V.
    V2_0,
    /// 2.4 V.
    V2_4,
    /// 2.7 V.
    V2_7,
    /// 3.0 V.
    V3_0,
    /// 3.3 V.
    V3_3,
    /// 3.9 V.
    V3_9,
    /// 4.2 V.
    V4_2,
}

impl BrownOutLevel {
    /// Selector bits in option byte 1.
    pub(crate) fn bits(self) -> u8 {
        match self {
            Self::V1_8 => 0b000,
            Self::V2_0 => 0b001,
            Self::V2_4 => 0b010,
            Self::V2_7 => 0b011,
            Self::V3_0 => 0b100,
            Self::V3_3 => 0b101,
            Self::V3_9 => 0b110,
            Self::V4_2 => 0b111,
        }
    }

    /// The configured threshold in millivolts.
    pub fn millivolts(self) -> u32 {
        match self {
            Self::V1_8 => 1800,
            Self::V2_0 => 2000,
            Self::V2_4 => 2400,
            Self::V2_7 => 2700,
            Self::V3_0 => 3000,
            Self::V3_3 => 3300,
            Self::V3_9 => 3900,
            Self::V4_2 => 4200,
        }
    }
}

/// Polarity of the external reset pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExternResetPolarity {
    /// Reset asserted when the pin is low (power-on default).
    #[default]
    ActiveLow,
    /// Reset asserted when the pin is high.
    ActiveHigh,
}

/// How much of the flash to erase before programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EraseKind {
    /// Erase only the sectors inside the configured address range.
    Partial,
    /// Erase the range but preserve the data flash area.
    PartialKeepData,
    /// Erase the whole chip. Takes much longer than any other command and
    /// therefore runs under its own timeout budget.
    #[default]
    FullChip,
}

impl EraseKind {
    /// Wire byte carried in the EraseFlash payload.
    pub(crate) fn wire_byte(self) -> u8 {
        match self {
            Self::Partial => 0x00,
            Self::PartialKeepData => 0x01,
            Self::FullChip => 0x02,
        }
    }
}

/// Inclusive flash address range for partial erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressRange {
    /// First address of the range.
    pub start: u16,
    /// Last address of the range.
    pub end: u16,
}

impl AddressRange {
    /// Create a new range.
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }
}

/// Option bundle for one programming run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgramOptions {
    /// Reset-to-fetch wait time.
    pub reset_wait: ResetWaitTime,
    /// Brown-out reset threshold.
    pub brown_out: BrownOutLevel,
    /// External reset pin polarity.
    pub extern_reset_polarity: ExternResetPolarity,
    /// Whether the external reset pin is enabled at all.
    pub extern_reset_enabled: bool,
    /// Erase mode applied before the write loop.
    pub erase: EraseKind,
    /// Address range for partial erase. Zero-filled on the wire for
    /// full-chip erase.
    pub erase_range: AddressRange,
    /// Write-protect the flash against in-application programming.
    pub iap_protect: bool,
}

impl ProgramOptions {
    /// Set the reset wait time.
    #[must_use]
    pub fn with_reset_wait(mut self, wait: ResetWaitTime) -> Self {
        self.reset_wait = wait;
        self
    }

    /// Set the brown-out threshold.
    #[must_use]
    pub fn with_brown_out(mut self, level: BrownOutLevel) -> Self {
        self.brown_out = level;
        self
    }

    /// Enable the external reset pin with the given polarity.
    #[must_use]
    pub fn with_extern_reset(mut self, polarity: ExternResetPolarity) -> Self {
        self.extern_reset_enabled = true;
        self.extern_reset_polarity = polarity;
        self
    }

    /// Set the erase mode.
    #[must_use]
    pub fn with_erase(mut self, kind: EraseKind) -> Self {
        self.erase = kind;
        self
    }

    /// Set the address range for partial erase.
    #[must_use]
    pub fn with_erase_range(mut self, range: AddressRange) -> Self {
        self.erase_range = range;
        self
    }

    /// Set the IAP write-protect flag.
    #[must_use]
    pub fn with_iap_protect(mut self, protect: bool) -> Self {
        self.iap_protect = protect;
        self
    }

    /// Option byte 0: bits 0-1 reset wait, bit 2 extern reset enable,
    /// bit 3 extern reset polarity.
    pub(crate) fn option_byte0(&self) -> u8 {
        let mut byte = self.reset_wait.bits();
        if self.extern_reset_enabled {
            byte |= 1 << 2;
        }
        if self.extern_reset_polarity == ExternResetPolarity::ActiveHigh {
            byte |= 1 << 3;
        }
        byte
    }

    /// Option byte 1: bits 0-2 brown-out level.
    pub(crate) fn option_byte1(&self) -> u8 {
        self.brown_out.bits()
    }
}
