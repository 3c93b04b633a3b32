//! Firmware image handling.
//!
//! The surrounding system hands the engine a raw byte buffer already sized
//! to the device ROM; no file-format parsing happens here. The image is
//! immutable for the life of a session and is only ever read through
//! fixed-size sector windows.

use crate::chip::{FLASH_CAPACITY, SECTOR_SIZE};
use crate::error::{Error, Result};

/// Validate a raw image buffer against the device's flash capacity.
///
/// Pure validation, no I/O. An image of exactly [`FLASH_CAPACITY`] bytes
/// is accepted; one byte more is rejected.
pub fn check_image(data: &[u8]) -> Result<()> {
    if data.len() > FLASH_CAPACITY {
        return Err(Error::CapacityExceeded {
            len: data.len(),
            capacity: FLASH_CAPACITY,
        });
    }
    Ok(())
}

/// A capacity-checked firmware image.
///
/// Constructing a `FlashImage` is the only way to get bytes into the
/// programming session, so the capacity bound is enforced before any
/// transport I/O can happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    data: Vec<u8>,
}

impl FlashImage {
    /// Take ownership of an image buffer, validating its size.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        check_image(&data)?;
        Ok(Self { data })
    }

    /// Copy an image out of a borrowed buffer, validating its size.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Self::new(data.to_vec())
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of sector windows the write loop will send.
    pub fn sector_count(&self) -> usize {
        self.data.len().div_ceil(SECTOR_SIZE)
    }

    /// Iterate the image in 128-byte windows from address 0. The final
    /// window is zero-padded if the image's remaining bytes are fewer
    /// than a full sector.
    pub fn sectors(&self) -> Sectors<'_> {
        Sectors {
            data: &self.data,
            offset: 0,
        }
    }
}

/// One 128-byte slice of the image at a flash address. Built on demand
/// inside the write loop and consumed by a single LoadFlash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorWindow {
    /// Destination flash address of this window.
    pub address: u32,
    /// Window contents, zero-padded past the image end.
    pub data: [u8; SECTOR_SIZE],
}

/// Iterator over an image's sector windows.
#[derive(Debug)]
pub struct Sectors<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Iterator for Sectors<'_> {
    type Item = SectorWindow;

    #[allow(clippy::cast_possible_truncation)] // flash addresses fit in u32
    fn next(&mut self) -> Option<SectorWindow> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + SECTOR_SIZE).min(self.data.len());
        let chunk = &self.data[self.offset..end];

        let mut window = [0u8; SECTOR_SIZE];
        window[..chunk.len()].copy_from_slice(chunk);

        let sector = SectorWindow {
            address: self.offset as u32,
            data: window,
        };
        self.offset += SECTOR_SIZE;
        Some(sector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exactly_full_capacity() {
        assert!(check_image(&vec![0xFF; FLASH_CAPACITY]).is_ok());
        assert!(FlashImage::new(vec![0xFF; FLASH_CAPACITY]).is_ok());
    }

    #[test]
    fn rejects_one_byte_over_capacity() {
        let err = check_image(&vec![0xFF; FLASH_CAPACITY + 1]).unwrap_err();
        match err {
            Error::CapacityExceeded { len, capacity } => {
                assert_eq!(len, FLASH_CAPACITY + 1);
                assert_eq!(capacity, FLASH_CAPACITY);
            }
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
    }

    #[test]
    fn sector_count_rounds_up() {
        let cases = [
            (0usize, 0usize),
            (1, 1),
            (SECTOR_SIZE - 1, 1),
            (SECTOR_SIZE, 1),
            (SECTOR_SIZE + 1, 2),
            (FLASH_CAPACITY, 96),
        ];
        for (len, sectors) in cases {
            let image = FlashImage::new(vec![0xAA; len]).unwrap();
            assert_eq!(image.sector_count(), sectors, "len {len}");
            assert_eq!(image.sectors().count(), sectors, "len {len}");
        }
    }

    #[test]
    fn final_partial_window_is_zero_padded() {
        let len = SECTOR_SIZE + 10;
        let image = FlashImage::new(vec![0x5A; len]).unwrap();
        let windows: Vec<_> = image.sectors().collect();

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].address, SECTOR_SIZE as u32);
        assert_eq!(&windows[1].data[..10], &[0x5A; 10]);
        assert_eq!(&windows[1].data[10..], &[0u8; SECTOR_SIZE - 10]);
    }

    #[test]
    fn no_window_starts_beyond_the_image() {
        let image = FlashImage::new(vec![0x11; 3 * SECTOR_SIZE]).unwrap();
        let addresses: Vec<_> = image.sectors().map(|w| w.address).collect();
        assert_eq!(addresses, vec![0, 128, 256]);
        // Exact multiple: the loop concludes after the last full window
        // and never runs past the image end.
        assert!(addresses.iter().all(|&a| (a as usize) < image.len()));
    }

    #[test]
    fn windows_walk_addresses_in_sector_strides() {
        let image = FlashImage::new(vec![0x00; 300]).unwrap();
        let addresses: Vec<_> = image.sectors().map(|w| w.address).collect();
        assert_eq!(addresses, vec![0, 128, 256]);
    }
}
