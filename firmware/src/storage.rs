//! RAM mirror of the calibration flash page.
//!
//! The core writes calibration bytes through [`NvStore`]; flash cannot be
//! rewritten byte by byte, so writes land in RAM and a background task
//! commits the whole image once [`FlashMirror::is_dirty`] reports changes.

use discbot_core::storage::{NvStore, RamStore};

/// Bytes mirrored from flash. Covers both calibration blocks.
pub const STORE_SIZE: usize = 512;

pub struct FlashMirror {
    ram: RamStore<STORE_SIZE>,
    committed_writes: usize,
}

impl FlashMirror {
    /// Erased mirror, as on a board that was never calibrated.
    pub const fn new() -> Self {
        Self::from_bytes([0xFF; STORE_SIZE])
    }

    /// Mirror loaded from the flash page contents.
    pub const fn from_bytes(bytes: [u8; STORE_SIZE]) -> Self {
        Self {
            ram: RamStore::from_bytes(bytes),
            committed_writes: 0,
        }
    }

    /// True when bytes changed since the last commit.
    pub const fn is_dirty(&self) -> bool {
        self.ram.write_count() != self.committed_writes
    }

    #[cfg(test)]
    pub const fn image(&self) -> &[u8; STORE_SIZE] {
        self.ram.as_bytes()
    }

    /// Takes a copy of the image for writing and marks it clean.
    pub fn take_commit(&mut self) -> Option<[u8; STORE_SIZE]> {
        if !self.is_dirty() {
            return None;
        }
        self.committed_writes = self.ram.write_count();
        Some(*self.ram.as_bytes())
    }
}

impl Default for FlashMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl NvStore for FlashMirror {
    fn read(&mut self, address: u16) -> u8 {
        self.ram.read(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.ram.write(address, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discbot_core::motion::{MotionController, NoopMotorDriver};
    use discbot_core::timebase::{BaseTime, Timebase};

    #[test]
    fn writes_mark_the_mirror_dirty_until_committed() {
        let mut mirror = FlashMirror::new();
        assert!(!mirror.is_dirty());
        assert_eq!(mirror.take_commit(), None);

        mirror.write_u16(0x0100, 0xBEEF);
        assert!(mirror.is_dirty());

        let image = mirror.take_commit().unwrap();
        assert_eq!(&image[0x100..0x102], &[0xBE, 0xEF]);
        assert!(!mirror.is_dirty());
        assert_eq!(mirror.take_commit(), None);
    }

    #[test]
    fn loaded_image_feeds_calibration() {
        let mut bytes = [0xFF; STORE_SIZE];
        bytes[..2].copy_from_slice(&205u16.to_le_bytes());
        let mut mirror = FlashMirror::from_bytes(bytes);

        let mut timebase: Timebase<u8, 2> = Timebase::new();
        timebase.init(BaseTime::Ms10, 2).unwrap();
        let mut motion: MotionController<NoopMotorDriver, u8> =
            MotionController::new(NoopMotorDriver::new());
        motion.init(&mut mirror, &mut timebase, 0).unwrap();

        assert_eq!(motion.wheel_circumference_mm(), 205);
        assert!(!mirror.is_dirty());
    }
}
