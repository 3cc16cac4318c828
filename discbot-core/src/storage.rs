//! Byte-addressed non-volatile storage used for calibration data.

/// Base address of the motion calibration block.
pub const MOTION_BLOCK: u16 = 0x0000;
/// Base address of the colour classifier block.
pub const COLOR_BLOCK: u16 = 0x0100;
/// Base address of the RFID card table, just past the colour block.
pub const CARD_BLOCK: u16 = 0x0180;

/// Persistent byte store (EEPROM or a flash-backed mirror).
pub trait NvStore {
    fn read(&mut self, address: u16) -> u8;
    fn write(&mut self, address: u16, value: u8);

    /// Reads a big-endian word.
    fn read_u16(&mut self, address: u16) -> u16 {
        u16::from_be_bytes([self.read(address), self.read(address.wrapping_add(1))])
    }

    /// Writes a big-endian word.
    fn write_u16(&mut self, address: u16, value: u16) {
        let [high, low] = value.to_be_bytes();
        self.write(address, high);
        self.write(address.wrapping_add(1), low);
    }
}

impl<S: NvStore + ?Sized> NvStore for &mut S {
    fn read(&mut self, address: u16) -> u8 {
        (**self).read(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        (**self).write(address, value);
    }
}

/// RAM-backed store that starts out erased (`0xFF`). Reads and writes
/// outside the array are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RamStore<const N: usize> {
    bytes: [u8; N],
    writes: usize,
}

impl<const N: usize> RamStore<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: [0xFF; N],
            writes: 0,
        }
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; N]) -> Self {
        Self { bytes, writes: 0 }
    }

    /// Number of byte writes performed so far.
    #[must_use]
    pub const fn write_count(&self) -> usize {
        self.writes
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> Default for RamStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NvStore for RamStore<N> {
    fn read(&mut self, address: u16) -> u8 {
        self.bytes
            .get(usize::from(address))
            .copied()
            .unwrap_or(0xFF)
    }

    fn write(&mut self, address: u16, value: u8) {
        if let Some(byte) = self.bytes.get_mut(usize::from(address)) {
            *byte = value;
            self.writes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_big_endian() {
        let mut store = RamStore::<8>::new();
        store.write_u16(2, 0x1234);
        assert_eq!(store.as_bytes()[2], 0x12);
        assert_eq!(store.as_bytes()[3], 0x34);
        assert_eq!(store.read_u16(2), 0x1234);
    }

    #[test]
    fn out_of_range_access_is_ignored() {
        let mut store = RamStore::<4>::new();
        store.write(10, 0);
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.read(10), 0xFF);
    }
}
