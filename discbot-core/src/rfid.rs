//! RFID card registry and detection.
//!
//! Known cards are kept in non-volatile storage as a count byte followed by
//! big-endian 32-bit UIDs. Detection polls the reader on a timebase task;
//! the reader answers through [`CardRegistry::on_scan`], which reports a
//! card once when it appears and forgets it when the reader comes back
//! empty.

use core::fmt;

use heapless::Vec;

use crate::diag::warn;
use crate::storage::{CARD_BLOCK, NvStore};
use crate::timebase::{Handle, Reschedule, Timebase, TimebaseError};

pub const MAX_CARDS: usize = 8;

const COUNT_ADDRESS: u16 = CARD_BLOCK;
const UID_ADDRESS: u16 = CARD_BLOCK + 1;

/// Card serial number as read from the tag.
pub type CardUid = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CardError {
    TableFull,
    /// The card is already stored at this index.
    AlreadyRegistered(u8),
    /// No card is on the reader.
    NoCard,
    Timebase(TimebaseError),
}

impl From<TimebaseError> for CardError {
    fn from(error: TimebaseError) -> Self {
        Self::Timebase(error)
    }
}

impl fmt::Display for CardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardError::TableFull => write!(f, "card table full ({MAX_CARDS} cards)"),
            CardError::AlreadyRegistered(index) => write!(f, "card already stored as #{index}"),
            CardError::NoCard => f.write_str("no card on the reader"),
            CardError::Timebase(error) => write!(f, "timebase: {error}"),
        }
    }
}

/// Starts a tag scan; the result arrives through [`CardRegistry::on_scan`].
pub trait CardReader {
    fn scan(&mut self);
}

impl<R: CardReader + ?Sized> CardReader for &mut R {
    fn scan(&mut self) {
        (**self).scan();
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCardReader;

impl CardReader for NoopCardReader {
    fn scan(&mut self) {}
}

#[derive(Debug)]
pub struct CardRegistry {
    cards: Vec<CardUid, MAX_CARDS>,
    present: Option<CardUid>,
    detecting: Option<(Handle, u16)>,
}

impl CardRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cards: Vec::new(),
            present: None,
            detecting: None,
        }
    }

    /// Restores the card table. An erased or corrupt count loads as empty.
    pub fn load<S: NvStore>(&mut self, store: &mut S) {
        let count = usize::from(store.read(COUNT_ADDRESS));
        let count = if count > MAX_CARDS {
            warn!("rfid: stored card count {=usize} ignored", count);
            0
        } else {
            count
        };

        self.cards.clear();
        for slot in 0..count {
            let address = uid_address(slot);
            let high = u32::from(store.read_u16(address));
            let low = u32::from(store.read_u16(address + 2));
            // `count` is bounded by the table capacity above.
            let _ = self.cards.push((high << 16) | low);
        }
    }

    /// Stores `uid` and returns its index.
    ///
    /// # Errors
    ///
    /// Rejects known cards and a full table.
    pub fn register<S: NvStore>(&mut self, uid: CardUid, store: &mut S) -> Result<u8, CardError> {
        if let Some(index) = self.index_of(uid) {
            return Err(CardError::AlreadyRegistered(index));
        }
        let slot = self.cards.len();
        if self.cards.push(uid).is_err() {
            warn!("rfid: card table full");
            return Err(CardError::TableFull);
        }

        let address = uid_address(slot);
        for (offset, byte) in (0u16..).zip(uid.to_be_bytes()) {
            store.write(address + offset, byte);
        }
        let count = u8::try_from(self.cards.len()).unwrap_or(u8::MAX);
        store.write(COUNT_ADDRESS, count);
        Ok(count - 1)
    }

    /// Stores the card currently on the reader.
    ///
    /// # Errors
    ///
    /// Fails without a card, otherwise as [`register`](Self::register).
    pub fn register_present<S: NvStore>(&mut self, store: &mut S) -> Result<u8, CardError> {
        let uid = self.present.ok_or(CardError::NoCard)?;
        self.register(uid, store)
    }

    pub fn clear<S: NvStore>(&mut self, store: &mut S) {
        self.cards.clear();
        store.write(COUNT_ADDRESS, 0);
    }

    #[must_use]
    pub fn index_of(&self, uid: CardUid) -> Option<u8> {
        self.cards
            .iter()
            .position(|&card| card == uid)
            .and_then(|index| u8::try_from(index).ok())
    }

    #[must_use]
    pub fn uid_of(&self, index: u8) -> Option<CardUid> {
        self.cards.get(usize::from(index)).copied()
    }

    #[must_use]
    pub fn cards(&self) -> &[CardUid] {
        &self.cards
    }

    /// Card seen by the latest scan.
    #[must_use]
    pub const fn present(&self) -> Option<CardUid> {
        self.present
    }

    /// Registers `task` to scan every `period_ms`, replacing a running
    /// schedule. Returns the period in effect.
    ///
    /// # Errors
    ///
    /// Rejects periods the timebase cannot run at.
    pub fn start_detecting<T, const N: usize>(
        &mut self,
        period_ms: u16,
        timebase: &mut Timebase<T, N>,
        task: T,
    ) -> Result<u16, CardError>
    where
        T: Copy,
    {
        self.stop_detecting(timebase)?;
        let handle = timebase.register(task, period_ms)?;
        self.detecting = Some((handle, period_ms));
        self.present = None;
        Ok(period_ms)
    }

    /// # Errors
    ///
    /// Propagates a timebase failure while releasing the schedule.
    pub fn stop_detecting<T, const N: usize>(
        &mut self,
        timebase: &mut Timebase<T, N>,
    ) -> Result<(), CardError>
    where
        T: Copy,
    {
        if let Some((handle, _)) = self.detecting.take() {
            timebase.unregister(handle)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn detecting_period(&self) -> Option<u16> {
        self.detecting.map(|(_, period)| period)
    }

    pub fn on_detect_elapsed<R: CardReader>(&mut self, reader: &mut R) -> Reschedule {
        match self.detecting {
            Some((_, period)) => {
                reader.scan();
                Reschedule::After(period)
            }
            None => Reschedule::Cancel,
        }
    }

    /// Scan result. Returns the UID when a card different from the last
    /// one has appeared.
    pub fn on_scan(&mut self, uid: Option<CardUid>) -> Option<CardUid> {
        if uid == self.present {
            return None;
        }
        self.present = uid;
        uid
    }
}

impl Default for CardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn uid_address(slot: usize) -> u16 {
    UID_ADDRESS.saturating_add(u16::try_from(slot * 4).unwrap_or(u16::MAX))
}
