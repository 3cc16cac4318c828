//! Cooperative timer-callback scheduler driven by a periodic hardware tick.
//!
//! The table holds a fixed number of slots. Each slot carries a task token
//! of type `T`; when the slot expires the token is handed to a
//! [`TimeoutHandler`], which answers with a [`Reschedule`] decision.
//!
//! Structural changes are two-phase. `register` parks a slot in
//! [`SlotState::PendingRegister`] and `unregister` (or a handler returning
//! [`Reschedule::Cancel`]) parks it in [`SlotState::PendingUnregister`]; both
//! are committed by the sweep at the start of the next [`Timebase::tick`].
//! A slot therefore never changes its activation state while the dispatch
//! loop is walking the table.

use core::fmt;
use core::num::NonZeroU8;

use heapless::Vec;

use crate::diag::warn;

/// Recognised tick periods for the hardware timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BaseTime {
    Ms10,
    Ms20,
    Ms50,
    Ms100,
    Ms200,
    Ms500,
    Ms1000,
}

impl BaseTime {
    /// Every supported base time, shortest first.
    pub const ALL: [BaseTime; 7] = [
        BaseTime::Ms10,
        BaseTime::Ms20,
        BaseTime::Ms50,
        BaseTime::Ms100,
        BaseTime::Ms200,
        BaseTime::Ms500,
        BaseTime::Ms1000,
    ];

    /// Tick period in milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u16 {
        match self {
            BaseTime::Ms10 => 10,
            BaseTime::Ms20 => 20,
            BaseTime::Ms50 => 50,
            BaseTime::Ms100 => 100,
            BaseTime::Ms200 => 200,
            BaseTime::Ms500 => 500,
            BaseTime::Ms1000 => 1000,
        }
    }

    /// Maps a millisecond value back onto a supported base time.
    #[must_use]
    pub fn from_millis(millis: u16) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|base| base.as_millis() == millis)
    }
}

/// Decision returned by a timeout handler after its task ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reschedule {
    /// Run again after the given number of milliseconds.
    After(u16),
    /// Release the slot at the next tick boundary.
    Cancel,
}

impl Reschedule {
    /// Treats a zero delay as cancellation.
    #[must_use]
    pub const fn from_millis(millis: u16) -> Self {
        if millis == 0 {
            Reschedule::Cancel
        } else {
            Reschedule::After(millis)
        }
    }
}

/// 1-based reference to a scheduler slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Handle(NonZeroU8);

impl Handle {
    /// Wraps a raw handle value; zero is reserved and yields `None`.
    #[must_use]
    pub fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }

    /// Raw 1-based handle value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0.get()
    }

    fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index + 1).ok().and_then(Self::new)
    }

    fn index(self) -> usize {
        usize::from(self.0.get() - 1)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Handle {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{=u8}", self.get());
    }
}

/// Lifecycle of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    Free,
    Active,
    PendingRegister,
    PendingUnregister,
}

impl SlotState {
    /// Short label used by the `timers` dump.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SlotState::Free => "free",
            SlotState::Active => "active",
            SlotState::PendingRegister => "registering",
            SlotState::PendingUnregister => "unregistering",
        }
    }

    const fn is_live(self) -> bool {
        matches!(self, SlotState::Active | SlotState::PendingRegister)
    }
}

/// Errors reported by scheduler operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimebaseError {
    NotInitialized,
    AlreadyInitialized,
    /// `init` asked for more slots than the table was built with.
    CapacityExceeded,
    /// Requested period is zero ticks or not a multiple of the base time.
    InvalidPeriod,
    /// Every slot is in use.
    TableFull,
    InvalidHandle,
}

impl fmt::Display for TimebaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimebaseError::NotInitialized => f.write_str("timebase not initialized"),
            TimebaseError::AlreadyInitialized => f.write_str("timebase already initialized"),
            TimebaseError::CapacityExceeded => f.write_str("slot table capacity exceeded"),
            TimebaseError::InvalidPeriod => {
                f.write_str("period must be a positive multiple of the base time")
            }
            TimebaseError::TableFull => f.write_str("no free timer slot"),
            TimebaseError::InvalidHandle => f.write_str("invalid timer handle"),
        }
    }
}

/// Receives expired tasks during [`Timebase::tick`].
///
/// The handler gets mutable access to the scheduler so it can register or
/// cancel other timers. Slots registered from inside a handler stay pending
/// until the following tick.
pub trait TimeoutHandler<T, const N: usize> {
    fn on_timeout(&mut self, task: T, timebase: &mut Timebase<T, N>) -> Reschedule;
}

#[derive(Clone, Copy, Debug)]
struct Slot<T> {
    state: SlotState,
    interval: u16,
    elapsed: u16,
    running: bool,
    task: Option<T>,
}

impl<T> Slot<T> {
    const fn free() -> Self {
        Self {
            state: SlotState::Free,
            interval: 0,
            elapsed: 0,
            running: false,
            task: None,
        }
    }

    fn commit(&mut self) {
        match self.state {
            SlotState::PendingRegister => self.state = SlotState::Active,
            SlotState::PendingUnregister => *self = Self::free(),
            SlotState::Free | SlotState::Active => {}
        }
    }
}

/// Read-only view of an occupied slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotInfo<T> {
    pub handle: Handle,
    pub state: SlotState,
    pub interval_ticks: u16,
    pub elapsed_ticks: u16,
    pub running: bool,
    pub task: T,
}

/// Fixed-capacity timer table. `N` is the compile-time upper bound on slots;
/// the runtime capacity is chosen by [`Timebase::init`].
pub struct Timebase<T, const N: usize> {
    base: Option<BaseTime>,
    slots: Vec<Slot<T>, N>,
    live: usize,
    now_ms: u32,
}

impl<T, const N: usize> Timebase<T, N>
where
    T: Copy,
{
    /// Creates an uninitialized scheduler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: None,
            slots: Vec::new(),
            live: 0,
            now_ms: 0,
        }
    }

    /// Configures the tick period and allocates `max_slots` free slots.
    ///
    /// # Errors
    ///
    /// Fails when called twice or when `max_slots` exceeds `N`.
    pub fn init(&mut self, base: BaseTime, max_slots: usize) -> Result<(), TimebaseError> {
        if self.base.is_some() {
            warn!("timebase init: already initialized");
            return Err(TimebaseError::AlreadyInitialized);
        }

        if max_slots > N {
            warn!("timebase init: {=usize} slots requested, {=usize} available", max_slots, N);
            return Err(TimebaseError::CapacityExceeded);
        }

        self.slots.clear();
        for _ in 0..max_slots {
            self.slots
                .push(Slot::free())
                .map_err(|_| TimebaseError::CapacityExceeded)?;
        }
        self.live = 0;
        self.now_ms = 0;
        self.base = Some(base);
        Ok(())
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.base.is_some()
    }

    /// Number of slots allocated by `init`.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently active or waiting to become active.
    #[must_use]
    pub const fn live_count(&self) -> usize {
        self.live
    }

    /// Milliseconds accumulated since `init`, advanced once per tick.
    #[must_use]
    pub const fn time_ms(&self) -> u32 {
        self.now_ms
    }

    /// Configured tick period.
    ///
    /// # Errors
    ///
    /// Returns [`TimebaseError::NotInitialized`] before `init`.
    pub fn base_time_ms(&self) -> Result<u16, TimebaseError> {
        self.require_base().map(BaseTime::as_millis)
    }

    /// Claims a free slot for `task`, first due `period_ms` from now.
    ///
    /// # Errors
    ///
    /// Fails before `init`, when the period is not a positive multiple of
    /// the base time, or when every slot is taken.
    pub fn register(&mut self, task: T, period_ms: u16) -> Result<Handle, TimebaseError> {
        let base = self.require_base()?.as_millis();

        let interval = period_ms / base;
        if interval == 0 || period_ms % base != 0 {
            warn!(
                "timebase register: {=u16} ms is not a multiple of the {=u16} ms base",
                period_ms,
                base
            );
            return Err(TimebaseError::InvalidPeriod);
        }

        let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.state == SlotState::Free)
        else {
            warn!("timebase register: no free slot, increase the table size");
            return Err(TimebaseError::TableFull);
        };

        let handle = Handle::from_index(index).ok_or(TimebaseError::TableFull)?;
        self.slots[index] = Slot {
            state: SlotState::PendingRegister,
            interval,
            elapsed: 0,
            running: true,
            task: Some(task),
        };
        self.live += 1;
        Ok(handle)
    }

    /// Releases the slot at the next tick boundary.
    ///
    /// # Errors
    ///
    /// Fails before `init` or when the handle does not name a live slot.
    pub fn unregister(&mut self, handle: Handle) -> Result<(), TimebaseError> {
        let slot = self.live_slot_mut(handle)?;
        slot.state = SlotState::PendingUnregister;
        self.live -= 1;
        Ok(())
    }

    /// Restarts the countdown of a live slot.
    ///
    /// # Errors
    ///
    /// Fails before `init` or when the handle does not name a live slot.
    pub fn reset_timeout(&mut self, handle: Handle) -> Result<(), TimebaseError> {
        self.live_slot_mut(handle)?.elapsed = 0;
        Ok(())
    }

    /// Pauses a live slot; elapsed ticks are kept.
    ///
    /// # Errors
    ///
    /// Fails before `init` or when the handle does not name a live slot.
    pub fn stop_timeout(&mut self, handle: Handle) -> Result<(), TimebaseError> {
        self.live_slot_mut(handle)?.running = false;
        Ok(())
    }

    /// Resumes a paused slot from where it stopped.
    ///
    /// # Errors
    ///
    /// Fails before `init` or when the handle does not name a live slot.
    pub fn start_timeout(&mut self, handle: Handle) -> Result<(), TimebaseError> {
        self.live_slot_mut(handle)?.running = true;
        Ok(())
    }

    /// Iterates over every non-free slot in table order.
    pub fn occupied(&self) -> impl Iterator<Item = SlotInfo<T>> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let task = slot.task?;
            if slot.state == SlotState::Free {
                return None;
            }
            Some(SlotInfo {
                handle: Handle::from_index(index)?,
                state: slot.state,
                interval_ticks: slot.interval,
                elapsed_ticks: slot.elapsed,
                running: slot.running,
                task,
            })
        })
    }

    /// Runs one tick: advance the clock, commit pending slot transitions,
    /// then dispatch every due task in table order.
    ///
    /// Does nothing before `init`.
    pub fn tick<H>(&mut self, handler: &mut H)
    where
        H: TimeoutHandler<T, N>,
    {
        let Some(base) = self.base else {
            return;
        };
        let base = base.as_millis();
        self.now_ms = self.now_ms.wrapping_add(u32::from(base));

        for slot in &mut self.slots {
            slot.commit();
        }

        let active = self
            .slots
            .iter()
            .filter(|slot| slot.state == SlotState::Active)
            .count();

        let mut found = 0;
        let mut index = 0;
        while found < active && index < self.slots.len() {
            let slot = &mut self.slots[index];
            index += 1;

            if slot.state != SlotState::Active {
                continue;
            }
            found += 1;

            if !slot.running {
                continue;
            }

            slot.elapsed = slot.elapsed.saturating_add(1);
            if slot.elapsed < slot.interval {
                continue;
            }
            slot.elapsed = 0;

            let Some(task) = slot.task else {
                continue;
            };
            let decision = handler.on_timeout(task, self);
            self.apply(index - 1, decision, base);
        }
    }

    fn apply(&mut self, index: usize, decision: Reschedule, base: u16) {
        let slot = &mut self.slots[index];
        // The handler may have unregistered its own slot already.
        if slot.state != SlotState::Active {
            return;
        }

        let interval = match decision {
            Reschedule::After(millis) => millis / base,
            Reschedule::Cancel => 0,
        };

        if interval == 0 {
            slot.state = SlotState::PendingUnregister;
            self.live -= 1;
        } else {
            slot.interval = interval;
        }
    }

    fn require_base(&self) -> Result<BaseTime, TimebaseError> {
        self.base.ok_or_else(|| {
            warn!("timebase: init missing");
            TimebaseError::NotInitialized
        })
    }

    fn live_slot_mut(&mut self, handle: Handle) -> Result<&mut Slot<T>, TimebaseError> {
        self.require_base()?;
        match self.slots.get_mut(handle.index()) {
            Some(slot) if slot.state.is_live() => Ok(slot),
            _ => {
                warn!("timebase: invalid handle {=u8}", handle.get());
                Err(TimebaseError::InvalidHandle)
            }
        }
    }
}

impl<T, const N: usize> Default for Timebase<T, N>
where
    T: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}
