//! Debounced push buttons.
//!
//! Buttons are active low. On the first level change the debouncer reports
//! the change, ignores further edges for [`DEBOUNCE_MS`] and then re-reads
//! the latest levels through a one-shot timebase task.

use core::fmt;

use heapless::Vec;

use crate::diag::warn;
use crate::timebase::{Handle, Timebase, TimebaseError};

/// Quiet period after a reported change.
pub const DEBOUNCE_MS: u16 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    Red,
    Green,
    Blue,
}

impl Button {
    pub const ALL: [Button; 3] = [Button::Red, Button::Green, Button::Blue];

    /// Bit carrying this button's level in a levels byte.
    #[must_use]
    pub const fn mask(self) -> u8 {
        match self {
            Button::Red => 0b001,
            Button::Green => 0b010,
            Button::Blue => 0b100,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Button::Red => "red",
            Button::Green => "green",
            Button::Blue => "blue",
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|button| button.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Levels byte with every button released (pulled high).
pub const ALL_RELEASED: u8 = Button::Red.mask() | Button::Green.mask() | Button::Blue.mask();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonEvent {
    pub button: Button,
    pub pressed: bool,
}

pub type ButtonEvents = Vec<ButtonEvent, 3>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonError {
    /// The timebase has to be running before the debouncer starts.
    TimebaseMissing,
    AlreadyInitialized,
}

impl fmt::Display for ButtonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonError::TimebaseMissing => f.write_str("timebase must be initialized first"),
            ButtonError::AlreadyInitialized => f.write_str("buttons already initialized"),
        }
    }
}

/// Edge debouncer for the three buttons.
#[derive(Debug)]
pub struct ButtonDebouncer {
    initialized: bool,
    reported: u8,
    latest: u8,
    armed: bool,
    quiet: Option<Handle>,
}

impl ButtonDebouncer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initialized: false,
            reported: ALL_RELEASED,
            latest: ALL_RELEASED,
            armed: false,
            quiet: None,
        }
    }

    /// Starts watching from the given levels.
    ///
    /// # Errors
    ///
    /// Fails when the timebase is not running or when called twice.
    pub fn init<T, const N: usize>(
        &mut self,
        levels: u8,
        timebase: &Timebase<T, N>,
    ) -> Result<(), ButtonError>
    where
        T: Copy,
    {
        if !timebase.is_initialized() {
            warn!("buttons: timebase must be initialized first");
            return Err(ButtonError::TimebaseMissing);
        }
        if self.initialized {
            return Err(ButtonError::AlreadyInitialized);
        }

        self.reported = levels & ALL_RELEASED;
        self.latest = self.reported;
        self.armed = true;
        self.initialized = true;
        Ok(())
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// `true` while edges are being reported (not in the quiet period).
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Handle of the one-shot ending the current quiet period.
    #[must_use]
    pub const fn quiet_timer(&self) -> Option<Handle> {
        self.quiet
    }

    /// Current level of a button as last sampled.
    #[must_use]
    pub const fn is_pressed(&self, button: Button) -> bool {
        self.latest & button.mask() == 0
    }

    /// Pin-change entry point. `task` is registered as the one-shot that
    /// ends the quiet period.
    pub fn on_levels<T, const N: usize>(
        &mut self,
        levels: u8,
        timebase: &mut Timebase<T, N>,
        task: T,
    ) -> ButtonEvents
    where
        T: Copy,
    {
        self.latest = levels & ALL_RELEASED;
        if !self.initialized || !self.armed {
            return ButtonEvents::new();
        }
        self.evaluate(timebase, task)
    }

    /// Ends the quiet period and reports whatever changed during it.
    pub fn on_quiet_elapsed<T, const N: usize>(
        &mut self,
        timebase: &mut Timebase<T, N>,
        task: T,
    ) -> ButtonEvents
    where
        T: Copy,
    {
        self.quiet = None;
        self.armed = true;
        self.evaluate(timebase, task)
    }

    fn evaluate<T, const N: usize>(&mut self, timebase: &mut Timebase<T, N>, task: T) -> ButtonEvents
    where
        T: Copy,
    {
        let mut events = ButtonEvents::new();
        let changes = self.latest ^ self.reported;
        if changes == 0 {
            return events;
        }

        for button in Button::ALL {
            if changes & button.mask() != 0 {
                let pressed = self.latest & button.mask() == 0;
                // Three buttons, three slots.
                let _ = events.push(ButtonEvent { button, pressed });
            }
        }
        self.reported = self.latest;

        match timebase.register(task, DEBOUNCE_MS) {
            Ok(handle) => {
                self.quiet = Some(handle);
                self.armed = false;
            }
            Err(error) => report_rearm_failure(error),
        }
        events
    }
}

impl Default for ButtonDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

fn report_rearm_failure(error: TimebaseError) {
    warn!("buttons: debounce timer unavailable: {}", error);
}
