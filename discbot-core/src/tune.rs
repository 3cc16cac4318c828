//! Loudspeaker tunes and the buzzer.
//!
//! A tune is a slice of [`Note`]s stepped by a timebase task every
//! [`STEP_MS`]. Note lengths count steps. The play mode decides how long
//! each note actually sounds before the speaker goes quiet for the rest of
//! its length.

use crate::timebase::{Handle, Reschedule, Timebase, TimebaseError};

/// Interval of the stepping task.
pub const STEP_MS: u16 = 50;

/// Note lengths in steps.
pub mod length {
    pub const WHOLE: u8 = 47;
    pub const HALF: u8 = 23;
    pub const QUARTER: u8 = 11;
    pub const EIGHTH: u8 = 5;
    pub const SIXTEENTH: u8 = 2;
    pub const ONE_SECOND: u8 = 20;
    pub const TWO_SECONDS: u8 = 40;
    pub const THREE_SECONDS: u8 = 60;
    pub const FIVE_SECONDS: u8 = 100;
    pub const TEN_SECONDS: u8 = 200;
}

/// Pitches in Hz.
pub mod pitch {
    pub const C4: u16 = 261;
    pub const D4: u16 = 294;
    pub const E4: u16 = 330;
    pub const F4: u16 = 349;
    pub const G4: u16 = 392;
    pub const A4: u16 = 440;
    pub const B4: u16 = 493;
    pub const C5: u16 = 523;
    pub const C6: u16 = 1047;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pitch {
    Rest,
    Hz(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Note {
    pub pitch: Pitch,
    /// Length in steps.
    pub steps: u8,
}

impl Note {
    #[must_use]
    pub const fn tone(hz: u16, steps: u8) -> Self {
        Self {
            pitch: Pitch::Hz(hz),
            steps,
        }
    }

    #[must_use]
    pub const fn rest(steps: u8) -> Self {
        Self {
            pitch: Pitch::Rest,
            steps,
        }
    }
}

use length::{EIGHTH, HALF, QUARTER, SIXTEENTH, WHOLE};
use pitch::{A4, C4, C5, C6, D4, E4, F4, G4};

pub static SONG: [Note; 24] = [
    Note::tone(C4, EIGHTH),
    Note::tone(D4, EIGHTH),
    Note::tone(E4, QUARTER),
    Note::tone(E4, EIGHTH),
    Note::tone(G4, EIGHTH),
    Note::tone(F4, QUARTER),
    Note::tone(F4, EIGHTH),
    Note::tone(A4, EIGHTH),
    Note::tone(G4, QUARTER),
    Note::tone(G4, EIGHTH),
    Note::tone(F4, EIGHTH),
    Note::tone(E4, HALF),
    Note::tone(G4, QUARTER),
    Note::tone(G4, EIGHTH),
    Note::tone(F4, EIGHTH),
    Note::tone(E4, QUARTER),
    Note::tone(E4, EIGHTH),
    Note::tone(G4, EIGHTH),
    Note::tone(F4, QUARTER),
    Note::tone(F4, EIGHTH),
    Note::tone(E4, EIGHTH),
    Note::tone(D4, QUARTER),
    Note::tone(G4, QUARTER),
    Note::tone(E4, WHOLE),
];

pub static SIREN: [Note; 2] = [Note::tone(C5, EIGHTH), Note::tone(C4, EIGHTH)];

pub static BEEP: [Note; 1] = [Note::tone(C6, EIGHTH)];

pub static BEEP_BEEP: [Note; 3] = [
    Note::tone(C6, SIXTEENTH),
    Note::rest(SIXTEENTH),
    Note::tone(C6, SIXTEENTH),
];

/// Built-in tunes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tune {
    Song,
    Siren,
    Beep,
    BeepBeep,
}

impl Tune {
    pub const ALL: [Tune; 4] = [Tune::Song, Tune::Siren, Tune::Beep, Tune::BeepBeep];

    #[must_use]
    pub fn notes(self) -> &'static [Note] {
        match self {
            Tune::Song => &SONG,
            Tune::Siren => &SIREN,
            Tune::Beep => &BEEP,
            Tune::BeepBeep => &BEEP_BEEP,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Tune::Song => "song",
            Tune::Siren => "siren",
            Tune::Beep => "beep",
            Tune::BeepBeep => "beepbeep",
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tune| tune.label().eq_ignore_ascii_case(label))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayMode {
    /// Each note sounds for its full length minus the final step.
    #[default]
    Regular,
    /// Each note sounds for the given number of steps only.
    Staccato(u8),
    /// Notes run into each other.
    Smooth,
}

impl PlayMode {
    /// Staccato lengths accepted from the console.
    pub const STACCATO_STEPS: core::ops::RangeInclusive<u8> = 1..=3;
    const SMOOTH_STEPS: u8 = 10;

    /// Step at which a note of `steps` goes quiet.
    const fn silence_at(self, steps: u8) -> u8 {
        match self {
            PlayMode::Regular => steps,
            PlayMode::Staccato(sounding) => sounding,
            PlayMode::Smooth => Self::SMOOTH_STEPS,
        }
    }
}

/// Tone output. `sound` replaces any tone already playing.
pub trait Speaker {
    fn sound(&mut self, hz: u16);
    fn mute(&mut self);
}

impl<P: Speaker + ?Sized> Speaker for &mut P {
    fn sound(&mut self, hz: u16) {
        (**self).sound(hz);
    }

    fn mute(&mut self) {
        (**self).mute();
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSpeaker;

impl Speaker for NoopSpeaker {
    fn sound(&mut self, _hz: u16) {}

    fn mute(&mut self) {}
}

#[derive(Clone, Copy, Debug)]
struct Playback {
    notes: &'static [Note],
    index: usize,
    mode: PlayMode,
    repeat: bool,
    elapsed: u8,
}

/// Tune stepping state plus the buzzer override.
#[derive(Debug, Default)]
pub struct TunePlayer {
    playback: Option<Playback>,
    handle: Option<Handle>,
    buzzing: Option<u16>,
}

impl TunePlayer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            playback: None,
            handle: None,
            buzzing: None,
        }
    }

    /// Starts `notes`, replacing whatever is playing. With `repeat` the
    /// tune loops until stopped. An empty tune only stops playback.
    ///
    /// # Errors
    ///
    /// Fails when the stepping task cannot be registered; the speaker is
    /// left quiet.
    pub fn play<T, P, const N: usize>(
        &mut self,
        notes: &'static [Note],
        mode: PlayMode,
        repeat: bool,
        timebase: &mut Timebase<T, N>,
        task: T,
        speaker: &mut P,
    ) -> Result<(), TimebaseError>
    where
        T: Copy,
        P: Speaker,
    {
        self.stop(timebase, speaker)?;
        let Some(first) = notes.first() else {
            return Ok(());
        };

        self.handle = Some(timebase.register(task, STEP_MS)?);
        start_note(*first, speaker);
        self.playback = Some(Playback {
            notes,
            index: 0,
            mode,
            repeat,
            elapsed: 0,
        });
        Ok(())
    }

    /// Stops playback and silences the speaker.
    ///
    /// # Errors
    ///
    /// Propagates a timebase failure while releasing the stepping task.
    pub fn stop<T, P, const N: usize>(
        &mut self,
        timebase: &mut Timebase<T, N>,
        speaker: &mut P,
    ) -> Result<(), TimebaseError>
    where
        T: Copy,
        P: Speaker,
    {
        self.playback = None;
        self.buzzing = None;
        speaker.mute();
        if let Some(handle) = self.handle.take() {
            timebase.unregister(handle)?;
        }
        Ok(())
    }

    /// Sounds a steady tone. A running tune holds its position until
    /// [`quiet`](Self::quiet).
    ///
    /// # Errors
    ///
    /// Propagates a timebase failure while pausing the tune.
    pub fn buzz<T, P, const N: usize>(
        &mut self,
        hz: u16,
        timebase: &mut Timebase<T, N>,
        speaker: &mut P,
    ) -> Result<(), TimebaseError>
    where
        T: Copy,
        P: Speaker,
    {
        if let Some(handle) = self.handle {
            timebase.stop_timeout(handle)?;
        }
        speaker.sound(hz);
        self.buzzing = Some(hz);
        Ok(())
    }

    /// Ends the buzzer tone and resumes a paused tune.
    ///
    /// # Errors
    ///
    /// Propagates a timebase failure while resuming the tune.
    pub fn quiet<T, P, const N: usize>(
        &mut self,
        timebase: &mut Timebase<T, N>,
        speaker: &mut P,
    ) -> Result<(), TimebaseError>
    where
        T: Copy,
        P: Speaker,
    {
        speaker.mute();
        self.buzzing = None;
        if let Some(handle) = self.handle {
            timebase.start_timeout(handle)?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.playback.is_some()
    }

    /// Buzzer tone in Hz while the buzzer is on.
    #[must_use]
    pub const fn buzzing(&self) -> Option<u16> {
        self.buzzing
    }

    /// Current note index and tune length.
    #[must_use]
    pub fn position(&self) -> Option<(usize, usize)> {
        self.playback
            .map(|playback| (playback.index, playback.notes.len()))
    }

    #[must_use]
    pub fn mode(&self) -> Option<PlayMode> {
        self.playback.map(|playback| playback.mode)
    }

    /// Timebase expiry of the stepping task. Cancels once the tune has
    /// ended without repeat.
    pub fn on_step<P: Speaker>(&mut self, speaker: &mut P) -> Reschedule {
        let Some(playback) = self.playback.as_mut() else {
            self.handle = None;
            return Reschedule::Cancel;
        };
        let Some(note) = playback.notes.get(playback.index).copied() else {
            self.playback = None;
            self.handle = None;
            return Reschedule::Cancel;
        };

        playback.elapsed = playback.elapsed.saturating_add(1);
        if playback.elapsed == playback.mode.silence_at(note.steps) {
            speaker.mute();
        } else if playback.elapsed > note.steps {
            playback.index += 1;
            playback.elapsed = 0;
            if playback.index >= playback.notes.len() {
                if !playback.repeat {
                    self.playback = None;
                    self.handle = None;
                    speaker.mute();
                    return Reschedule::Cancel;
                }
                playback.index = 0;
            }
            if let Some(next) = playback.notes.get(playback.index) {
                start_note(*next, speaker);
            }
        }
        Reschedule::After(STEP_MS)
    }
}

fn start_note<P: Speaker>(note: Note, speaker: &mut P) {
    match note.pitch {
        Pitch::Hz(hz) => speaker.sound(hz),
        Pitch::Rest => speaker.mute(),
    }
}
