//! Robot context tying the scheduler to its consumers.
//!
//! [`DiscBot`] owns the timebase and everything that registers timers on it.
//! Interrupt-level inputs (timer tick, encoder edges, button levels, colour
//! frames, range readings, card scans) enter through its methods; finished
//! maneuvers and debounced button changes are queued for the application
//! loop to drain.

use core::fmt;

use heapless::Vec;

use crate::button::{ButtonDebouncer, ButtonError, ButtonEvent, ButtonEvents};
use crate::color::{ColorClassifier, ColorError, ColorFrame, ColorReport, ColorSampler};
use crate::diag::warn;
use crate::lights::{CarLight, CarLights, Indicator, LampFrame, LightBar};
use crate::motion::{MotionController, MotionError, MotorDriver, REGULATION_PERIOD_MS, Wheel};
use crate::range::{RangeError, RangeEvent, RangeFinder, RangeSampler, RangeSensors, Readings};
use crate::rfid::{CardError, CardReader, CardRegistry, CardUid};
use crate::storage::NvStore;
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder};
use crate::timebase::{BaseTime, Reschedule, Timebase, TimeoutHandler, TimebaseError};
use crate::tune::{Note, PlayMode, Speaker, TunePlayer};

/// Default number of timer slots. Every task can hold one at a time.
pub const DEFAULT_SLOTS: usize = 8;

const COMPLETION_QUEUE: usize = 4;
const BUTTON_QUEUE: usize = 6;

/// Timer owners. Each registered slot carries one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Task {
    Regulate,
    ButtonDebounce,
    ColorMeasure,
    RangeMeasure,
    CardDetect,
    TuneStep,
    IndicatorBlink,
}

impl Task {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Task::Regulate => "regulate",
            Task::ButtonDebounce => "debounce",
            Task::ColorMeasure => "color",
            Task::RangeMeasure => "range",
            Task::CardDetect => "rfid",
            Task::TuneStep => "tune",
            Task::IndicatorBlink => "indicator",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Completion token for brakes and maneuvers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionDone {
    Move,
    Rotate,
    Brake,
    BrakeLeft,
    BrakeRight,
}

impl MotionDone {
    pub const ALL: [MotionDone; 5] = [
        MotionDone::Move,
        MotionDone::Rotate,
        MotionDone::Brake,
        MotionDone::BrakeLeft,
        MotionDone::BrakeRight,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            MotionDone::Move => "move",
            MotionDone::Rotate => "rotate",
            MotionDone::Brake => "brake",
            MotionDone::BrakeLeft => "brake-left",
            MotionDone::BrakeRight => "brake-right",
        }
    }

    const fn for_wheel(wheel: Wheel) -> Self {
        match wheel {
            Wheel::Left => MotionDone::BrakeLeft,
            Wheel::Right => MotionDone::BrakeRight,
        }
    }
}

impl fmt::Display for MotionDone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BotError {
    Timebase(TimebaseError),
    Motion(MotionError),
    Color(ColorError),
    Button(ButtonError),
    Range(RangeError),
    Card(CardError),
}

impl BotError {
    /// The scheduler failure behind this error, if any.
    #[must_use]
    pub const fn timer_error(self) -> Option<TimebaseError> {
        match self {
            BotError::Timebase(error)
            | BotError::Color(ColorError::Timebase(error))
            | BotError::Range(RangeError::Timebase(error))
            | BotError::Card(CardError::Timebase(error)) => Some(error),
            _ => None,
        }
    }
}

impl From<TimebaseError> for BotError {
    fn from(error: TimebaseError) -> Self {
        Self::Timebase(error)
    }
}

impl From<MotionError> for BotError {
    fn from(error: MotionError) -> Self {
        Self::Motion(error)
    }
}

impl From<ColorError> for BotError {
    fn from(error: ColorError) -> Self {
        Self::Color(error)
    }
}

impl From<ButtonError> for BotError {
    fn from(error: ButtonError) -> Self {
        Self::Button(error)
    }
}

impl From<RangeError> for BotError {
    fn from(error: RangeError) -> Self {
        Self::Range(error)
    }
}

impl From<CardError> for BotError {
    fn from(error: CardError) -> Self {
        Self::Card(error)
    }
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotError::Timebase(error) => write!(f, "timebase: {error}"),
            BotError::Motion(error) => fmt::Display::fmt(error, f),
            BotError::Color(error) => write!(f, "colors: {error}"),
            BotError::Button(error) => write!(f, "buttons: {error}"),
            BotError::Range(error) => write!(f, "range: {error}"),
            BotError::Card(error) => write!(f, "rfid: {error}"),
        }
    }
}

/// Body-mounted extras: rangefinders, card reader, loudspeaker and the
/// corner LEDs.
pub trait Accessories: RangeSampler + CardReader + Speaker + LightBar {}

impl<A: RangeSampler + CardReader + Speaker + LightBar> Accessories for A {}

/// Stand-in for a robot without accessories.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAccessories;

impl RangeSampler for NoAccessories {
    fn ping(&mut self, _sensors: RangeSensors) {}
}

impl CardReader for NoAccessories {
    fn scan(&mut self) {}
}

impl Speaker for NoAccessories {
    fn sound(&mut self, _hz: u16) {}

    fn mute(&mut self) {}
}

impl LightBar for NoAccessories {
    fn show(&mut self, _frame: &LampFrame) {}
}

/// Everything except the timebase; receives timer expirations.
pub struct Parts<M, S, C, A> {
    pub motion: MotionController<M, MotionDone>,
    pub buttons: ButtonDebouncer,
    pub colors: ColorClassifier,
    pub ranges: RangeFinder,
    pub cards: CardRegistry,
    pub tunes: TunePlayer,
    pub lights: CarLights,
    pub telemetry: TelemetryRecorder,
    pub store: S,
    pub sampler: C,
    pub accessories: A,
    completions: Vec<MotionDone, COMPLETION_QUEUE>,
    button_events: Vec<ButtonEvent, BUTTON_QUEUE>,
}

impl<M, S, C, A> Parts<M, S, C, A>
where
    M: MotorDriver,
{
    fn queue_completion(&mut self, done: MotionDone, now_ms: u32) {
        self.telemetry.record(
            TelemetryEventKind::MotionDone(done),
            TelemetryPayload::None,
            now_ms,
        );
        if self.completions.push(done).is_err() {
            warn!("robot: completion queue full, {} dropped", done);
        }
    }

    fn queue_button_events(&mut self, events: ButtonEvents, now_ms: u32) {
        for event in events {
            let kind = if event.pressed {
                TelemetryEventKind::ButtonPressed(event.button)
            } else {
                TelemetryEventKind::ButtonReleased(event.button)
            };
            self.telemetry.record(kind, TelemetryPayload::None, now_ms);
            if self.button_events.push(event).is_err() {
                warn!("robot: button queue full");
            }
        }
    }
}

impl<M, S, C, A, const N: usize> TimeoutHandler<Task, N> for Parts<M, S, C, A>
where
    M: MotorDriver,
    C: ColorSampler,
    A: Accessories,
{
    fn on_timeout(&mut self, task: Task, timebase: &mut Timebase<Task, N>) -> Reschedule {
        let now_ms = timebase.time_ms();
        match task {
            Task::Regulate => {
                for done in self.motion.regulate() {
                    self.queue_completion(done, now_ms);
                }
                Reschedule::After(REGULATION_PERIOD_MS)
            }
            Task::ButtonDebounce => {
                let events = self.buttons.on_quiet_elapsed(timebase, Task::ButtonDebounce);
                self.queue_button_events(events, now_ms);
                Reschedule::Cancel
            }
            Task::ColorMeasure => self.colors.on_measure_elapsed(&mut self.sampler),
            Task::RangeMeasure => self.ranges.on_measure_elapsed(&mut self.accessories),
            Task::CardDetect => self.cards.on_detect_elapsed(&mut self.accessories),
            Task::TuneStep => {
                let playing = self.tunes.is_playing();
                let decision = self.tunes.on_step(&mut self.accessories);
                if playing && !self.tunes.is_playing() {
                    self.telemetry.record(
                        TelemetryEventKind::TuneFinished,
                        TelemetryPayload::None,
                        now_ms,
                    );
                }
                decision
            }
            Task::IndicatorBlink => self.lights.on_blink(&mut self.accessories),
        }
    }
}

/// The robot: scheduler, drivetrain, sensors and accessories.
pub struct DiscBot<M, S, C, A = NoAccessories, const SLOTS: usize = DEFAULT_SLOTS> {
    timebase: Timebase<Task, SLOTS>,
    parts: Parts<M, S, C, A>,
}

impl<M, S, C, A, const SLOTS: usize> DiscBot<M, S, C, A, SLOTS>
where
    M: MotorDriver,
    S: NvStore,
    C: ColorSampler,
    A: Accessories,
{
    #[must_use]
    pub const fn new(driver: M, store: S, sampler: C, accessories: A) -> Self {
        Self {
            timebase: Timebase::new(),
            parts: Parts {
                motion: MotionController::new(driver),
                buttons: ButtonDebouncer::new(),
                colors: ColorClassifier::new(),
                ranges: RangeFinder::new(),
                cards: CardRegistry::new(),
                tunes: TunePlayer::new(),
                lights: CarLights::new(),
                telemetry: TelemetryRecorder::new(),
                store,
                sampler,
                accessories,
                completions: Vec::new(),
                button_events: Vec::new(),
            },
        }
    }

    /// Starts the timebase and brings up every consumer in dependency
    /// order. `button_levels` is the initial levels byte of the buttons.
    ///
    /// # Errors
    ///
    /// Stops at the first component that fails to come up.
    pub fn init(&mut self, base: BaseTime, button_levels: u8) -> Result<(), BotError> {
        self.timebase.init(base, SLOTS)?;
        let parts = &mut self.parts;
        parts
            .motion
            .init(&mut parts.store, &mut self.timebase, Task::Regulate)?;
        parts.colors.load(&mut parts.store);
        parts.cards.load(&mut parts.store);
        parts.buttons.init(button_levels, &self.timebase)?;
        parts.lights.refresh(&mut parts.accessories);
        Ok(())
    }

    /// Hardware tick entry point.
    pub fn tick(&mut self) {
        self.timebase.tick(&mut self.parts);
    }

    /// Encoder edge entry point.
    pub fn on_encoder_pulse(&mut self, wheel: Wheel) {
        self.parts.motion.on_encoder_pulse(wheel);
    }

    /// Button pin-change entry point.
    pub fn on_button_levels(&mut self, levels: u8) {
        let now_ms = self.timebase.time_ms();
        let events =
            self.parts
                .buttons
                .on_levels(levels, &mut self.timebase, Task::ButtonDebounce);
        self.parts.queue_button_events(events, now_ms);
    }

    /// Finished colour conversion.
    pub fn on_color_frame(&mut self, frame: ColorFrame) -> ColorReport {
        let report = self.parts.colors.update(frame);
        if report.changed {
            self.record(
                TelemetryEventKind::ColorChanged,
                TelemetryPayload::Colors(report.classification.indexes),
            );
        }
        report
    }

    /// Drains finished brakes and maneuvers, oldest first.
    pub fn take_completions(&mut self) -> Vec<MotionDone, COMPLETION_QUEUE> {
        core::mem::take(&mut self.parts.completions)
    }

    /// Drains debounced button changes, oldest first.
    pub fn take_button_events(&mut self) -> Vec<ButtonEvent, BUTTON_QUEUE> {
        core::mem::take(&mut self.parts.button_events)
    }

    /// # Errors
    ///
    /// See [`MotionController::move_distance`].
    pub fn move_distance(&mut self, distance_mm: u16, speed_cmps: i16) -> Result<(), BotError> {
        self.parts
            .motion
            .move_distance(distance_mm, speed_cmps, MotionDone::Move)?;
        Ok(())
    }

    /// # Errors
    ///
    /// See [`MotionController::rotate`].
    pub fn rotate(&mut self, angle_deg: i16, speed_cmps: u8) -> Result<(), BotError> {
        self.parts
            .motion
            .rotate(angle_deg, speed_cmps, MotionDone::Rotate)?;
        Ok(())
    }

    /// Brakes both wheels, or one when `wheel` is given.
    ///
    /// # Errors
    ///
    /// See [`MotionController::brake`].
    pub fn brake(&mut self, wheel: Option<Wheel>) -> Result<(), BotError> {
        match wheel {
            Some(wheel) => self
                .parts
                .motion
                .brake_single(wheel, MotionDone::for_wheel(wheel))?,
            None => self.parts.motion.brake(MotionDone::Brake)?,
        }
        Ok(())
    }

    /// Stores and applies a new wheel circumference.
    ///
    /// # Errors
    ///
    /// Rejects values outside the calibration range.
    pub fn set_wheel_circumference(&mut self, circumference_mm: u16) -> Result<(), BotError> {
        let parts = &mut self.parts;
        parts
            .motion
            .set_wheel_circumference(circumference_mm, &mut parts.store)?;
        self.record(
            TelemetryEventKind::CircumferenceChanged,
            TelemetryPayload::CircumferenceMm(circumference_mm),
        );
        Ok(())
    }

    /// Learns the last received frame as a reference colour.
    ///
    /// # Errors
    ///
    /// Fails without a frame or with a full reference table.
    pub fn learn_color(&mut self) -> Result<u8, BotError> {
        let parts = &mut self.parts;
        let index = parts.colors.learn_last_frame(&mut parts.store)?;
        self.record(
            TelemetryEventKind::ColorLearned,
            TelemetryPayload::Reference(index),
        );
        Ok(index)
    }

    pub fn clear_colors(&mut self) {
        let parts = &mut self.parts;
        parts.colors.clear_references(&mut parts.store);
        self.record(TelemetryEventKind::ColorsCleared, TelemetryPayload::None);
    }

    /// Triggers a colour conversion every `period_ms`.
    ///
    /// # Errors
    ///
    /// Rejects periods the classifier or timebase cannot run at.
    pub fn start_measuring(&mut self, period_ms: u16) -> Result<(), BotError> {
        match self
            .parts
            .colors
            .start_measuring(period_ms, &mut self.timebase, Task::ColorMeasure)
        {
            Ok(period) => {
                self.record(
                    TelemetryEventKind::MeasureStarted,
                    TelemetryPayload::PeriodMs(period),
                );
                Ok(())
            }
            Err(ColorError::Timebase(error)) => {
                self.record(
                    TelemetryEventKind::TimerRejected,
                    TelemetryPayload::Timer(error),
                );
                Err(ColorError::Timebase(error).into())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// # Errors
    ///
    /// Propagates a timebase failure while releasing the schedule.
    pub fn stop_measuring(&mut self) -> Result<(), BotError> {
        let running = self.parts.colors.measuring_period().is_some();
        self.parts.colors.stop_measuring(&mut self.timebase)?;
        if running {
            self.record(TelemetryEventKind::MeasureStopped, TelemetryPayload::None);
        }
        Ok(())
    }

    /// Requests one reading from `sensors`; the result is reported as a
    /// [`RangeEvent::Ready`] once every selected kind has answered.
    ///
    /// # Errors
    ///
    /// Rejects an empty selection.
    pub fn measure_range(&mut self, sensors: RangeSensors) -> Result<(), BotError> {
        let parts = &mut self.parts;
        parts
            .ranges
            .measure_once(sensors, &mut self.timebase, &mut parts.accessories)
            .map_err(|error| self.reject(error.into()))
    }

    /// Pings `sensors` every `period_ms` and reports changed distances.
    ///
    /// # Errors
    ///
    /// Rejects an empty selection and periods the timebase cannot run at.
    pub fn start_ranging(&mut self, sensors: RangeSensors, period_ms: u16) -> Result<(), BotError> {
        self.parts
            .ranges
            .start_measuring(sensors, period_ms, &mut self.timebase, Task::RangeMeasure)
            .map(|_| ())
            .map_err(|error| self.reject(error.into()))
    }

    /// # Errors
    ///
    /// Propagates a timebase failure while releasing the schedule.
    pub fn stop_ranging(&mut self) -> Result<(), BotError> {
        self.parts.ranges.stop_measuring(&mut self.timebase)?;
        Ok(())
    }

    /// Finished ultrasonic readings in millimetres, indexed by side.
    pub fn on_ultrasonic(&mut self, echoes_mm: Readings) -> Option<RangeEvent> {
        let event = self.parts.ranges.on_ultrasonic(echoes_mm);
        self.record_range(event);
        event
    }

    /// Finished infrared readings in millivolts, indexed by side.
    pub fn on_infrared(&mut self, samples_mv: Readings) -> Option<RangeEvent> {
        let event = self.parts.ranges.on_infrared(samples_mv);
        self.record_range(event);
        event
    }

    fn record_range(&mut self, event: Option<RangeEvent>) {
        match event {
            Some(RangeEvent::Ready(distances)) => self.record(
                TelemetryEventKind::RangeReady,
                TelemetryPayload::Distances(distances),
            ),
            Some(RangeEvent::Changed(distances)) => self.record(
                TelemetryEventKind::RangeChanged,
                TelemetryPayload::Distances(distances),
            ),
            None => {}
        }
    }

    /// Scans for cards every `period_ms`.
    ///
    /// # Errors
    ///
    /// Rejects periods the timebase cannot run at.
    pub fn start_card_detection(&mut self, period_ms: u16) -> Result<(), BotError> {
        self.parts
            .cards
            .start_detecting(period_ms, &mut self.timebase, Task::CardDetect)
            .map(|_| ())
            .map_err(|error| self.reject(error.into()))
    }

    /// # Errors
    ///
    /// Propagates a timebase failure while releasing the schedule.
    pub fn stop_card_detection(&mut self) -> Result<(), BotError> {
        self.parts.cards.stop_detecting(&mut self.timebase)?;
        Ok(())
    }

    /// Card reader result. Returns the UID of a newly arrived card.
    pub fn on_card_scan(&mut self, uid: Option<CardUid>) -> Option<CardUid> {
        let arrived = self.parts.cards.on_scan(uid)?;
        let index = self.parts.cards.index_of(arrived);
        self.record(
            TelemetryEventKind::CardDetected,
            TelemetryPayload::Card {
                uid: arrived,
                index,
            },
        );
        Some(arrived)
    }

    /// Stores the card on the reader and returns its index.
    ///
    /// # Errors
    ///
    /// Fails without a card, for a known card and with a full table.
    pub fn register_card(&mut self) -> Result<u8, BotError> {
        let parts = &mut self.parts;
        let index = parts.cards.register_present(&mut parts.store)?;
        let uid = parts.cards.uid_of(index).unwrap_or_default();
        self.record(
            TelemetryEventKind::CardRegistered,
            TelemetryPayload::Card {
                uid,
                index: Some(index),
            },
        );
        Ok(index)
    }

    pub fn clear_cards(&mut self) {
        let parts = &mut self.parts;
        parts.cards.clear(&mut parts.store);
        self.record(TelemetryEventKind::CardsCleared, TelemetryPayload::None);
    }

    /// Plays `notes`, replacing the current tune.
    ///
    /// # Errors
    ///
    /// Fails when the stepping task cannot be scheduled.
    pub fn play(
        &mut self,
        notes: &'static [Note],
        mode: PlayMode,
        repeat: bool,
    ) -> Result<(), BotError> {
        let parts = &mut self.parts;
        parts
            .tunes
            .play(
                notes,
                mode,
                repeat,
                &mut self.timebase,
                Task::TuneStep,
                &mut parts.accessories,
            )
            .map_err(|error| self.reject(error.into()))
    }

    /// # Errors
    ///
    /// Propagates a timebase failure while releasing the stepping task.
    pub fn stop_tune(&mut self) -> Result<(), BotError> {
        let parts = &mut self.parts;
        parts
            .tunes
            .stop(&mut self.timebase, &mut parts.accessories)?;
        Ok(())
    }

    /// Sounds a steady tone over a paused tune.
    ///
    /// # Errors
    ///
    /// Propagates a timebase failure while pausing the tune.
    pub fn buzz(&mut self, hz: u16) -> Result<(), BotError> {
        let parts = &mut self.parts;
        parts
            .tunes
            .buzz(hz, &mut self.timebase, &mut parts.accessories)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates a timebase failure while resuming the tune.
    pub fn quiet(&mut self) -> Result<(), BotError> {
        let parts = &mut self.parts;
        parts
            .tunes
            .quiet(&mut self.timebase, &mut parts.accessories)?;
        Ok(())
    }

    pub fn set_light(&mut self, light: CarLight, on: bool) {
        let parts = &mut self.parts;
        parts.lights.set(light, on, &mut parts.accessories);
    }

    /// # Errors
    ///
    /// Fails when the blink task cannot be scheduled; the indicator is
    /// left off.
    pub fn set_indicator(&mut self, indicator: Indicator) -> Result<(), BotError> {
        let parts = &mut self.parts;
        parts
            .lights
            .set_indicator(
                indicator,
                &mut self.timebase,
                Task::IndicatorBlink,
                &mut parts.accessories,
            )
            .map_err(|error| self.reject(error.into()))
    }

    #[must_use]
    pub const fn timebase(&self) -> &Timebase<Task, SLOTS> {
        &self.timebase
    }

    #[must_use]
    pub const fn motion(&self) -> &MotionController<M, MotionDone> {
        &self.parts.motion
    }

    /// Direct access for speed and direction commands.
    pub fn motion_mut(&mut self) -> &mut MotionController<M, MotionDone> {
        &mut self.parts.motion
    }

    #[must_use]
    pub const fn buttons(&self) -> &ButtonDebouncer {
        &self.parts.buttons
    }

    #[must_use]
    pub const fn colors(&self) -> &ColorClassifier {
        &self.parts.colors
    }

    pub fn colors_mut(&mut self) -> &mut ColorClassifier {
        &mut self.parts.colors
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.parts.telemetry
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.parts.store
    }

    pub fn sampler_mut(&mut self) -> &mut C {
        &mut self.parts.sampler
    }

    #[must_use]
    pub const fn ranges(&self) -> &RangeFinder {
        &self.parts.ranges
    }

    #[must_use]
    pub const fn cards(&self) -> &CardRegistry {
        &self.parts.cards
    }

    #[must_use]
    pub const fn tunes(&self) -> &TunePlayer {
        &self.parts.tunes
    }

    #[must_use]
    pub const fn lights(&self) -> &CarLights {
        &self.parts.lights
    }

    #[must_use]
    pub const fn accessories(&self) -> &A {
        &self.parts.accessories
    }

    pub fn accessories_mut(&mut self) -> &mut A {
        &mut self.parts.accessories
    }

    fn record(&mut self, kind: TelemetryEventKind, payload: TelemetryPayload) {
        let now_ms = self.timebase.time_ms();
        self.parts.telemetry.record(kind, payload, now_ms);
    }

    /// Logs scheduler refusals before handing the error back.
    fn reject(&mut self, error: BotError) -> BotError {
        if let Some(timer) = error.timer_error() {
            self.record(
                TelemetryEventKind::TimerRejected,
                TelemetryPayload::Timer(timer),
            );
        }
        error
    }
}
