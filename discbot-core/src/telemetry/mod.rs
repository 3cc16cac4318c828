//! Telemetry event catalog and the in-memory history of recent robot events.
//!
//! Events carry a compact numeric code for log transports and an optional
//! payload with the details the console needs. The recorder keeps the last
//! [`TELEMETRY_RING_CAPACITY`] records; readers follow along with a cursor
//! so nothing is consumed on read.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::button::Button;
use crate::color::SENSOR_COUNT;
use crate::range::Distances;
use crate::rfid::CardUid;
use crate::robot::MotionDone;
use crate::timebase::TimebaseError;

/// Sequential identifier assigned to each record.
pub type EventId = u32;

/// Timebase clock reading attached to a record.
pub type TimestampMillis = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEventKind {
    MotionDone(MotionDone),
    ButtonPressed(Button),
    ButtonReleased(Button),
    ColorChanged,
    ColorLearned,
    ColorsCleared,
    MeasureStarted,
    MeasureStopped,
    CircumferenceChanged,
    TimerRejected,
    RangeReady,
    RangeChanged,
    CardDetected,
    CardRegistered,
    CardsCleared,
    TuneFinished,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::MotionDone(done) => write!(f, "motion-done {done}"),
            TelemetryEventKind::ButtonPressed(button) => write!(f, "button-pressed {button}"),
            TelemetryEventKind::ButtonReleased(button) => write!(f, "button-released {button}"),
            TelemetryEventKind::ColorChanged => f.write_str("color-changed"),
            TelemetryEventKind::ColorLearned => f.write_str("color-learned"),
            TelemetryEventKind::ColorsCleared => f.write_str("colors-cleared"),
            TelemetryEventKind::MeasureStarted => f.write_str("measure-started"),
            TelemetryEventKind::MeasureStopped => f.write_str("measure-stopped"),
            TelemetryEventKind::CircumferenceChanged => f.write_str("circumference-changed"),
            TelemetryEventKind::TimerRejected => f.write_str("timer-rejected"),
            TelemetryEventKind::RangeReady => f.write_str("range-ready"),
            TelemetryEventKind::RangeChanged => f.write_str("range-changed"),
            TelemetryEventKind::CardDetected => f.write_str("card-detected"),
            TelemetryEventKind::CardRegistered => f.write_str("card-registered"),
            TelemetryEventKind::CardsCleared => f.write_str("cards-cleared"),
            TelemetryEventKind::TuneFinished => f.write_str("tune-finished"),
        }
    }
}

impl TelemetryEventKind {
    const MOTION_BASE: u16 = 0x0000;
    const PRESSED_BASE: u16 = 0x0008;
    const RELEASED_BASE: u16 = 0x000C;
    const COLOR_CHANGED_CODE: u16 = 0x0010;
    const COLOR_LEARNED_CODE: u16 = 0x0011;
    const COLORS_CLEARED_CODE: u16 = 0x0012;
    const MEASURE_STARTED_CODE: u16 = 0x0013;
    const MEASURE_STOPPED_CODE: u16 = 0x0014;
    const CIRCUMFERENCE_CODE: u16 = 0x0018;
    const TIMER_REJECTED_CODE: u16 = 0x0020;
    const RANGE_READY_CODE: u16 = 0x0030;
    const RANGE_CHANGED_CODE: u16 = 0x0031;
    const CARD_DETECTED_CODE: u16 = 0x0038;
    const CARD_REGISTERED_CODE: u16 = 0x0039;
    const CARDS_CLEARED_CODE: u16 = 0x003A;
    const TUNE_FINISHED_CODE: u16 = 0x0040;

    /// Compact discriminant used by log transports.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::MotionDone(done) => Self::MOTION_BASE + motion_index(done),
            TelemetryEventKind::ButtonPressed(button) => Self::PRESSED_BASE + button_index(button),
            TelemetryEventKind::ButtonReleased(button) => {
                Self::RELEASED_BASE + button_index(button)
            }
            TelemetryEventKind::ColorChanged => Self::COLOR_CHANGED_CODE,
            TelemetryEventKind::ColorLearned => Self::COLOR_LEARNED_CODE,
            TelemetryEventKind::ColorsCleared => Self::COLORS_CLEARED_CODE,
            TelemetryEventKind::MeasureStarted => Self::MEASURE_STARTED_CODE,
            TelemetryEventKind::MeasureStopped => Self::MEASURE_STOPPED_CODE,
            TelemetryEventKind::CircumferenceChanged => Self::CIRCUMFERENCE_CODE,
            TelemetryEventKind::TimerRejected => Self::TIMER_REJECTED_CODE,
            TelemetryEventKind::RangeReady => Self::RANGE_READY_CODE,
            TelemetryEventKind::RangeChanged => Self::RANGE_CHANGED_CODE,
            TelemetryEventKind::CardDetected => Self::CARD_DETECTED_CODE,
            TelemetryEventKind::CardRegistered => Self::CARD_REGISTERED_CODE,
            TelemetryEventKind::CardsCleared => Self::CARDS_CLEARED_CODE,
            TelemetryEventKind::TuneFinished => Self::TUNE_FINISHED_CODE,
        }
    }

    /// Decodes a discriminant produced by [`to_raw`](Self::to_raw).
    #[must_use]
    pub fn from_raw(code: u16) -> Option<Self> {
        let kind = match code {
            Self::COLOR_CHANGED_CODE => TelemetryEventKind::ColorChanged,
            Self::COLOR_LEARNED_CODE => TelemetryEventKind::ColorLearned,
            Self::COLORS_CLEARED_CODE => TelemetryEventKind::ColorsCleared,
            Self::MEASURE_STARTED_CODE => TelemetryEventKind::MeasureStarted,
            Self::MEASURE_STOPPED_CODE => TelemetryEventKind::MeasureStopped,
            Self::CIRCUMFERENCE_CODE => TelemetryEventKind::CircumferenceChanged,
            Self::TIMER_REJECTED_CODE => TelemetryEventKind::TimerRejected,
            Self::RANGE_READY_CODE => TelemetryEventKind::RangeReady,
            Self::RANGE_CHANGED_CODE => TelemetryEventKind::RangeChanged,
            Self::CARD_DETECTED_CODE => TelemetryEventKind::CardDetected,
            Self::CARD_REGISTERED_CODE => TelemetryEventKind::CardRegistered,
            Self::CARDS_CLEARED_CODE => TelemetryEventKind::CardsCleared,
            Self::TUNE_FINISHED_CODE => TelemetryEventKind::TuneFinished,
            value if (Self::MOTION_BASE..Self::PRESSED_BASE).contains(&value) => {
                TelemetryEventKind::MotionDone(*MotionDone::ALL.get(usize::from(value))?)
            }
            value if (Self::PRESSED_BASE..Self::RELEASED_BASE).contains(&value) => {
                let offset = usize::from(value - Self::PRESSED_BASE);
                TelemetryEventKind::ButtonPressed(*Button::ALL.get(offset)?)
            }
            value if (Self::RELEASED_BASE..Self::COLOR_CHANGED_CODE).contains(&value) => {
                let offset = usize::from(value - Self::RELEASED_BASE);
                TelemetryEventKind::ButtonReleased(*Button::ALL.get(offset)?)
            }
            _ => return None,
        };
        Some(kind)
    }
}

const fn motion_index(done: MotionDone) -> u16 {
    match done {
        MotionDone::Move => 0,
        MotionDone::Rotate => 1,
        MotionDone::Brake => 2,
        MotionDone::BrakeLeft => 3,
        MotionDone::BrakeRight => 4,
    }
}

const fn button_index(button: Button) -> u16 {
    match button {
        Button::Red => 0,
        Button::Green => 1,
        Button::Blue => 2,
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryPayload {
    None,
    /// Reported reference index per sensor.
    Colors([Option<u8>; SENSOR_COUNT]),
    Reference(u8),
    PeriodMs(u16),
    CircumferenceMm(u16),
    Timer(TimebaseError),
    Distances(Distances),
    /// Card UID and its table index when known.
    Card { uid: CardUid, index: Option<u8> },
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Colors(indexes) => {
                for (position, index) in indexes.iter().enumerate() {
                    if position > 0 {
                        f.write_str(" ")?;
                    }
                    match index {
                        Some(index) => write!(f, "{index}")?,
                        None => f.write_str("-")?,
                    }
                }
                Ok(())
            }
            TelemetryPayload::Reference(index) => write!(f, "#{index}"),
            TelemetryPayload::PeriodMs(ms) => write!(f, "{ms} ms"),
            TelemetryPayload::CircumferenceMm(mm) => write!(f, "{mm} mm"),
            TelemetryPayload::Timer(error) => write!(f, "{error}"),
            TelemetryPayload::Distances(distances) => fmt::Display::fmt(distances, f),
            TelemetryPayload::Card { uid, index } => {
                write!(f, "{uid:08x}")?;
                match index {
                    Some(index) => write!(f, " #{index}"),
                    None => f.write_str(" unknown"),
                }
            }
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp_ms: TimestampMillis,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} ms] {}", self.timestamp_ms, self.event)?;
        if self.details != TelemetryPayload::None {
            write!(f, " {}", self.details)?;
        }
        Ok(())
    }
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Records an event and returns its id.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        details: TelemetryPayload,
        timestamp_ms: TimestampMillis,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            timestamp_ms,
            event,
            details,
        });
        id
    }

    /// Recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Id the next record will receive; pass it to
    /// [`records_since`](Self::records_since) later to read only newer
    /// records.
    #[must_use]
    pub const fn cursor(&self) -> EventId {
        self.next_event_id
    }

    /// Records with an id at or after `cursor` that are still retained.
    pub fn records_since(&self, cursor: EventId) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring
            .oldest_ordered()
            .filter(move |record| record.id >= cursor)
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::ToString;

    use super::*;

    #[test]
    fn raw_codes_round_trip() {
        let kinds = [
            TelemetryEventKind::MotionDone(MotionDone::BrakeRight),
            TelemetryEventKind::ButtonPressed(Button::Blue),
            TelemetryEventKind::ButtonReleased(Button::Red),
            TelemetryEventKind::ColorChanged,
            TelemetryEventKind::TimerRejected,
            TelemetryEventKind::RangeChanged,
            TelemetryEventKind::CardsCleared,
            TelemetryEventKind::TuneFinished,
        ];
        for kind in kinds {
            assert_eq!(TelemetryEventKind::from_raw(kind.to_raw()), Some(kind));
        }
        assert_eq!(TelemetryEventKind::from_raw(0x0007), None);
        assert_eq!(TelemetryEventKind::from_raw(0x00FF), None);
    }

    #[test]
    fn records_are_numbered_and_bounded() {
        let mut recorder = TelemetryRecorder::<4>::new();
        for tick in 0..6 {
            recorder.record(
                TelemetryEventKind::ColorChanged,
                TelemetryPayload::None,
                tick * 10,
            );
        }

        assert_eq!(recorder.len(), 4);
        assert_eq!(recorder.latest().map(|record| record.id), Some(5));
        let ids: std::vec::Vec<_> = recorder.oldest_first().map(|record| record.id).collect();
        assert_eq!(ids, [2, 3, 4, 5]);
    }

    #[test]
    fn cursor_yields_only_newer_records() {
        let mut recorder = TelemetryRecorder::<8>::new();
        recorder.record(TelemetryEventKind::MeasureStarted, TelemetryPayload::PeriodMs(20), 0);
        let cursor = recorder.cursor();
        recorder.record(TelemetryEventKind::MeasureStopped, TelemetryPayload::None, 50);

        let newer: std::vec::Vec<_> = recorder.records_since(cursor).collect();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].event, TelemetryEventKind::MeasureStopped);
        assert_eq!(recorder.records_since(recorder.cursor()).count(), 0);
    }

    #[test]
    fn records_render_for_the_console() {
        let mut recorder = TelemetryRecorder::<2>::new();
        recorder.record(
            TelemetryEventKind::ColorChanged,
            TelemetryPayload::Colors([Some(1), None, Some(0)]),
            120,
        );
        let line = recorder.latest().unwrap().to_string();
        assert_eq!(line, "[120 ms] color-changed 1 - 0");

        recorder.record(
            TelemetryEventKind::MotionDone(MotionDone::Rotate),
            TelemetryPayload::None,
            300,
        );
        assert_eq!(
            recorder.latest().unwrap().to_string(),
            "[300 ms] motion-done rotate"
        );
    }

    #[test]
    fn accessory_payloads_render() {
        let mut recorder = TelemetryRecorder::<2>::new();
        recorder.record(
            TelemetryEventKind::CardDetected,
            TelemetryPayload::Card {
                uid: 0xDEAD_BEEF,
                index: None,
            },
            400,
        );
        assert_eq!(
            recorder.latest().unwrap().to_string(),
            "[400 ms] card-detected deadbeef unknown"
        );

        recorder.record(
            TelemetryEventKind::RangeReady,
            TelemetryPayload::Distances(Distances::UNKNOWN),
            450,
        );
        assert_eq!(
            recorder.latest().unwrap().to_string(),
            "[450 ms] range-ready front=- back=- left=- right=-"
        );
    }
}
