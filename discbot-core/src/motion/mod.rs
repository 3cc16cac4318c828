//! Closed-loop wheel speed regulation and bounded maneuvers.
//!
//! The regulator turns a robot speed (cm/s) and steering direction
//! (-100..=100) into per-wheel PWM duty cycles. A periodic callback on the
//! [`Timebase`](crate::timebase::Timebase) compares the encoder pulses seen
//! during the last period with the expected pulse rate and corrects the duty
//! cycle; each encoder pulse additionally nudges the two wheels towards each
//! other while driving straight or maneuvering.

use core::fmt;

use crate::timebase::TimebaseError;

mod driver;
mod regulator;

pub use driver::{EncoderCounter, LatchedMotorDriver, MotorDriver, NoopMotorDriver};
pub use regulator::{Completions, DirectionVeto, MotionController, SpeedVeto};

/// Highest PWM compare value.
pub const MAX_DUTY: u16 = 40_000;
/// Lowest compare value that still turns a wheel.
pub const MIN_DUTY: u16 = 4_000;

/// Per-pulse correction step at standstill speeds.
pub const MIN_STEP: u16 = 15;
/// Per-pulse correction step at full speed.
pub const MAX_STEP: u16 = 30;
/// Per-pulse correction step while a maneuver is running.
pub const MANEUVER_STEP: u16 = 100;

/// Regulation periods spent actively braking before the bridge is shorted.
pub const BRAKE_PERIODS: u8 = 3;
/// Interval of the regulation callback.
pub const REGULATION_PERIOD_MS: u16 = 50;
/// Duty change per missing (or surplus) pulse and period.
pub const CORRECTION_FACTOR: i32 = 16;

pub const PULSES_PER_ROTATION: u32 = 234;
pub const DEFAULT_CIRCUMFERENCE_MM: u16 = 217;
/// Accepted calibration range, upper bound exclusive.
pub const CIRCUMFERENCE_RANGE_MM: core::ops::Range<u16> = 180..230;
/// Distance one wheel travels during a full turn on the spot.
pub const ROTATION_TRACK_MM: u32 = 650;

pub const MAX_SPEED_CMPS: i16 = 200;
pub const MAX_DIRECTION: i8 = 100;

/// Drive side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wheel {
    Left,
    Right,
}

impl Wheel {
    pub const BOTH: [Wheel; 2] = [Wheel::Left, Wheel::Right];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Wheel::Left => "left",
            Wheel::Right => "right",
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Wheel::Left => 0,
            Wheel::Right => 1,
        }
    }
}

impl fmt::Display for Wheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Levels of the two H-bridge inputs driving one motor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DirectionBits {
    pub in1: bool,
    pub in2: bool,
}

impl DirectionBits {
    pub const FORWARD: Self = Self {
        in1: false,
        in2: true,
    };
    pub const BACKWARD: Self = Self {
        in1: true,
        in2: false,
    };
    /// Both inputs high: motor terminals shorted.
    pub const BRAKE: Self = Self {
        in1: true,
        in2: true,
    };
    pub const COAST: Self = Self {
        in1: false,
        in2: false,
    };

    /// Toggles both inputs.
    #[must_use]
    pub const fn reversed(self) -> Self {
        Self {
            in1: !self.in1,
            in2: !self.in2,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match (self.in1, self.in2) {
            (false, true) => "fwd",
            (true, false) => "rev",
            (true, true) => "brake",
            (false, false) => "coast",
        }
    }
}

/// Errors reported by the motion controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionError {
    NotInitialized,
    AlreadyInitialized,
    /// Wheel circumference outside [`CIRCUMFERENCE_RANGE_MM`].
    InvalidCircumference(u16),
    Timebase(TimebaseError),
}

impl From<TimebaseError> for MotionError {
    fn from(error: TimebaseError) -> Self {
        Self::Timebase(error)
    }
}

impl fmt::Display for MotionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionError::NotInitialized => f.write_str("motion control not initialized"),
            MotionError::AlreadyInitialized => f.write_str("motion control already initialized"),
            MotionError::InvalidCircumference(mm) => write!(
                f,
                "wheel circumference {mm} mm outside {}..{} mm",
                CIRCUMFERENCE_RANGE_MM.start, CIRCUMFERENCE_RANGE_MM.end
            ),
            MotionError::Timebase(error) => write!(f, "timebase: {error}"),
        }
    }
}

/// Per-pulse correction step for a wheel speed, scaled linearly between
/// [`MIN_STEP`] and [`MAX_STEP`].
#[must_use]
pub fn step_for_speed(speed_cmps: i16) -> u16 {
    let speed = speed_cmps.unsigned_abs().min(MAX_SPEED_CMPS.unsigned_abs());
    (MAX_STEP - MIN_STEP) * speed / MAX_SPEED_CMPS.unsigned_abs() + MIN_STEP
}

/// Encoder pulses expected per regulation period at `speed_cmps`.
#[must_use]
pub fn target_pulse_rate(speed_cmps: i16, circumference_mm: u16) -> u16 {
    let speed = u32::from(speed_cmps.unsigned_abs());
    let rate = speed * PULSES_PER_ROTATION * u32::from(REGULATION_PERIOD_MS)
        / u32::from(circumference_mm.max(1))
        / 100;
    u16::try_from(rate).unwrap_or(u16::MAX)
}

/// Encoder pulses needed to cover `distance_mm` in a straight line.
#[must_use]
pub fn pulses_for_distance(distance_mm: u16, circumference_mm: u16) -> u32 {
    u32::from(distance_mm) * PULSES_PER_ROTATION / u32::from(circumference_mm.max(1))
}

/// Encoder pulses per wheel needed to turn on the spot by `angle_deg`.
#[must_use]
pub fn pulses_for_angle(angle_deg: i16, circumference_mm: u16) -> u32 {
    // A full i16 angle times the track constant does not fit in u32.
    let pulses = u64::from(angle_deg.unsigned_abs())
        * u64::from(PULSES_PER_ROTATION)
        * u64::from(ROTATION_TRACK_MM)
        / 360
        / u64::from(circumference_mm.max(1));
    u32::try_from(pulses).unwrap_or(u32::MAX)
}

/// Splits a robot speed into (left, right) wheel speeds. A positive
/// direction slows the left wheel, a negative one the right wheel.
#[must_use]
pub fn split_speed(speed_cmps: i16, direction: i8) -> (i16, i16) {
    let scaled = |inner: i8| {
        let value = i32::from(speed_cmps) * (50 - i32::from(inner)) / 50;
        i16::try_from(value).unwrap_or(if value < 0 { i16::MIN } else { i16::MAX })
    };

    match direction {
        d if d > 0 => (scaled(d), speed_cmps),
        d if d < 0 => (speed_cmps, scaled(d.saturating_neg())),
        _ => (speed_cmps, speed_cmps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_scales_with_speed() {
        assert_eq!(step_for_speed(0), MIN_STEP);
        assert_eq!(step_for_speed(100), 22);
        assert_eq!(step_for_speed(-200), MAX_STEP);
        assert_eq!(step_for_speed(i16::MIN), MAX_STEP);
    }

    #[test]
    fn pulse_rate_uses_calibrated_circumference() {
        assert_eq!(target_pulse_rate(100, 217), 53);
        assert_eq!(target_pulse_rate(-100, 200), 58);
        assert_eq!(target_pulse_rate(0, 200), 0);
    }

    #[test]
    fn maneuver_lengths() {
        assert_eq!(pulses_for_distance(217, 217), 234);
        assert_eq!(pulses_for_angle(90, 217), 175);
        assert_eq!(pulses_for_angle(-90, 217), 175);
    }

    #[test]
    fn extreme_angles_do_not_overflow() {
        assert_eq!(pulses_for_angle(30_000, 180), 70_416);
        assert_eq!(pulses_for_angle(i16::MAX, 180), 76_911);
        assert_eq!(pulses_for_angle(i16::MIN, 180), 76_913);
        assert_eq!(pulses_for_angle(i16::MIN, 217), 63_799);
    }

    #[test]
    fn direction_scales_inner_wheel() {
        assert_eq!(split_speed(100, 0), (100, 100));
        assert_eq!(split_speed(100, 25), (50, 100));
        assert_eq!(split_speed(100, -25), (100, 50));
        assert_eq!(split_speed(100, 100), (-100, 100));
        assert_eq!(split_speed(-80, 50), (0, -80));
    }

    #[test]
    fn reversing_bits_swaps_drive_direction() {
        assert_eq!(DirectionBits::FORWARD.reversed(), DirectionBits::BACKWARD);
        assert_eq!(DirectionBits::BRAKE.reversed(), DirectionBits::COAST);
    }
}
