use portable_atomic::{AtomicU16, Ordering};

use super::{DirectionBits, Wheel};

/// Output stage for the two drive motors.
pub trait MotorDriver {
    /// Writes the PWM compare value for one wheel.
    fn set_duty(&mut self, wheel: Wheel, duty: u16);
    /// Drives the H-bridge inputs for one wheel.
    fn set_direction(&mut self, wheel: Wheel, bits: DirectionBits);
}

impl<M: MotorDriver + ?Sized> MotorDriver for &mut M {
    fn set_duty(&mut self, wheel: Wheel, duty: u16) {
        (**self).set_duty(wheel, duty);
    }

    fn set_direction(&mut self, wheel: Wheel, bits: DirectionBits) {
        (**self).set_direction(wheel, bits);
    }
}

/// Driver that discards every write.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMotorDriver;

impl NoopMotorDriver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MotorDriver for NoopMotorDriver {
    fn set_duty(&mut self, _wheel: Wheel, _duty: u16) {}

    fn set_direction(&mut self, _wheel: Wheel, _bits: DirectionBits) {}
}

/// Driver that keeps the last value written per wheel, standing in for the
/// PWM and GPIO registers on hosts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatchedMotorDriver {
    duty: [u16; 2],
    bits: [DirectionBits; 2],
    writes: usize,
}

impl LatchedMotorDriver {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duty: [0; 2],
            bits: [DirectionBits::COAST; 2],
            writes: 0,
        }
    }

    #[must_use]
    pub const fn duty(&self, wheel: Wheel) -> u16 {
        self.duty[wheel.index()]
    }

    #[must_use]
    pub const fn bits(&self, wheel: Wheel) -> DirectionBits {
        self.bits[wheel.index()]
    }

    /// Total number of register writes seen.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.writes
    }
}

impl Default for LatchedMotorDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorDriver for LatchedMotorDriver {
    fn set_duty(&mut self, wheel: Wheel, duty: u16) {
        self.duty[wheel.index()] = duty;
        self.writes += 1;
    }

    fn set_direction(&mut self, wheel: Wheel, bits: DirectionBits) {
        self.bits[wheel.index()] = bits;
        self.writes += 1;
    }
}

/// Pulse counter shared between an encoder interrupt and the regulator.
///
/// Single writer: only the wheel's encoder edge calls [`record`](Self::record).
/// Single reader: only the regulation callback calls [`take`](Self::take),
/// which reads and clears in one atomic swap so no pulse is lost between
/// the read and the reset.
#[derive(Debug, Default)]
pub struct EncoderCounter(AtomicU16);

impl EncoderCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the pulses seen since the previous call and restarts at zero.
    pub fn take(&self) -> u16 {
        self.0.swap(0, Ordering::AcqRel)
    }

    #[must_use]
    pub fn peek(&self) -> u16 {
        self.0.load(Ordering::Acquire)
    }
}
