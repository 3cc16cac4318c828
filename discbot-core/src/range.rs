//! Distance sensing with the ultrasonic and infrared rangefinders.
//!
//! The robot carries up to four sensors of each kind, one per side. A
//! measurement is requested through [`RangeSampler`]; the finished readings
//! come back through [`RangeFinder::on_ultrasonic`] and
//! [`RangeFinder::on_infrared`]. Distances are whole centimetres, with
//! [`NO_RANGE`] for sides that have not reported.

use core::fmt;

use crate::diag::warn;
use crate::timebase::{Handle, Reschedule, Timebase, TimebaseError};

pub const SIDE_COUNT: usize = 4;
/// Distance reported for sides without a reading.
pub const NO_RANGE: u8 = u8::MAX;
/// Ultrasonic echoes at or below this distance are treated as noise.
pub const ULTRASONIC_MIN_CM: u8 = 5;

/// Infrared sensor curve: output in millivolts against distance in cm.
/// Points between entries are interpolated linearly.
const INFRARED_CURVE: [(u16, u8); 14] = [
    (60, 40),
    (88, 30),
    (107, 25),
    (151, 20),
    (165, 16),
    (189, 14),
    (215, 12),
    (257, 10),
    (287, 9),
    (319, 8),
    (360, 7),
    (410, 6),
    (480, 5),
    (559, 4),
];

/// Raw readings per side, indexed by [`Side::index`]. `None` means the
/// sensor did not answer.
pub type Readings = [Option<u16>; SIDE_COUNT];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Side {
    Left,
    Back,
    Right,
    Front,
}

impl Side {
    /// In sensor bit order.
    pub const ALL: [Side; SIDE_COUNT] = [Side::Left, Side::Back, Side::Right, Side::Front];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Back => 1,
            Side::Right => 2,
            Side::Front => 3,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Back => "back",
            Side::Right => "right",
            Side::Front => "front",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RangeKind {
    Ultrasonic,
    Infrared,
}

impl RangeKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            RangeKind::Ultrasonic => "sonar",
            RangeKind::Infrared => "ir",
        }
    }
}

/// Sensor selection. Ultrasonic sensors sit in the low nibble and infrared
/// sensors in the high nibble, each in [`Side::ALL`] order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangeSensors(u8);

impl RangeSensors {
    pub const NONE: Self = Self(0);
    pub const ULTRASONIC: Self = Self(0x0F);
    pub const INFRARED: Self = Self(0xF0);
    pub const ALL: Self = Self(0xFF);

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn of_kind(kind: RangeKind) -> Self {
        match kind {
            RangeKind::Ultrasonic => Self::ULTRASONIC,
            RangeKind::Infrared => Self::INFRARED,
        }
    }

    /// The single sensor of `kind` facing `side`.
    #[must_use]
    pub const fn sensor(kind: RangeKind, side: Side) -> Self {
        let shift = match kind {
            RangeKind::Ultrasonic => 0,
            RangeKind::Infrared => 4,
        };
        Self(1 << (side.index() + shift))
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn contains(self, kind: RangeKind, side: Side) -> bool {
        self.intersects(Self::sensor(kind, side))
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Last known distance per side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Distances {
    cm: [u8; SIDE_COUNT],
}

impl Distances {
    pub const UNKNOWN: Self = Self {
        cm: [NO_RANGE; SIDE_COUNT],
    };

    #[must_use]
    pub const fn get(&self, side: Side) -> u8 {
        self.cm[side.index()]
    }

    pub fn set(&mut self, side: Side, cm: u8) {
        self.cm[side.index()] = cm;
    }
}

impl Default for Distances {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// e.g. `front=42 back=- left=18 right=-`
impl fmt::Display for Distances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, side) in [Side::Front, Side::Back, Side::Left, Side::Right]
            .into_iter()
            .enumerate()
        {
            if position > 0 {
                f.write_str(" ")?;
            }
            match self.get(side) {
                NO_RANGE => write!(f, "{}=-", side.label())?,
                cm => write!(f, "{}={cm}", side.label())?,
            }
        }
        Ok(())
    }
}

/// Outcome of a batch of readings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RangeEvent {
    /// Every kind requested by a single measurement has answered.
    Ready(Distances),
    /// Continuous measurement moved at least one distance.
    Changed(Distances),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RangeError {
    NoSensor,
    Timebase(TimebaseError),
}

impl From<TimebaseError> for RangeError {
    fn from(error: TimebaseError) -> Self {
        Self::Timebase(error)
    }
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeError::NoSensor => f.write_str("no range sensor selected"),
            RangeError::Timebase(error) => write!(f, "timebase: {error}"),
        }
    }
}

/// Starts a measurement on the selected sensors.
pub trait RangeSampler {
    fn ping(&mut self, sensors: RangeSensors);
}

impl<R: RangeSampler + ?Sized> RangeSampler for &mut R {
    fn ping(&mut self, sensors: RangeSensors) {
        (**self).ping(sensors);
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRangeSampler;

impl RangeSampler for NoopRangeSampler {
    fn ping(&mut self, _sensors: RangeSensors) {}
}

/// Converts an infrared sensor output to centimetres. Outputs below the
/// curve mean nothing in range; outputs above it clamp to the closest
/// distance.
#[must_use]
pub fn infrared_distance_cm(millivolts: u16) -> u8 {
    let (first_mv, _) = INFRARED_CURVE[0];
    if millivolts < first_mv {
        return NO_RANGE;
    }
    let Some(upper) = INFRARED_CURVE
        .iter()
        .position(|&(mv, _)| mv >= millivolts)
    else {
        let (_, closest) = INFRARED_CURVE[INFRARED_CURVE.len() - 1];
        return closest;
    };

    let upper = upper.max(1);
    let (mv0, cm0) = INFRARED_CURVE[upper - 1];
    let (mv1, cm1) = INFRARED_CURVE[upper];
    let offset = i32::from(millivolts) - i32::from(mv0);
    let cm = i32::from(cm0)
        + offset * (i32::from(cm1) - i32::from(cm0)) / (i32::from(mv1) - i32::from(mv0));
    u8::try_from(cm).unwrap_or(NO_RANGE)
}

/// Distance table plus single and continuous measurement state.
#[derive(Debug)]
pub struct RangeFinder {
    distances: Distances,
    sensors: RangeSensors,
    /// Kinds a single measurement is still waiting for.
    pending: RangeSensors,
    measuring: Option<(Handle, u16)>,
}

impl RangeFinder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            distances: Distances::UNKNOWN,
            sensors: RangeSensors::NONE,
            pending: RangeSensors::NONE,
            measuring: None,
        }
    }

    /// Requests one reading from `sensors`. Continuous measurement is
    /// stopped first and all distances start over as unknown.
    ///
    /// # Errors
    ///
    /// Rejects an empty selection and propagates a timebase failure while
    /// releasing a running schedule.
    pub fn measure_once<T, R, const N: usize>(
        &mut self,
        sensors: RangeSensors,
        timebase: &mut Timebase<T, N>,
        sampler: &mut R,
    ) -> Result<(), RangeError>
    where
        T: Copy,
        R: RangeSampler,
    {
        if sensors.is_empty() {
            warn!("range: single measurement without sensors");
            return Err(RangeError::NoSensor);
        }
        self.stop_measuring(timebase)?;

        self.sensors = sensors;
        self.distances = Distances::UNKNOWN;
        self.pending = RangeSensors::NONE;
        for kind in [RangeKind::Ultrasonic, RangeKind::Infrared] {
            let group = RangeSensors::of_kind(kind);
            if sensors.intersects(group) {
                self.pending = self.pending.union(group);
            }
        }
        sampler.ping(sensors);
        Ok(())
    }

    /// Registers `task` to ping `sensors` every `period_ms`, replacing a
    /// running schedule. Returns the period in effect.
    ///
    /// # Errors
    ///
    /// Rejects an empty selection and periods the timebase cannot run at.
    pub fn start_measuring<T, const N: usize>(
        &mut self,
        sensors: RangeSensors,
        period_ms: u16,
        timebase: &mut Timebase<T, N>,
        task: T,
    ) -> Result<u16, RangeError>
    where
        T: Copy,
    {
        if sensors.is_empty() {
            warn!("range: continuous measurement without sensors");
            return Err(RangeError::NoSensor);
        }

        self.stop_measuring(timebase)?;
        let handle = timebase.register(task, period_ms)?;
        self.measuring = Some((handle, period_ms));
        self.sensors = sensors;
        self.pending = RangeSensors::NONE;
        self.distances = Distances::UNKNOWN;
        Ok(period_ms)
    }

    /// # Errors
    ///
    /// Propagates a timebase failure while releasing the schedule.
    pub fn stop_measuring<T, const N: usize>(
        &mut self,
        timebase: &mut Timebase<T, N>,
    ) -> Result<(), RangeError>
    where
        T: Copy,
    {
        if let Some((handle, _)) = self.measuring.take() {
            timebase.unregister(handle)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn measuring_period(&self) -> Option<u16> {
        self.measuring.map(|(_, period)| period)
    }

    #[must_use]
    pub const fn sensors(&self) -> RangeSensors {
        self.sensors
    }

    #[must_use]
    pub const fn distances(&self) -> Distances {
        self.distances
    }

    /// A single measurement is still waiting for readings.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Timebase expiry of the measurement task.
    pub fn on_measure_elapsed<R: RangeSampler>(&mut self, sampler: &mut R) -> Reschedule {
        match self.measuring {
            Some((_, period)) => {
                sampler.ping(self.sensors);
                Reschedule::After(period)
            }
            None => Reschedule::Cancel,
        }
    }

    /// Finished ultrasonic readings in millimetres.
    pub fn on_ultrasonic(&mut self, echoes_mm: Readings) -> Option<RangeEvent> {
        let mut changed = false;
        for side in Side::ALL {
            if !self.sensors.contains(RangeKind::Ultrasonic, side) {
                continue;
            }
            let Some(mm) = echoes_mm[side.index()] else {
                continue;
            };
            let cm = u8::try_from(mm / 10).unwrap_or(NO_RANGE);
            if cm > ULTRASONIC_MIN_CM && cm != self.distances.get(side) {
                self.distances.set(side, cm);
                changed = true;
            }
        }
        self.settle(RangeSensors::ULTRASONIC, changed)
    }

    /// Finished infrared readings in millivolts.
    pub fn on_infrared(&mut self, samples_mv: Readings) -> Option<RangeEvent> {
        let mut changed = false;
        for side in Side::ALL {
            if !self.sensors.contains(RangeKind::Infrared, side) {
                continue;
            }
            let Some(mv) = samples_mv[side.index()] else {
                continue;
            };
            let cm = infrared_distance_cm(mv);
            if cm != self.distances.get(side) {
                self.distances.set(side, cm);
                changed = true;
            }
        }
        self.settle(RangeSensors::INFRARED, changed)
    }

    fn settle(&mut self, group: RangeSensors, changed: bool) -> Option<RangeEvent> {
        if self.measuring.is_some() {
            return changed.then_some(RangeEvent::Changed(self.distances));
        }
        if !self.pending.intersects(group) {
            return None;
        }
        self.pending = self.pending.without(group);
        self.pending
            .is_empty()
            .then_some(RangeEvent::Ready(self.distances))
    }
}

impl Default for RangeFinder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::BaseTime;

    fn timebase() -> Timebase<u8, 4> {
        let mut timebase = Timebase::new();
        timebase.init(BaseTime::Ms10, 4).unwrap();
        timebase
    }

    #[derive(Default)]
    struct Pings(heapless::Vec<RangeSensors, 8>);

    impl RangeSampler for Pings {
        fn ping(&mut self, sensors: RangeSensors) {
            self.0.push(sensors).unwrap();
        }
    }

    const FRONT_ONLY: Readings = [None, None, None, Some(420)];

    #[test]
    fn sensor_bits_follow_side_order() {
        assert_eq!(
            RangeSensors::sensor(RangeKind::Ultrasonic, Side::Left).bits(),
            0x01
        );
        assert_eq!(
            RangeSensors::sensor(RangeKind::Ultrasonic, Side::Front).bits(),
            0x08
        );
        assert_eq!(
            RangeSensors::sensor(RangeKind::Infrared, Side::Back).bits(),
            0x20
        );
        assert_eq!(
            RangeSensors::sensor(RangeKind::Infrared, Side::Front).bits(),
            0x80
        );
    }

    #[test]
    fn infrared_curve_interpolates() {
        assert_eq!(infrared_distance_cm(59), NO_RANGE);
        assert_eq!(infrared_distance_cm(60), 40);
        assert_eq!(infrared_distance_cm(100), 27);
        assert_eq!(infrared_distance_cm(257), 10);
        assert_eq!(infrared_distance_cm(270), 10);
        assert_eq!(infrared_distance_cm(559), 4);
        assert_eq!(infrared_distance_cm(900), 4);
    }

    #[test]
    fn single_measurement_waits_for_both_kinds() {
        let mut timebase = timebase();
        let mut pings = Pings::default();
        let mut finder = RangeFinder::new();

        finder
            .measure_once(RangeSensors::ALL, &mut timebase, &mut pings)
            .unwrap();
        assert_eq!(pings.0.as_slice(), &[RangeSensors::ALL]);

        assert_eq!(finder.on_ultrasonic(FRONT_ONLY), None);
        assert!(finder.is_pending());
        let event = finder.on_infrared([Some(257), None, None, None]);

        let mut expected = Distances::UNKNOWN;
        expected.set(Side::Front, 42);
        expected.set(Side::Left, 10);
        assert_eq!(event, Some(RangeEvent::Ready(expected)));
        assert!(!finder.is_pending());

        // Late readings after completion are not reported again.
        assert_eq!(finder.on_ultrasonic(FRONT_ONLY), None);
    }

    #[test]
    fn close_echoes_are_ignored() {
        let mut timebase = timebase();
        let mut finder = RangeFinder::new();
        finder
            .measure_once(RangeSensors::ULTRASONIC, &mut timebase, &mut NoopRangeSampler)
            .unwrap();

        let event = finder.on_ultrasonic([Some(59), Some(61), None, Some(9_000)]);
        let Some(RangeEvent::Ready(distances)) = event else {
            panic!("unexpected {event:?}");
        };
        assert_eq!(distances.get(Side::Left), NO_RANGE);
        assert_eq!(distances.get(Side::Back), 6);
        assert_eq!(distances.get(Side::Right), NO_RANGE);
        assert_eq!(distances.get(Side::Front), NO_RANGE);
    }

    #[test]
    fn continuous_measurement_reports_changes_only() {
        let mut timebase = timebase();
        let mut pings = Pings::default();
        let mut finder = RangeFinder::new();

        assert_eq!(
            finder.start_measuring(RangeSensors::NONE, 20, &mut timebase, 1),
            Err(RangeError::NoSensor)
        );
        let front = RangeSensors::sensor(RangeKind::Ultrasonic, Side::Front);
        assert_eq!(finder.start_measuring(front, 20, &mut timebase, 1), Ok(20));

        assert_eq!(
            finder.on_measure_elapsed(&mut pings),
            Reschedule::After(20)
        );
        assert_eq!(pings.0.as_slice(), &[front]);

        assert!(matches!(
            finder.on_ultrasonic(FRONT_ONLY),
            Some(RangeEvent::Changed(_))
        ));
        assert_eq!(finder.on_ultrasonic(FRONT_ONLY), None);
        // Unselected sides are not touched.
        assert_eq!(finder.on_ultrasonic([Some(300), None, None, None]), None);
    }

    #[test]
    fn single_measurement_stops_continuous_mode() {
        let mut timebase = timebase();
        let mut finder = RangeFinder::new();
        finder
            .start_measuring(RangeSensors::ULTRASONIC, 50, &mut timebase, 1)
            .unwrap();
        assert_eq!(timebase.live_count(), 1);

        finder
            .measure_once(RangeSensors::INFRARED, &mut timebase, &mut NoopRangeSampler)
            .unwrap();
        assert_eq!(finder.measuring_period(), None);
        assert_eq!(timebase.live_count(), 0);
        assert_eq!(
            finder.on_measure_elapsed(&mut NoopRangeSampler),
            Reschedule::Cancel
        );
    }

    #[test]
    fn distances_render_front_first() {
        let mut distances = Distances::UNKNOWN;
        distances.set(Side::Left, 18);
        distances.set(Side::Front, 42);
        let mut line = heapless::String::<48>::new();
        core::fmt::write(&mut line, format_args!("{distances}")).unwrap();
        assert_eq!(line.as_str(), "front=42 back=- left=18 right=-");
    }
}
