//! Floor colour classification for the three-sensor colour bar.
//!
//! Each frame holds one reading per sensor (left, middle, right, in that
//! order) with four 4-bit channels each. Frames are matched against up to
//! [`MAX_REFERENCES`] learned reference frames by squared RGB distance.

use core::fmt;

use heapless::Vec;

use crate::diag::warn;
use crate::storage::{COLOR_BLOCK, NvStore};
use crate::timebase::{Handle, Reschedule, Timebase, TimebaseError};

pub const SENSOR_COUNT: usize = 3;
pub const CHANNEL_COUNT: usize = 4;
/// Raw frame size: sensors × channels.
pub const FRAME_LEN: usize = SENSOR_COUNT * CHANNEL_COUNT;
pub const MAX_REFERENCES: usize = 8;
/// Channel readings saturate here.
pub const MAX_CHANNEL_VALUE: u8 = 15;
pub const DEFAULT_MIN_QUALITY: u8 = 5;
pub const MIN_MEASURE_PERIOD_MS: u16 = 10;

const TIMING_ADDRESS: u16 = COLOR_BLOCK;
const COUNT_ADDRESS: u16 = COLOR_BLOCK + 2 * FRAME_LEN as u16;
const REFERENCE_ADDRESS: u16 = COUNT_ADDRESS + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sensor {
    Left,
    Middle,
    Right,
}

impl Sensor {
    pub const ALL: [Sensor; SENSOR_COUNT] = [Sensor::Left, Sensor::Middle, Sensor::Right];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Sensor::Left => 0,
            Sensor::Middle => 1,
            Sensor::Right => 2,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Sensor::Left => "left",
            Sensor::Middle => "middle",
            Sensor::Right => "right",
        }
    }
}

/// One sensor reading. Field order matches the raw channel order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Color {
    pub red: u8,
    pub blue: u8,
    pub clear: u8,
    pub green: u8,
}

impl Color {
    #[must_use]
    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            blue,
            clear: 0,
            green,
        }
    }

    #[must_use]
    pub fn from_channels(channels: [u8; CHANNEL_COUNT]) -> Self {
        let [red, blue, clear, green] = channels.map(|value| value.min(MAX_CHANNEL_VALUE));
        Self {
            red,
            blue,
            clear,
            green,
        }
    }

    #[must_use]
    pub const fn channels(self) -> [u8; CHANNEL_COUNT] {
        [self.red, self.blue, self.clear, self.green]
    }
}

/// Squared RGB distance between two readings, saturating at 255. The clear
/// channel is ignored.
#[must_use]
pub fn color_distance(reference: Color, sample: Color) -> u8 {
    let square = |a: u8, b: u8| {
        let diff = u16::from(a.abs_diff(b));
        diff * diff
    };
    let total = square(reference.red, sample.red)
        + square(reference.green, sample.green)
        + square(reference.blue, sample.blue);
    u8::try_from(total).unwrap_or(u8::MAX)
}

/// Readings of all three sensors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ColorFrame {
    pub sensors: [Color; SENSOR_COUNT],
}

impl ColorFrame {
    #[must_use]
    pub const fn new(left: Color, middle: Color, right: Color) -> Self {
        Self {
            sensors: [left, middle, right],
        }
    }

    /// Builds a frame from sensor-major raw channel values.
    #[must_use]
    pub fn from_raw(raw: [u8; FRAME_LEN]) -> Self {
        let mut frame = Self::default();
        for (color, chunk) in frame.sensors.iter_mut().zip(raw.chunks_exact(CHANNEL_COUNT)) {
            *color = Color::from_channels([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        frame
    }

    #[must_use]
    pub fn to_raw(&self) -> [u8; FRAME_LEN] {
        let mut raw = [0; FRAME_LEN];
        for (chunk, color) in raw.chunks_exact_mut(CHANNEL_COUNT).zip(self.sensors) {
            chunk.copy_from_slice(&color.channels());
        }
        raw
    }

    #[must_use]
    pub const fn sensor(&self, sensor: Sensor) -> Color {
        self.sensors[sensor.index()]
    }
}

/// Nearest reference per sensor together with its distance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Classification {
    pub indexes: [Option<u8>; SENSOR_COUNT],
    pub quality: [u8; SENSOR_COUNT],
}

impl Classification {
    pub const UNKNOWN: Self = Self {
        indexes: [None; SENSOR_COUNT],
        quality: [u8::MAX; SENSOR_COUNT],
    };
}

/// Result of feeding one frame through the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ColorReport {
    pub frame: ColorFrame,
    pub classification: Classification,
    /// At least one sensor switched to a new reference.
    pub changed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ColorError {
    TooManyReferences,
    /// Measurement period shorter than [`MIN_MEASURE_PERIOD_MS`].
    InvalidPeriod(u16),
    /// No frame has been received yet.
    NoFrame,
    Timebase(TimebaseError),
}

impl From<TimebaseError> for ColorError {
    fn from(error: TimebaseError) -> Self {
        Self::Timebase(error)
    }
}

impl fmt::Display for ColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorError::TooManyReferences => {
                write!(f, "reference table full ({MAX_REFERENCES} colours)")
            }
            ColorError::InvalidPeriod(ms) => write!(
                f,
                "measurement period {ms} ms below {MIN_MEASURE_PERIOD_MS} ms"
            ),
            ColorError::NoFrame => f.write_str("no colour frame received yet"),
            ColorError::Timebase(error) => write!(f, "timebase: {error}"),
        }
    }
}

/// Starts a colour conversion; the finished frame is delivered back through
/// [`ColorClassifier::update`].
pub trait ColorSampler {
    fn trigger(&mut self);
}

impl<S: ColorSampler + ?Sized> ColorSampler for &mut S {
    fn trigger(&mut self) {
        (**self).trigger();
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopColorSampler;

impl ColorSampler for NoopColorSampler {
    fn trigger(&mut self) {}
}

/// Reference table, hysteresis state and measurement schedule.
#[derive(Debug)]
pub struct ColorClassifier {
    timing: [u16; FRAME_LEN],
    references: Vec<ColorFrame, MAX_REFERENCES>,
    min_quality: u8,
    current: [Option<u8>; SENSOR_COUNT],
    last_frame: Option<ColorFrame>,
    measuring: Option<(Handle, u16)>,
}

impl ColorClassifier {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timing: [0; FRAME_LEN],
            references: Vec::new(),
            min_quality: DEFAULT_MIN_QUALITY,
            current: [None; SENSOR_COUNT],
            last_frame: None,
            measuring: None,
        }
    }

    /// Restores the sensor timing values and learned references.
    /// An erased or corrupt reference count loads as an empty table.
    pub fn load<S: NvStore>(&mut self, store: &mut S) {
        for (index, value) in (0u16..).zip(self.timing.iter_mut()) {
            *value = store.read_u16(TIMING_ADDRESS + index * 2);
        }

        let count = usize::from(store.read(COUNT_ADDRESS));
        let count = if count > MAX_REFERENCES {
            warn!("colors: stored reference count {=usize} ignored", count);
            0
        } else {
            count
        };

        self.references.clear();
        for slot in 0..count {
            let mut raw = [0; FRAME_LEN];
            let base = reference_address(slot);
            for (offset, byte) in (0u16..).zip(raw.iter_mut()) {
                *byte = store.read(base + offset);
            }
            // `count` is bounded by the table capacity above.
            let _ = self.references.push(ColorFrame::from_raw(raw));
        }
        self.current = [None; SENSOR_COUNT];
    }

    /// Persists new sensor timing values; previously learned references are
    /// dropped since they were measured with the old timing.
    pub fn store_timing<S: NvStore>(&mut self, timing: [u16; FRAME_LEN], store: &mut S) {
        self.timing = timing;
        for (index, value) in (0u16..).zip(timing) {
            store.write_u16(TIMING_ADDRESS + index * 2, value);
        }
        self.clear_references(store);
    }

    #[must_use]
    pub const fn timing(&self) -> &[u16; FRAME_LEN] {
        &self.timing
    }

    /// Appends `frame` as a new reference colour and returns its index.
    ///
    /// # Errors
    ///
    /// Fails once [`MAX_REFERENCES`] colours are stored.
    pub fn register_reference<S: NvStore>(
        &mut self,
        frame: ColorFrame,
        store: &mut S,
    ) -> Result<u8, ColorError> {
        let slot = self.references.len();
        if self.references.push(frame).is_err() {
            warn!("colors: reference table full");
            return Err(ColorError::TooManyReferences);
        }

        let base = reference_address(slot);
        for (offset, byte) in (0u16..).zip(frame.to_raw()) {
            store.write(base + offset, byte);
        }
        let count = u8::try_from(self.references.len()).unwrap_or(u8::MAX);
        store.write(COUNT_ADDRESS, count);
        Ok(count - 1)
    }

    /// Learns the most recently received frame as a reference.
    ///
    /// # Errors
    ///
    /// Fails without a received frame or when the table is full.
    pub fn learn_last_frame<S: NvStore>(&mut self, store: &mut S) -> Result<u8, ColorError> {
        let frame = self.last_frame.ok_or(ColorError::NoFrame)?;
        self.register_reference(frame, store)
    }

    pub fn clear_references<S: NvStore>(&mut self, store: &mut S) {
        self.references.clear();
        self.current = [None; SENSOR_COUNT];
        store.write(COUNT_ADDRESS, 0);
    }

    #[must_use]
    pub fn references(&self) -> &[ColorFrame] {
        &self.references
    }

    #[must_use]
    pub const fn min_quality(&self) -> u8 {
        self.min_quality
    }

    pub fn set_min_quality(&mut self, quality: u8) {
        self.min_quality = quality;
    }

    /// Reference indexes currently reported per sensor.
    #[must_use]
    pub const fn current(&self) -> [Option<u8>; SENSOR_COUNT] {
        self.current
    }

    #[must_use]
    pub const fn last_frame(&self) -> Option<ColorFrame> {
        self.last_frame
    }

    /// Nearest reference per sensor, without hysteresis. On equal distance
    /// the earlier reference wins.
    #[must_use]
    pub fn classify(&self, frame: &ColorFrame) -> Classification {
        let mut result = Classification::UNKNOWN;
        for sensor in Sensor::ALL {
            let sample = frame.sensor(sensor);
            for (index, reference) in (0u8..).zip(self.references.iter()) {
                let distance = color_distance(reference.sensor(sensor), sample);
                if distance < result.quality[sensor.index()] {
                    result.indexes[sensor.index()] = Some(index);
                    result.quality[sensor.index()] = distance;
                }
            }
        }
        result
    }

    /// Classifies a finished frame. A sensor only switches to a different
    /// reference when the match is at least as good as the minimum
    /// quality; otherwise it keeps reporting its previous index.
    pub fn update(&mut self, frame: ColorFrame) -> ColorReport {
        self.last_frame = Some(frame);
        let mut classification = self.classify(&frame);
        let mut changed = false;

        for sensor in Sensor::ALL {
            let index = sensor.index();
            if classification.indexes[index] == self.current[index] {
                continue;
            }
            if classification.quality[index] <= self.min_quality {
                self.current[index] = classification.indexes[index];
                changed = true;
            } else {
                classification.indexes[index] = self.current[index];
            }
        }

        ColorReport {
            frame,
            classification,
            changed,
        }
    }

    /// Registers `task` to trigger a conversion every `period_ms`,
    /// replacing a running schedule. Returns the period in effect.
    ///
    /// # Errors
    ///
    /// Rejects periods below [`MIN_MEASURE_PERIOD_MS`] and periods the
    /// timebase cannot represent.
    pub fn start_measuring<T, const N: usize>(
        &mut self,
        period_ms: u16,
        timebase: &mut Timebase<T, N>,
        task: T,
    ) -> Result<u16, ColorError>
    where
        T: Copy,
    {
        if period_ms < MIN_MEASURE_PERIOD_MS {
            warn!("colors: measurement period {=u16} ms too short", period_ms);
            return Err(ColorError::InvalidPeriod(period_ms));
        }

        self.stop_measuring(timebase)?;
        let handle = timebase.register(task, period_ms)?;
        self.measuring = Some((handle, period_ms));
        Ok(period_ms)
    }

    /// # Errors
    ///
    /// Propagates a timebase failure while releasing the schedule.
    pub fn stop_measuring<T, const N: usize>(
        &mut self,
        timebase: &mut Timebase<T, N>,
    ) -> Result<(), ColorError>
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

    /// Timebase expiry of the measurement task.
    pub fn on_measure_elapsed<C: ColorSampler>(&mut self, sampler: &mut C) -> Reschedule {
        match self.measuring {
            Some((_, period)) => {
                sampler.trigger();
                Reschedule::After(period)
            }
            None => Reschedule::Cancel,
        }
    }
}

impl Default for ColorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn reference_address(slot: usize) -> u16 {
    let slot = u16::try_from(slot).unwrap_or(u16::MAX);
    REFERENCE_ADDRESS + slot * FRAME_LEN as u16
}
