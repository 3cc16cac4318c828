use heapless::Vec;

use crate::diag::warn;
use crate::storage::{MOTION_BLOCK, NvStore};
use crate::timebase::{Handle, Timebase};

use super::{
    BRAKE_PERIODS, CIRCUMFERENCE_RANGE_MM, CORRECTION_FACTOR, DEFAULT_CIRCUMFERENCE_MM,
    DirectionBits, EncoderCounter, MANEUVER_STEP, MAX_DIRECTION, MAX_DUTY, MAX_SPEED_CMPS,
    MIN_DUTY, MIN_STEP, MotionError, MotorDriver, REGULATION_PERIOD_MS, Wheel, pulses_for_angle,
    pulses_for_distance, split_speed, step_for_speed, target_pulse_rate,
};

/// Veto hook for speed changes: `(old, new) -> accept`.
pub type SpeedVeto = fn(i16, i16) -> bool;
/// Veto hook for direction changes: `(old, new) -> accept`.
pub type DirectionVeto = fn(i8, i8) -> bool;

/// Completion tokens produced by one regulation pass (at most one per wheel).
pub type Completions<C> = Vec<C, 2>;

/// Who is told when a wheel has come to rest after braking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopNotify<C> {
    Caller(C),
    /// Counts towards the two-wheel completion held in `joint`.
    Joint,
}

#[derive(Debug)]
struct WheelChannel<C> {
    speed: i16,
    target_rate: u16,
    pulses: EncoderCounter,
    duty: u16,
    bits: DirectionBits,
    brake_step: u8,
    remaining: u32,
    on_stopped: Option<StopNotify<C>>,
}

impl<C> WheelChannel<C> {
    const fn new() -> Self {
        Self {
            speed: 0,
            target_rate: 0,
            pulses: EncoderCounter::new(),
            duty: 0,
            bits: DirectionBits::COAST,
            brake_step: 0,
            remaining: 0,
            on_stopped: None,
        }
    }
}

/// Two-wheel speed regulator.
///
/// `C` is the completion token handed back when a brake or maneuver
/// finishes; callers match on it to continue their own sequencing.
pub struct MotionController<M, C> {
    driver: M,
    initialized: bool,
    circumference_mm: u16,
    speed: i16,
    direction: i8,
    channels: [WheelChannel<C>; 2],
    step: u16,
    joint: Option<C>,
    phase: u8,
    speed_veto: Option<SpeedVeto>,
    direction_veto: Option<DirectionVeto>,
    regulation: Option<Handle>,
}

impl<M, C> MotionController<M, C>
where
    M: MotorDriver,
    C: Copy,
{
    #[must_use]
    pub const fn new(driver: M) -> Self {
        Self {
            driver,
            initialized: false,
            circumference_mm: DEFAULT_CIRCUMFERENCE_MM,
            speed: 0,
            direction: 0,
            channels: [WheelChannel::new(), WheelChannel::new()],
            step: MIN_STEP,
            joint: None,
            phase: 0,
            speed_veto: None,
            direction_veto: None,
            regulation: None,
        }
    }

    /// Loads the wheel calibration, stops both motors and registers the
    /// periodic regulation task under `task`.
    ///
    /// # Errors
    ///
    /// Fails when already initialized or when the regulation task cannot
    /// be registered; the controller stays uninitialized in that case.
    pub fn init<S, T, const N: usize>(
        &mut self,
        store: &mut S,
        timebase: &mut Timebase<T, N>,
        task: T,
    ) -> Result<Handle, MotionError>
    where
        S: NvStore,
        T: Copy,
    {
        if self.initialized {
            warn!("motion init: already initialized");
            return Err(MotionError::AlreadyInitialized);
        }

        let handle = timebase.register(task, REGULATION_PERIOD_MS)?;

        self.circumference_mm = load_circumference(store);
        for wheel in Wheel::BOTH {
            self.driver.set_duty(wheel, 0);
            self.driver.set_direction(wheel, DirectionBits::COAST);
        }
        self.regulation = Some(handle);
        self.initialized = true;
        Ok(handle)
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Handle of the regulation task, once initialized.
    #[must_use]
    pub const fn regulation_handle(&self) -> Option<Handle> {
        self.regulation
    }

    pub fn driver(&self) -> &M {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut M {
        &mut self.driver
    }

    pub fn register_speed_veto(&mut self, veto: Option<SpeedVeto>) {
        self.speed_veto = veto;
    }

    pub fn register_direction_veto(&mut self, veto: Option<DirectionVeto>) {
        self.direction_veto = veto;
    }

    #[must_use]
    pub const fn speed(&self) -> i16 {
        self.speed
    }

    #[must_use]
    pub const fn direction(&self) -> i8 {
        self.direction
    }

    #[must_use]
    pub const fn speed_left(&self) -> i16 {
        self.channels[0].speed
    }

    #[must_use]
    pub const fn speed_right(&self) -> i16 {
        self.channels[1].speed
    }

    #[must_use]
    pub const fn wheel_speed(&self, wheel: Wheel) -> i16 {
        self.channels[wheel.index()].speed
    }

    #[must_use]
    pub const fn duty(&self, wheel: Wheel) -> u16 {
        self.channels[wheel.index()].duty
    }

    #[must_use]
    pub const fn direction_bits(&self, wheel: Wheel) -> DirectionBits {
        self.channels[wheel.index()].bits
    }

    /// Expected encoder pulses per regulation period.
    #[must_use]
    pub const fn target_rate(&self, wheel: Wheel) -> u16 {
        self.channels[wheel.index()].target_rate
    }

    /// Pulses left before the running maneuver brakes this wheel.
    #[must_use]
    pub const fn remaining_pulses(&self, wheel: Wheel) -> u32 {
        self.channels[wheel.index()].remaining
    }

    #[must_use]
    pub const fn brake_step(&self, wheel: Wheel) -> u8 {
        self.channels[wheel.index()].brake_step
    }

    /// Pulses counted since the last regulation pass.
    #[must_use]
    pub fn pending_pulses(&self, wheel: Wheel) -> u16 {
        self.channels[wheel.index()].pulses.peek()
    }

    /// Encoder counter of one wheel, for interrupt handlers that only count.
    #[must_use]
    pub const fn encoder(&self, wheel: Wheel) -> &EncoderCounter {
        &self.channels[wheel.index()].pulses
    }

    /// Per-pulse correction step currently in use.
    #[must_use]
    pub const fn step(&self) -> u16 {
        self.step
    }

    #[must_use]
    pub const fn wheel_circumference_mm(&self) -> u16 {
        self.circumference_mm
    }

    /// Sets the robot speed, keeping the current direction.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn set_speed(&mut self, speed_cmps: i16) -> Result<(), MotionError> {
        self.set_speed_and_direction(speed_cmps, self.direction)
    }

    /// Sets the steering direction, keeping the current speed.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn set_direction(&mut self, direction: i8) -> Result<(), MotionError> {
        self.set_speed_and_direction(self.speed, direction)
    }

    /// Applies a speed and direction pair. Each half may be refused by its
    /// registered veto; the wheel targets are then derived from whatever
    /// values are in effect.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn set_speed_and_direction(
        &mut self,
        speed_cmps: i16,
        direction: i8,
    ) -> Result<(), MotionError> {
        self.require_init()?;

        let speed = speed_cmps.clamp(-MAX_SPEED_CMPS, MAX_SPEED_CMPS);
        if self.speed_veto.is_none_or(|accept| accept(self.speed, speed)) {
            self.speed = speed;
        }

        let direction = direction.clamp(-MAX_DIRECTION, MAX_DIRECTION);
        if self
            .direction_veto
            .is_none_or(|accept| accept(self.direction, direction))
        {
            self.direction = direction;
        }

        let (left, right) = split_speed(self.speed, self.direction);
        self.apply_wheel_speed(Wheel::Left, left);
        self.apply_wheel_speed(Wheel::Right, right);
        Ok(())
    }

    /// Drives the left wheel alone; cancels any maneuver on that wheel.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn set_speed_left(&mut self, speed_cmps: i16) -> Result<(), MotionError> {
        self.set_wheel_speed(Wheel::Left, speed_cmps)
    }

    /// Drives the right wheel alone; cancels any maneuver on that wheel.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn set_speed_right(&mut self, speed_cmps: i16) -> Result<(), MotionError> {
        self.set_wheel_speed(Wheel::Right, speed_cmps)
    }

    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn set_wheel_speed(&mut self, wheel: Wheel, speed_cmps: i16) -> Result<(), MotionError> {
        self.require_init()?;
        self.apply_wheel_speed(wheel, speed_cmps);
        Ok(())
    }

    /// Brakes both wheels; `done` is returned from [`regulate`](Self::regulate)
    /// once both have stopped.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn brake(&mut self, done: C) -> Result<(), MotionError> {
        self.require_init()?;
        self.phase = 0;
        self.joint = Some(done);
        self.brake_wheel(Wheel::Left, Some(StopNotify::Joint));
        self.brake_wheel(Wheel::Right, Some(StopNotify::Joint));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn brake_left(&mut self, done: C) -> Result<(), MotionError> {
        self.brake_single(Wheel::Left, done)
    }

    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn brake_right(&mut self, done: C) -> Result<(), MotionError> {
        self.brake_single(Wheel::Right, done)
    }

    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn brake_single(&mut self, wheel: Wheel, done: C) -> Result<(), MotionError> {
        self.require_init()?;
        self.brake_wheel(wheel, Some(StopNotify::Caller(done)));
        Ok(())
    }

    /// Drives straight for `distance_mm`, then brakes; `done` is returned
    /// once both wheels have stopped.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn move_distance(
        &mut self,
        distance_mm: u16,
        speed_cmps: i16,
        done: C,
    ) -> Result<(), MotionError> {
        self.set_speed_and_direction(speed_cmps, 0)?;
        let pulses = pulses_for_distance(distance_mm, self.circumference_mm);
        self.begin_maneuver(pulses, done);
        Ok(())
    }

    /// Turns on the spot by `angle_deg` (positive turns right), then brakes.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::NotInitialized`] before `init`.
    pub fn rotate(&mut self, angle_deg: i16, speed_cmps: u8, done: C) -> Result<(), MotionError> {
        self.require_init()?;

        let speed = i16::from(speed_cmps);
        let (left, right) = if angle_deg > 0 {
            (speed, -speed)
        } else {
            (-speed, speed)
        };
        self.apply_wheel_speed(Wheel::Left, left);
        self.apply_wheel_speed(Wheel::Right, right);

        let pulses = pulses_for_angle(angle_deg, self.circumference_mm);
        self.begin_maneuver(pulses, done);
        Ok(())
    }

    /// Stores a new wheel circumference and recomputes the wheel targets.
    ///
    /// # Errors
    ///
    /// Rejects values outside [`CIRCUMFERENCE_RANGE_MM`] without touching
    /// the store.
    pub fn set_wheel_circumference<S>(
        &mut self,
        circumference_mm: u16,
        store: &mut S,
    ) -> Result<(), MotionError>
    where
        S: NvStore,
    {
        if !CIRCUMFERENCE_RANGE_MM.contains(&circumference_mm) {
            warn!(
                "motion: wheel circumference {=u16} mm rejected",
                circumference_mm
            );
            return Err(MotionError::InvalidCircumference(circumference_mm));
        }

        self.circumference_mm = circumference_mm;
        let [low, high] = circumference_mm.to_le_bytes();
        store.write(MOTION_BLOCK, low);
        store.write(MOTION_BLOCK + 1, high);

        for channel in &mut self.channels {
            channel.target_rate = target_pulse_rate(channel.speed, circumference_mm);
        }
        Ok(())
    }

    /// One regulation pass; runs every [`REGULATION_PERIOD_MS`].
    ///
    /// Returns the completion tokens of brakes and maneuvers that finished
    /// during this pass.
    pub fn regulate(&mut self) -> Completions<C> {
        let mut done = Completions::new();
        if !self.initialized {
            return done;
        }

        for wheel in Wheel::BOTH {
            if let Some(notify) = self.regulate_wheel(wheel) {
                self.notify_stopped(notify, &mut done);
            }
        }
        done
    }

    /// Encoder edge for one wheel. Counts the pulse, advances a running
    /// maneuver and applies the fast cross-wheel correction.
    pub fn on_encoder_pulse(&mut self, wheel: Wheel) {
        if !self.initialized {
            return;
        }

        let channel = &mut self.channels[wheel.index()];
        channel.pulses.record();

        if channel.remaining > 0 {
            channel.remaining -= 1;
            if channel.remaining == 0 {
                let notify = channel.on_stopped.take();
                self.brake_wheel(wheel, notify);
            }
        }

        let straight = self.channels[0].target_rate == self.channels[1].target_rate;
        let step = self.step;
        let (this, other) = self.pair_mut(wheel);
        if this.speed == 0 || (this.remaining == 0 && !straight) {
            return;
        }

        this.duty = this.duty.saturating_sub(step).max(MIN_DUTY);
        let this_duty = this.duty;

        let other_duty = if other.speed == 0 {
            None
        } else {
            other.duty = other.duty.saturating_add(step).min(MAX_DUTY);
            Some(other.duty)
        };

        self.driver.set_duty(wheel, this_duty);
        if let Some(duty) = other_duty {
            self.driver.set_duty(opposite(wheel), duty);
        }
    }

    fn regulate_wheel(&mut self, wheel: Wheel) -> Option<StopNotify<C>> {
        let channel = &mut self.channels[wheel.index()];
        let observed = channel.pulses.take();

        if channel.target_rate != 0 {
            let error = i32::from(channel.target_rate) - i32::from(observed);
            let duty = (i32::from(channel.duty) + error * CORRECTION_FACTOR)
                .clamp(i32::from(MIN_DUTY), i32::from(MAX_DUTY));
            channel.duty = u16::try_from(duty).unwrap_or(MAX_DUTY);
            let duty = channel.duty;
            self.driver.set_duty(wheel, duty);
            return None;
        }

        if channel.duty != 0 {
            if channel.brake_step == 0 {
                channel.bits = channel.bits.reversed();
                let bits = channel.bits;
                self.driver.set_direction(wheel, bits);
            }
            channel.brake_step = channel.brake_step.saturating_add(1);

            if channel.brake_step >= BRAKE_PERIODS {
                channel.duty = 0;
                channel.bits = DirectionBits::BRAKE;
                self.driver.set_duty(wheel, 0);
                self.driver.set_direction(wheel, DirectionBits::BRAKE);
            }
            return None;
        }

        if channel.brake_step != 0 {
            channel.brake_step = 0;
            return channel.on_stopped.take();
        }
        None
    }

    fn notify_stopped(&mut self, notify: StopNotify<C>, done: &mut Completions<C>) {
        let token = match notify {
            StopNotify::Caller(token) => Some(token),
            StopNotify::Joint => {
                self.phase = self.phase.saturating_add(1);
                if self.phase == 2 {
                    self.joint.take()
                } else {
                    None
                }
            }
        };

        if let Some(token) = token {
            if done.push(token).is_err() {
                warn!("motion: completion dropped");
            }
        }
    }

    fn apply_wheel_speed(&mut self, wheel: Wheel, speed_cmps: i16) {
        let speed = speed_cmps.clamp(-MAX_SPEED_CMPS, MAX_SPEED_CMPS);
        let circumference = self.circumference_mm;
        let channel = &mut self.channels[wheel.index()];
        if channel.speed == speed {
            return;
        }

        channel.remaining = 0;
        channel.brake_step = 0;
        channel.on_stopped = None;

        let reversing = (channel.speed > 0 && speed < 0) || (channel.speed < 0 && speed > 0);
        if reversing {
            channel.duty = MIN_DUTY;
            channel.pulses.take();
            self.driver.set_duty(wheel, MIN_DUTY);
        }

        channel.speed = speed;
        channel.target_rate = target_pulse_rate(speed, circumference);
        self.step = step_for_speed(speed);

        let bits = match speed {
            s if s > 0 => Some(DirectionBits::FORWARD),
            s if s < 0 => Some(DirectionBits::BACKWARD),
            _ => None,
        };
        if let Some(bits) = bits {
            channel.bits = bits;
            self.driver.set_direction(wheel, bits);
        }
    }

    fn brake_wheel(&mut self, wheel: Wheel, notify: Option<StopNotify<C>>) {
        self.apply_wheel_speed(wheel, 0);
        let channel = &mut self.channels[wheel.index()];
        channel.on_stopped = notify;
        // Already at rest: report on the next regulation pass.
        if channel.duty == 0 && channel.brake_step == 0 {
            channel.brake_step = 1;
        }
    }

    fn begin_maneuver(&mut self, pulses: u32, done: C) {
        self.step = MANEUVER_STEP;
        self.phase = 0;
        self.joint = Some(done);

        let moving = self.channels.iter().any(|channel| channel.speed != 0);
        if pulses == 0 || !moving {
            self.brake_wheel(Wheel::Left, Some(StopNotify::Joint));
            self.brake_wheel(Wheel::Right, Some(StopNotify::Joint));
            return;
        }

        for channel in &mut self.channels {
            channel.remaining = pulses;
            channel.on_stopped = Some(StopNotify::Joint);
        }
    }

    fn pair_mut(&mut self, wheel: Wheel) -> (&mut WheelChannel<C>, &mut WheelChannel<C>) {
        let [left, right] = &mut self.channels;
        match wheel {
            Wheel::Left => (left, right),
            Wheel::Right => (right, left),
        }
    }

    fn require_init(&self) -> Result<(), MotionError> {
        if self.initialized {
            Ok(())
        } else {
            warn!("motion: init missing");
            Err(MotionError::NotInitialized)
        }
    }
}

const fn opposite(wheel: Wheel) -> Wheel {
    match wheel {
        Wheel::Left => Wheel::Right,
        Wheel::Right => Wheel::Left,
    }
}

fn load_circumference<S: NvStore>(store: &mut S) -> u16 {
    let stored = u16::from_le_bytes([store.read(MOTION_BLOCK), store.read(MOTION_BLOCK + 1)]);
    if CIRCUMFERENCE_RANGE_MM.contains(&stored) {
        stored
    } else {
        DEFAULT_CIRCUMFERENCE_MM
    }
}
