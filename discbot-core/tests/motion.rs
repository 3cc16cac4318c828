use discbot_core::motion::{
    DirectionBits, LatchedMotorDriver, MotionController, MotionError, Wheel,
};
use discbot_core::storage::{MOTION_BLOCK, NvStore, RamStore};
use discbot_core::timebase::{BaseTime, Reschedule, Timebase, TimeoutHandler};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Done {
    Move,
    Rotate,
}

type Controller = MotionController<LatchedMotorDriver, Done>;

struct Regulation<'a> {
    motion: &'a mut Controller,
    done: Vec<Done>,
}

impl<const N: usize> TimeoutHandler<u8, N> for Regulation<'_> {
    fn on_timeout(&mut self, _task: u8, _timebase: &mut Timebase<u8, N>) -> Reschedule {
        self.done.extend(self.motion.regulate());
        Reschedule::After(50)
    }
}

fn setup(store: &mut RamStore<64>) -> (Controller, Timebase<u8, 4>) {
    let mut timebase = Timebase::new();
    timebase.init(BaseTime::Ms50, 4).unwrap();
    let mut motion = Controller::new(LatchedMotorDriver::new());
    motion.init(store, &mut timebase, 0).unwrap();
    (motion, timebase)
}

/// Runs `periods` regulation periods, feeding each wheel the pulses its
/// target rate asks for.
fn drive(motion: &mut Controller, timebase: &mut Timebase<u8, 4>, periods: usize) -> Vec<Done> {
    let mut done = Vec::new();
    for _ in 0..periods {
        for wheel in Wheel::BOTH {
            for _ in 0..motion.target_rate(wheel) {
                motion.on_encoder_pulse(wheel);
            }
        }
        let mut handler = Regulation {
            motion: &mut *motion,
            done: Vec::new(),
        };
        timebase.tick(&mut handler);
        done.extend(handler.done);
    }
    done
}

#[test]
fn circumference_calibration_is_range_checked_and_persisted() {
    let mut store = RamStore::new();
    let (mut motion, _timebase) = setup(&mut store);
    motion.set_speed(100).unwrap();
    let rate_before = motion.target_rate(Wheel::Left);

    assert_eq!(
        motion.set_wheel_circumference(179, &mut store),
        Err(MotionError::InvalidCircumference(179))
    );
    assert_eq!(motion.target_rate(Wheel::Left), rate_before);

    motion.set_wheel_circumference(200, &mut store).unwrap();
    assert!(motion.target_rate(Wheel::Left) > rate_before);
    assert_eq!(store.read(MOTION_BLOCK), 200);

    let mut timebase = Timebase::<u8, 4>::new();
    timebase.init(BaseTime::Ms50, 4).unwrap();
    let mut restarted = Controller::new(LatchedMotorDriver::new());
    restarted.init(&mut store, &mut timebase, 0).unwrap();
    assert_eq!(restarted.wheel_circumference_mm(), 200);
}

#[test]
fn rotate_drives_wheels_in_opposite_directions() {
    let mut store = RamStore::new();
    let (mut motion, _timebase) = setup(&mut store);

    motion.rotate(90, 50, Done::Rotate).unwrap();
    assert_eq!(motion.speed_left(), 50);
    assert_eq!(motion.speed_right(), -50);
    assert_eq!(motion.direction_bits(Wheel::Left), DirectionBits::FORWARD);
    assert_eq!(motion.direction_bits(Wheel::Right), DirectionBits::BACKWARD);

    let ticks = motion.remaining_pulses(Wheel::Left);
    assert!(ticks > 0);
    assert_eq!(ticks, motion.remaining_pulses(Wheel::Right));

    motion.rotate(-90, 50, Done::Rotate).unwrap();
    assert_eq!(motion.speed_left(), -50);
    assert_eq!(motion.speed_right(), 50);
}

#[test]
fn move_completes_exactly_once() {
    let mut store = RamStore::new();
    let (mut motion, mut timebase) = setup(&mut store);

    motion.move_distance(300, 80, Done::Move).unwrap();
    let done = drive(&mut motion, &mut timebase, 40);

    assert_eq!(done, [Done::Move]);
    assert_eq!(motion.speed_left(), 0);
    assert_eq!(motion.speed_right(), 0);
    assert_eq!(motion.driver().bits(Wheel::Left), DirectionBits::BRAKE);
    assert_eq!(motion.driver().duty(Wheel::Right), 0);
}

#[test]
fn speed_regulation_stays_within_duty_bounds() {
    let mut store = RamStore::new();
    let (mut motion, mut timebase) = setup(&mut store);

    motion.set_speed(200).unwrap();
    // No pulses at all: duty climbs to the ceiling and stays there.
    for _ in 0..300 {
        let mut handler = Regulation {
            motion: &mut motion,
            done: Vec::new(),
        };
        timebase.tick(&mut handler);
    }
    assert_eq!(motion.duty(Wheel::Left), 40_000);
    assert_eq!(motion.duty(Wheel::Right), 40_000);
}
