use discbot_core::button::{ALL_RELEASED, Button};
use discbot_core::color::{Color, ColorFrame, ColorSampler};
use discbot_core::lights::{Lamp, LampFrame, LightBar, Rgb};
use discbot_core::motion::{LatchedMotorDriver, Wheel};
use discbot_core::range::{RangeSampler, RangeSensors, Side};
use discbot_core::repl::commands::CommandExecutor;
use discbot_core::rfid::CardReader;
use discbot_core::robot::{DiscBot, MotionDone, Task};
use discbot_core::storage::RamStore;
use discbot_core::telemetry::TelemetryEventKind;
use discbot_core::timebase::BaseTime;
use discbot_core::tune::{Speaker, pitch};

#[derive(Default)]
struct CountingSampler {
    triggered: usize,
}

impl ColorSampler for CountingSampler {
    fn trigger(&mut self) {
        self.triggered += 1;
    }
}

/// Records what the robot asked of its peripherals.
#[derive(Default)]
struct Bench {
    pings: Vec<RangeSensors>,
    scans: usize,
    tone: Option<u16>,
    frame: Option<LampFrame>,
}

impl RangeSampler for Bench {
    fn ping(&mut self, sensors: RangeSensors) {
        self.pings.push(sensors);
    }
}

impl CardReader for Bench {
    fn scan(&mut self) {
        self.scans += 1;
    }
}

impl Speaker for Bench {
    fn sound(&mut self, hz: u16) {
        self.tone = Some(hz);
    }

    fn mute(&mut self) {
        self.tone = None;
    }
}

impl LightBar for Bench {
    fn show(&mut self, frame: &LampFrame) {
        self.frame = Some(*frame);
    }
}

type Bot = DiscBot<LatchedMotorDriver, RamStore<512>, CountingSampler, Bench>;

fn bot() -> Bot {
    let mut bot = Bot::new(
        LatchedMotorDriver::new(),
        RamStore::new(),
        CountingSampler::default(),
        Bench::default(),
    );
    bot.init(BaseTime::Ms10, ALL_RELEASED).unwrap();
    bot
}

/// Advances `ms` milliseconds, feeding encoder pulses at each wheel's target
/// rate spread over the regulation period.
fn run(bot: &mut Bot, ms: u32) {
    for _ in 0..ms / 10 {
        for wheel in Wheel::BOTH {
            let per_tick = bot.motion().target_rate(wheel).div_ceil(5);
            for _ in 0..per_tick {
                bot.on_encoder_pulse(wheel);
            }
        }
        bot.tick();
    }
}

fn console(bot: &mut Bot, line: &str) -> String {
    let mut out = String::new();
    CommandExecutor::new(bot).execute(line, &mut out).unwrap();
    out
}

fn console_error(bot: &mut Bot, line: &str) -> bool {
    let mut out = String::new();
    CommandExecutor::new(bot).execute(line, &mut out).is_err()
}

#[test]
fn maneuvers_report_completion_in_order() {
    let mut bot = bot();
    bot.move_distance(200, 60).unwrap();
    run(&mut bot, 3_000);
    assert_eq!(bot.take_completions().as_slice(), &[MotionDone::Move]);

    bot.rotate(-45, 40).unwrap();
    run(&mut bot, 3_000);
    assert_eq!(bot.take_completions().as_slice(), &[MotionDone::Rotate]);

    let events: Vec<_> = bot
        .telemetry()
        .oldest_first()
        .map(|record| record.event)
        .collect();
    assert_eq!(
        events,
        [
            TelemetryEventKind::MotionDone(MotionDone::Move),
            TelemetryEventKind::MotionDone(MotionDone::Rotate),
        ]
    );
}

#[test]
fn new_command_abandons_running_maneuver() {
    let mut bot = bot();
    bot.move_distance(1_000, 60).unwrap();
    run(&mut bot, 200);
    console(&mut bot, "speed 0");
    run(&mut bot, 3_000);
    assert!(bot.take_completions().is_empty());
}

#[test]
fn buttons_debounce_while_robot_drives() {
    let mut bot = bot();
    console(&mut bot, "speed 50");

    let blue = ALL_RELEASED & !Button::Blue.mask();
    bot.on_button_levels(blue);
    run(&mut bot, 30);
    bot.on_button_levels(ALL_RELEASED);
    bot.on_button_levels(blue);
    run(&mut bot, 100);

    let events = bot.take_button_events();
    assert_eq!(events.len(), 1);
    assert!(bot.buttons().is_pressed(Button::Blue));
    assert!(bot.buttons().is_armed());
}

#[test]
fn colour_measurement_triggers_sampler_and_classifies() {
    let mut bot = bot();
    console(&mut bot, "measure 50");
    run(&mut bot, 200);
    assert_eq!(bot.sampler_mut().triggered, 4);

    let green = Color::rgb(1, 14, 2);
    bot.on_color_frame(ColorFrame::new(green, green, green));
    assert_eq!(console(&mut bot, "color learn"), "learned colour #0\r\n");

    let report = bot.on_color_frame(ColorFrame::new(green, Color::rgb(15, 0, 0), green));
    assert!(report.changed);
    assert_eq!(
        report.classification.indexes,
        [Some(0), None, Some(0)]
    );

    console(&mut bot, "measure stop");
    run(&mut bot, 200);
    assert_eq!(bot.sampler_mut().triggered, 4);
}

#[test]
fn timers_command_shows_every_owner() {
    let mut bot = bot();
    console(&mut bot, "measure 20");
    bot.on_button_levels(0);
    run(&mut bot, 10);

    let dump = console(&mut bot, "timers");
    let owners: Vec<_> = bot.timebase().occupied().map(|slot| slot.task).collect();
    assert_eq!(
        owners,
        [Task::Regulate, Task::ColorMeasure, Task::ButtonDebounce]
    );
    assert_eq!(dump.lines().count(), 3);
    assert!(dump.contains("debounce active every 100ms"));
}

#[test]
fn periodic_ranging_pings_and_reports_changes() {
    let mut bot = bot();
    assert_eq!(console(&mut bot, "range 100 sonar"), "ranging every 100ms\r\n");
    run(&mut bot, 300);
    assert_eq!(bot.accessories().pings, [RangeSensors::ULTRASONIC; 3]);

    bot.on_ultrasonic([None, None, None, Some(420)]);
    assert_eq!(bot.ranges().distances().get(Side::Front), 42);
    assert_eq!(
        console(&mut bot, "range show"),
        "front=42 back=- left=- right=-\r\n"
    );
    assert!(
        bot.telemetry()
            .oldest_first()
            .any(|record| record.event == TelemetryEventKind::RangeChanged)
    );

    console(&mut bot, "range stop");
    run(&mut bot, 300);
    assert_eq!(bot.accessories().pings.len(), 3);
}

#[test]
fn beep_sounds_then_finishes() {
    let mut bot = bot();
    assert_eq!(console(&mut bot, "play beep"), "playing beep\r\n");
    assert_eq!(bot.accessories().tone, Some(pitch::C6));

    run(&mut bot, 500);
    assert_eq!(bot.accessories().tone, None);
    assert!(!bot.tunes().is_playing());
    assert!(
        bot.telemetry()
            .oldest_first()
            .any(|record| record.event == TelemetryEventKind::TuneFinished)
    );
    assert_eq!(bot.timebase().occupied().count(), 1);
}

#[test]
fn cards_are_polled_and_learned_from_the_console() {
    let mut bot = bot();
    console(&mut bot, "card detect 100");
    run(&mut bot, 200);
    assert_eq!(bot.accessories().scans, 2);

    assert!(console_error(&mut bot, "card learn"));
    bot.on_card_scan(Some(0xDEAD_BEEF));
    assert_eq!(console(&mut bot, "card learn"), "learned card #0\r\n");
    assert_eq!(
        console(&mut bot, "card show"),
        "1 cards\r\n#0 deadbeef\r\n"
    );
}

#[test]
fn indicator_blinks_the_outer_lamps() {
    let mut bot = bot();
    console(&mut bot, "indicator left");
    let lit = |bot: &Bot| {
        bot.accessories()
            .frame
            .is_some_and(|frame| frame.get(Lamp::FrontLeftOut) == Rgb::AMBER)
    };
    assert!(!lit(&bot));

    run(&mut bot, 400);
    assert!(lit(&bot));
    run(&mut bot, 400);
    assert!(!lit(&bot));
    run(&mut bot, 400);
    assert!(lit(&bot));

    console(&mut bot, "indicator off");
    assert!(!lit(&bot));
}
