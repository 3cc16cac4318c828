use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use discbot_core::button::{ALL_RELEASED, Button};
use discbot_core::color::{Color, ColorFrame, ColorSampler};
use discbot_core::lights::{LampFrame, LightBar};
use discbot_core::motion::{
    DEFAULT_CIRCUMFERENCE_MM, DirectionBits, MIN_DUTY, MotorDriver, PULSES_PER_ROTATION, Wheel,
};
use discbot_core::range::{RangeKind, RangeSampler, RangeSensors, SIDE_COUNT, Side};
use discbot_core::repl::commands::CommandExecutor;
use discbot_core::repl::grammar::{self, HostCommand};
use discbot_core::rfid::{CardReader, CardUid};
use discbot_core::robot::DiscBot;
use discbot_core::storage::RamStore;
use discbot_core::telemetry::EventId;
use discbot_core::timebase::BaseTime;
use discbot_core::tune::Speaker;

/// Duty above [`MIN_DUTY`] that yields one encoder pulse per millisecond.
pub const DUTY_PER_PULSE: u32 = 3_600;

/// Distance between floor colour changes, in left encoder pulses.
pub const TILE_PULSES: u32 = 120;

/// Longest single `run` accepted, one simulated minute.
pub const MAX_RUN_MS: u32 = 60_000;

pub const HOST_HELP: &[&str] = &[
    "run <ms>                advance simulated time",
    "press|release <button>  change a button level (red, green, blue)",
    "tag <hex>|none          place a card on the reader or take it away",
    "exit                    leave the emulator",
];

/// Wall ahead of the robot at start-up; the other sides are open.
pub const WALL_MM: u32 = 1_500;

/// Alternating floor tiles seen by all three colour sensors.
const FLOOR: [Color; 2] = [Color::rgb(14, 14, 14), Color::rgb(2, 2, 3)];

pub type SimBot = DiscBot<SimDrivetrain, RamStore<512>, SimColorSampler, SimAccessories>;

/// H-bridge and motors: each wheel turns at a pulse rate proportional to the
/// duty above [`MIN_DUTY`] while the bridge drives it in either direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimDrivetrain {
    duty: [u16; 2],
    bits: [DirectionBits; 2],
    accumulated: [u32; 2],
    odometer: [u32; 2],
}

impl SimDrivetrain {
    pub const fn new() -> Self {
        Self {
            duty: [0; 2],
            bits: [DirectionBits::COAST; 2],
            accumulated: [0; 2],
            odometer: [0; 2],
        }
    }

    /// Advances one millisecond and returns the encoder pulses per wheel.
    pub fn advance_ms(&mut self) -> [u32; 2] {
        let mut pulses = [0; 2];
        for wheel in Wheel::BOTH {
            let index = wheel.index();
            let driving = matches!(
                self.bits[index],
                DirectionBits::FORWARD | DirectionBits::BACKWARD
            );
            if !driving {
                self.accumulated[index] = 0;
                continue;
            }

            self.accumulated[index] += u32::from(self.duty[index].saturating_sub(MIN_DUTY));
            pulses[index] = self.accumulated[index] / DUTY_PER_PULSE;
            self.accumulated[index] %= DUTY_PER_PULSE;
            self.odometer[index] += pulses[index];
        }
        pulses
    }

    /// Pulses counted since start-up, regardless of direction.
    pub const fn odometer(&self, wheel: Wheel) -> u32 {
        self.odometer[wheel.index()]
    }

    pub const fn bits(&self, wheel: Wheel) -> DirectionBits {
        self.bits[wheel.index()]
    }
}

impl Default for SimDrivetrain {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorDriver for SimDrivetrain {
    fn set_duty(&mut self, wheel: Wheel, duty: u16) {
        self.duty[wheel.index()] = duty;
    }

    fn set_direction(&mut self, wheel: Wheel, bits: DirectionBits) {
        self.bits[wheel.index()] = bits;
    }
}

/// Counts conversion requests; the session answers each with a frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimColorSampler {
    pending: u32,
}

impl ColorSampler for SimColorSampler {
    fn trigger(&mut self) {
        self.pending += 1;
    }
}

/// Sensor requests waiting for the session, plus the latest buzzer and
/// lamp output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimAccessories {
    pings: RangeSensors,
    scans: u32,
    tone: Option<u16>,
    frame: LampFrame,
}

impl RangeSampler for SimAccessories {
    fn ping(&mut self, sensors: RangeSensors) {
        self.pings = self.pings.union(sensors);
    }
}

impl CardReader for SimAccessories {
    fn scan(&mut self) {
        self.scans += 1;
    }
}

impl Speaker for SimAccessories {
    fn sound(&mut self, hz: u16) {
        self.tone = Some(hz);
    }

    fn mute(&mut self) {
        self.tone = None;
    }
}

impl LightBar for SimAccessories {
    fn show(&mut self, frame: &LampFrame) {
        self.frame = *frame;
    }
}

/// Echo from the wall ahead after `pulses` of travel, `None` once it
/// has been reached.
pub fn wall_echo_mm(pulses: u32) -> Option<u16> {
    let travelled = pulses * u32::from(DEFAULT_CIRCUMFERENCE_MM) / PULSES_PER_ROTATION;
    WALL_MM
        .checked_sub(travelled)
        .and_then(|mm| u16::try_from(mm).ok())
}

/// Floor frame under the robot after `pulses` of travel.
pub fn floor_frame(pulses: u32) -> ColorFrame {
    let tile = if (pulses / TILE_PULSES) % 2 == 0 {
        FLOOR[0]
    } else {
        FLOOR[1]
    };
    ColorFrame::new(tile, tile, tile)
}

/// One emulated robot plus the console around it.
pub struct Session {
    bot: SimBot,
    base_ms: u32,
    now_ms: u64,
    levels: u8,
    tag: Option<CardUid>,
    /// Accessory outputs as last reported to the console.
    reported: SimAccessories,
    telemetry_cursor: EventId,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(base: BaseTime, transcript: Option<TranscriptLogger>) -> io::Result<Self> {
        let mut bot = SimBot::new(
            SimDrivetrain::new(),
            RamStore::new(),
            SimColorSampler::default(),
            SimAccessories::default(),
        );
        bot.init(base, ALL_RELEASED)
            .map_err(|error| io::Error::other(error.to_string()))?;

        Ok(Self {
            bot,
            base_ms: u32::from(base.as_millis()),
            now_ms: 0,
            levels: ALL_RELEASED,
            tag: None,
            reported: SimAccessories::default(),
            telemetry_cursor: 0,
            transcript,
        })
    }

    /// Handles one console line and returns the reply lines.
    pub fn handle_line(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.log(TranscriptRole::Host, trimmed)?;

        let lines = match grammar::parse_host(trimmed) {
            Ok(command) => self.handle_host(command),
            Err(_) => self.handle_robot(trimmed),
        };
        for reply in &lines {
            self.log(TranscriptRole::Emulator, reply)?;
        }
        Ok(lines)
    }

    fn handle_host(&mut self, command: HostCommand) -> Vec<String> {
        match command {
            HostCommand::Run(ms) if ms > MAX_RUN_MS => {
                vec![format!("ERR run is limited to {MAX_RUN_MS} ms")]
            }
            HostCommand::Run(ms) => {
                self.run_for(ms);
                let mut lines = self.new_events();
                lines.extend(self.output_changes());
                lines.push(format!("t={}ms", self.now_ms));
                lines
            }
            HostCommand::Press(button) => self.set_button(button, true),
            HostCommand::Release(button) => self.set_button(button, false),
            HostCommand::Tag(tag) => {
                self.tag = tag;
                match tag {
                    Some(uid) => vec![format!("card {uid:08x} on the reader")],
                    None => vec!["reader empty".to_owned()],
                }
            }
        }
    }

    fn handle_robot(&mut self, line: &str) -> Vec<String> {
        let mut out = String::new();
        let result = CommandExecutor::new(&mut self.bot).execute(line, &mut out);
        let mut lines: Vec<String> = out.lines().map(str::to_owned).collect();
        match result {
            Ok(()) if grammar::parse(line) == Ok(grammar::Command::Help) => {
                lines.extend(HOST_HELP.iter().map(|line| (*line).to_owned()));
            }
            Ok(()) => {}
            Err(error) => lines.push(format!("ERR {error}")),
        }
        lines.extend(self.new_events());
        lines.extend(self.output_changes());
        lines
    }

    fn set_button(&mut self, button: Button, pressed: bool) -> Vec<String> {
        if pressed {
            self.levels &= !button.mask();
        } else {
            self.levels |= button.mask();
        }
        self.bot.on_button_levels(self.levels);
        let mut lines = self.new_events();
        if lines.is_empty() {
            lines.push(format!("{button} level noted, debounce pending"));
        }
        lines
    }

    /// Advances simulated time millisecond by millisecond.
    pub fn run_for(&mut self, ms: u32) {
        for _ in 0..ms {
            let pulses = self.bot.motion_mut().driver_mut().advance_ms();
            for wheel in Wheel::BOTH {
                for _ in 0..pulses[wheel.index()] {
                    self.bot.on_encoder_pulse(wheel);
                }
            }

            self.now_ms += 1;
            if self.now_ms % u64::from(self.base_ms) == 0 {
                self.bot.tick();
                self.serve_color_requests();
                self.serve_accessory_requests();
                // Telemetry already carries these.
                let _ = self.bot.take_completions();
                let _ = self.bot.take_button_events();
            }
        }
    }

    fn serve_color_requests(&mut self) {
        let sampler = self.bot.sampler_mut();
        let requests = std::mem::take(&mut sampler.pending);
        if requests == 0 {
            return;
        }
        let travelled = self.bot.motion().driver().odometer(Wheel::Left);
        for _ in 0..requests {
            self.bot.on_color_frame(floor_frame(travelled));
        }
    }

    fn serve_accessory_requests(&mut self) {
        let accessories = self.bot.accessories_mut();
        let pings = std::mem::take(&mut accessories.pings);
        let scans = std::mem::take(&mut accessories.scans);

        if pings.intersects(RangeSensors::ULTRASONIC) {
            let travelled = self.bot.motion().driver().odometer(Wheel::Left);
            let echoes = Side::ALL.map(|side| match side {
                Side::Front if pings.contains(RangeKind::Ultrasonic, side) => {
                    wall_echo_mm(travelled)
                }
                _ => None,
            });
            self.bot.on_ultrasonic(echoes);
        }
        // No infrared sensors are modelled.
        if pings.intersects(RangeSensors::INFRARED) {
            self.bot.on_infrared([None; SIDE_COUNT]);
        }
        for _ in 0..scans {
            self.bot.on_card_scan(self.tag);
        }
    }

    /// Telemetry recorded since the previous call, one line per record.
    fn new_events(&mut self) -> Vec<String> {
        let telemetry = self.bot.telemetry();
        let lines = telemetry
            .records_since(self.telemetry_cursor)
            .map(|record| format!("event {record}"))
            .collect();
        self.telemetry_cursor = telemetry.cursor();
        lines
    }

    /// Buzzer and lamp changes since the previous call.
    fn output_changes(&mut self) -> Vec<String> {
        let current = *self.bot.accessories();
        let mut lines = Vec::new();
        if current.tone != self.reported.tone {
            lines.push(match current.tone {
                Some(hz) => format!("buzzer {hz}Hz"),
                None => "buzzer off".to_owned(),
            });
        }
        if current.frame != self.reported.frame {
            let lit = current.frame.lamps.iter().filter(|lamp| lamp.is_lit()).count();
            lines.push(format!("lamps {lit} lit"));
        }
        self.reported = current;
        lines
    }

    pub const fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn bot(&self) -> &SimBot {
        &self.bot
    }

    fn log(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        let now_ms = self.now_ms;
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(now_ms, role, line),
            None => Ok(()),
        }
    }
}

/// Writes the console exchange to a file, stamped with simulated time.
pub struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# DiscBot emulator transcript")?;
        writeln!(self.writer, "# Timestamps are simulated milliseconds")?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, now_ms: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[{now_ms:>8} ms] {} {}", role.prefix(), line)?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discbot_core::motion::MAX_DUTY;

    fn session() -> Session {
        Session::new(BaseTime::Ms10, None).unwrap()
    }

    #[test]
    fn drivetrain_pulse_rate_follows_duty() {
        let mut drivetrain = SimDrivetrain::new();
        drivetrain.set_duty(Wheel::Left, MAX_DUTY);
        drivetrain.set_direction(Wheel::Left, DirectionBits::FORWARD);
        drivetrain.set_duty(Wheel::Right, MAX_DUTY);
        drivetrain.set_direction(Wheel::Right, DirectionBits::BRAKE);

        let mut total = [0; 2];
        for _ in 0..100 {
            let pulses = drivetrain.advance_ms();
            total[0] += pulses[0];
            total[1] += pulses[1];
        }

        assert_eq!(total, [1000, 0]);
        assert_eq!(drivetrain.odometer(Wheel::Left), 1000);
    }

    #[test]
    fn idle_duty_produces_no_pulses() {
        let mut drivetrain = SimDrivetrain::new();
        drivetrain.set_duty(Wheel::Left, MIN_DUTY);
        drivetrain.set_direction(Wheel::Left, DirectionBits::BACKWARD);
        assert_eq!(drivetrain.advance_ms(), [0, 0]);
    }

    #[test]
    fn move_completes_under_simulation() {
        let mut session = session();
        session.handle_line("move 100 100").unwrap();
        session.run_for(5_000);

        let log = session.handle_line("events").unwrap();
        assert!(
            log.iter().any(|line| line.contains("motion-done move")),
            "{log:?}"
        );
        assert_eq!(
            session.bot().motion().driver().bits(Wheel::Left),
            DirectionBits::BRAKE
        );
    }

    #[test]
    fn robot_commands_reply_through_executor() {
        let mut session = session();
        assert_eq!(
            session.handle_line("speed 40").unwrap(),
            ["speed=40 dir=0 left=40 right=40"]
        );
        assert!(session.handle_line("bogus").unwrap()[0].starts_with("ERR syntax error"));
    }

    #[test]
    fn buttons_debounce_in_simulated_time() {
        let mut session = session();
        let pressed = session.handle_line("press green").unwrap();
        assert!(pressed[0].contains("button-pressed green"), "{pressed:?}");

        let bounced = session.handle_line("release green").unwrap();
        assert_eq!(bounced, ["green level noted, debounce pending"]);

        let after = session.handle_line("run 150").unwrap();
        assert!(after[0].contains("button-released green"), "{after:?}");
        assert_eq!(session.now_ms(), 150);
    }

    #[test]
    fn measurement_sees_the_floor() {
        let mut session = session();
        session.run_for(10);
        session.handle_line("measure 20").unwrap();
        session.run_for(40);
        assert_eq!(
            session.handle_line("color learn").unwrap()[0],
            "learned colour #0"
        );

        session.run_for(40);
        let status = session.handle_line("status").unwrap();
        assert!(status[3].contains("colors=0,0,0"), "{status:?}");
    }

    #[test]
    fn front_range_shrinks_while_driving() {
        let mut session = session();
        session.handle_line("range 100 sonar").unwrap();
        session.run_for(200);
        let before = session.bot().ranges().distances().get(Side::Front);
        assert_eq!(before, 150);

        session.handle_line("speed 50").unwrap();
        session.run_for(2_000);
        let after = session.bot().ranges().distances().get(Side::Front);
        assert!(after < before, "{after}");

        let status = session.handle_line("status").unwrap();
        assert!(
            status.iter().any(|line| line.contains("range=100ms")),
            "{status:?}"
        );
    }

    #[test]
    fn tagged_card_is_detected_once() {
        let mut session = session();
        session.handle_line("card detect 50").unwrap();
        assert_eq!(
            session.handle_line("tag cafe0001").unwrap(),
            ["card cafe0001 on the reader"]
        );

        let seen = session.handle_line("run 200").unwrap();
        let detections = seen
            .iter()
            .filter(|line| line.contains("card-detected cafe0001 unknown"))
            .count();
        assert_eq!(detections, 1, "{seen:?}");

        let learned = session.handle_line("card learn").unwrap();
        assert_eq!(learned[0], "learned card #0");
        assert!(learned[1].ends_with("card-registered cafe0001 #0"), "{learned:?}");
        session.handle_line("tag none").unwrap();
        session.run_for(100);
        assert_eq!(session.bot().cards().present(), None);
    }

    #[test]
    fn beep_drives_the_buzzer() {
        let mut session = session();
        assert_eq!(
            session.handle_line("play beep").unwrap(),
            ["playing beep", "buzzer 1047Hz"]
        );

        let log = session.handle_line("run 500").unwrap();
        assert!(log.iter().any(|line| line.contains("tune-finished")), "{log:?}");
        assert_eq!(log[log.len() - 2], "buzzer off");
        assert_eq!(session.bot().accessories().tone, None);
    }

    #[test]
    fn indicator_blink_is_reported() {
        let mut session = session();
        assert_eq!(
            session.handle_line("indicator both").unwrap(),
            ["indicator both"]
        );
        let log = session.handle_line("run 400").unwrap();
        assert_eq!(log, ["lamps 4 lit", "t=400ms"]);
    }

    #[test]
    fn wall_echo_reaches_zero() {
        assert_eq!(wall_echo_mm(0), Some(1_500));
        assert_eq!(wall_echo_mm(PULSES_PER_ROTATION), Some(1_283));
        assert_eq!(wall_echo_mm(10_000), None);
    }

    #[test]
    fn overlong_run_is_refused() {
        let mut session = session();
        let reply = session.handle_line("run 600000").unwrap();
        assert!(reply[0].starts_with("ERR run"));
        assert_eq!(session.now_ms(), 0);
    }
}
