//! Console command dispatcher.
//!
//! Glues parsed commands to the robot context and renders the replies. It
//! stays `no_std` friendly so the firmware and emulator share it.

use core::fmt;

use crate::color::ColorSampler;
use crate::motion::{MotorDriver, Wheel};
use crate::robot::{Accessories, BotError, DiscBot};
use crate::storage::NvStore;

use super::grammar::{self, CardCommand, ColorCommand, Command, HELP, RangeCommand};
use super::status::{StatusFormatter, StatusSnapshot, write_timers};

/// Errors surfaced while executing a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandError {
    Parse(grammar::ParseError),
    Bot(BotError),
    /// The reply did not fit the output sink.
    Output,
}

impl From<grammar::ParseError> for CommandError {
    fn from(error: grammar::ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<BotError> for CommandError {
    fn from(error: BotError) -> Self {
        Self::Bot(error)
    }
}

impl From<fmt::Error> for CommandError {
    fn from(_: fmt::Error) -> Self {
        Self::Output
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => fmt::Display::fmt(error, f),
            CommandError::Bot(error) => fmt::Display::fmt(error, f),
            CommandError::Output => f.write_str("reply truncated"),
        }
    }
}

/// Dispatches console commands into a robot.
pub struct CommandExecutor<'a, M, S, C, A, const SLOTS: usize> {
    bot: &'a mut DiscBot<M, S, C, A, SLOTS>,
}

impl<'a, M, S, C, A, const SLOTS: usize> CommandExecutor<'a, M, S, C, A, SLOTS>
where
    M: MotorDriver,
    S: NvStore,
    C: ColorSampler,
    A: Accessories,
{
    pub fn new(bot: &'a mut DiscBot<M, S, C, A, SLOTS>) -> Self {
        Self { bot }
    }

    /// Parses and executes one line, writing the reply to `out`. Blank
    /// lines are accepted and produce no output.
    ///
    /// # Errors
    ///
    /// Returns parse errors, rejected robot operations and output overflow.
    pub fn execute<W: fmt::Write>(&mut self, line: &str, out: &mut W) -> Result<(), CommandError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let command = grammar::parse(line)?;
        self.dispatch(command, out)
    }

    /// Executes an already parsed command.
    ///
    /// # Errors
    ///
    /// Returns rejected robot operations and output overflow.
    pub fn dispatch<W: fmt::Write>(
        &mut self,
        command: Command,
        out: &mut W,
    ) -> Result<(), CommandError> {
        match command {
            Command::Speed(speed) => {
                self.bot.motion_mut().set_speed(speed).map_err(BotError::from)?;
                self.write_drive(out)
            }
            Command::Direction(direction) => {
                self.bot
                    .motion_mut()
                    .set_direction(direction)
                    .map_err(BotError::from)?;
                self.write_drive(out)
            }
            Command::Drive { speed, direction } => {
                self.bot
                    .motion_mut()
                    .set_speed_and_direction(speed, direction)
                    .map_err(BotError::from)?;
                self.write_drive(out)
            }
            Command::Wheel { wheel, speed } => {
                self.bot
                    .motion_mut()
                    .set_wheel_speed(wheel, speed)
                    .map_err(BotError::from)?;
                self.write_drive(out)
            }
            Command::Brake(wheel) => {
                self.bot.brake(wheel)?;
                match wheel {
                    Some(wheel) => write!(out, "braking {wheel}\r\n")?,
                    None => out.write_str("braking\r\n")?,
                }
                Ok(())
            }
            Command::Move { distance_mm, speed } => {
                self.bot.move_distance(distance_mm, speed)?;
                let motion = self.bot.motion();
                write!(
                    out,
                    "moving {distance_mm}mm at {} ({} pulses)\r\n",
                    motion.speed(),
                    motion.remaining_pulses(Wheel::Left)
                )?;
                Ok(())
            }
            Command::Rotate { angle_deg, speed } => {
                self.bot.rotate(angle_deg, speed)?;
                write!(
                    out,
                    "rotating {angle_deg}deg ({} pulses)\r\n",
                    self.bot.motion().remaining_pulses(Wheel::Left)
                )?;
                Ok(())
            }
            Command::Circumference(value) => {
                if let Some(mm) = value {
                    self.bot.set_wheel_circumference(mm)?;
                }
                write!(
                    out,
                    "circumference {}mm\r\n",
                    self.bot.motion().wheel_circumference_mm()
                )?;
                Ok(())
            }
            Command::Measure(Some(period)) => {
                self.bot.start_measuring(period)?;
                write!(out, "measuring every {period}ms\r\n")?;
                Ok(())
            }
            Command::Measure(None) => {
                self.bot.stop_measuring()?;
                out.write_str("measuring stopped\r\n")?;
                Ok(())
            }
            Command::Color(action) => self.handle_color(action, out),
            Command::Range(action) => self.handle_range(action, out),
            Command::Card(action) => self.handle_card(action, out),
            Command::Play(Some(request)) => {
                self.bot
                    .play(request.tune.notes(), request.mode, request.repeat)?;
                write!(out, "playing {}\r\n", request.tune.label())?;
                Ok(())
            }
            Command::Play(None) => {
                self.bot.stop_tune()?;
                out.write_str("tune stopped\r\n")?;
                Ok(())
            }
            Command::Buzz(Some(hz)) => {
                self.bot.buzz(hz)?;
                write!(out, "buzzing {hz}Hz\r\n")?;
                Ok(())
            }
            Command::Buzz(None) => {
                self.bot.quiet()?;
                out.write_str("buzzer off\r\n")?;
                Ok(())
            }
            Command::Light { light, on } => {
                self.bot.set_light(light, on);
                write!(out, "{} {}\r\n", light.label(), if on { "on" } else { "off" })?;
                Ok(())
            }
            Command::Indicator(indicator) => {
                self.bot.set_indicator(indicator)?;
                write!(out, "indicator {}\r\n", indicator.label())?;
                Ok(())
            }
            Command::Status => {
                let snapshot = StatusSnapshot::capture(self.bot);
                StatusFormatter::new(&snapshot).write_all(out)?;
                Ok(())
            }
            Command::Timers => {
                write_timers(self.bot.timebase(), out)?;
                Ok(())
            }
            Command::Events => {
                let telemetry = self.bot.telemetry();
                if telemetry.is_empty() {
                    out.write_str("no events\r\n")?;
                }
                for record in telemetry.oldest_first() {
                    write!(out, "{record}\r\n")?;
                }
                Ok(())
            }
            Command::Help => {
                for line in HELP {
                    out.write_str(line)?;
                    out.write_str("\r\n")?;
                }
                Ok(())
            }
        }
    }

    fn handle_color<W: fmt::Write>(
        &mut self,
        action: ColorCommand,
        out: &mut W,
    ) -> Result<(), CommandError> {
        match action {
            ColorCommand::Learn => {
                let index = self.bot.learn_color()?;
                write!(out, "learned colour #{index}\r\n")?;
            }
            ColorCommand::Clear => {
                self.bot.clear_colors();
                out.write_str("colours cleared\r\n")?;
            }
            ColorCommand::Quality(quality) => {
                self.bot.colors_mut().set_min_quality(quality);
                write!(out, "minimum quality {quality}\r\n")?;
            }
            ColorCommand::Show => {
                let colors = self.bot.colors();
                write!(
                    out,
                    "{} references, minimum quality {}\r\n",
                    colors.references().len(),
                    colors.min_quality()
                )?;
                for (index, reference) in colors.references().iter().enumerate() {
                    write!(out, "#{index}")?;
                    for color in reference.sensors {
                        write!(out, " {}/{}/{}", color.red, color.green, color.blue)?;
                    }
                    out.write_str("\r\n")?;
                }
            }
        }
        Ok(())
    }

    fn handle_range<W: fmt::Write>(
        &mut self,
        action: RangeCommand,
        out: &mut W,
    ) -> Result<(), CommandError> {
        match action {
            RangeCommand::Once(sensors) => {
                self.bot.measure_range(sensors)?;
                out.write_str("ranging once\r\n")?;
            }
            RangeCommand::Every(period, sensors) => {
                self.bot.start_ranging(sensors, period)?;
                write!(out, "ranging every {period}ms\r\n")?;
            }
            RangeCommand::Stop => {
                self.bot.stop_ranging()?;
                out.write_str("ranging stopped\r\n")?;
            }
            RangeCommand::Show => {
                write!(out, "{}\r\n", self.bot.ranges().distances())?;
            }
        }
        Ok(())
    }

    fn handle_card<W: fmt::Write>(
        &mut self,
        action: CardCommand,
        out: &mut W,
    ) -> Result<(), CommandError> {
        match action {
            CardCommand::Detect(period) => {
                self.bot.start_card_detection(period)?;
                write!(out, "detecting cards every {period}ms\r\n")?;
            }
            CardCommand::Stop => {
                self.bot.stop_card_detection()?;
                out.write_str("card detection stopped\r\n")?;
            }
            CardCommand::Learn => {
                let index = self.bot.register_card()?;
                write!(out, "learned card #{index}\r\n")?;
            }
            CardCommand::Clear => {
                self.bot.clear_cards();
                out.write_str("cards cleared\r\n")?;
            }
            CardCommand::Show => {
                let cards = self.bot.cards();
                write!(out, "{} cards\r\n", cards.cards().len())?;
                for (index, uid) in cards.cards().iter().enumerate() {
                    write!(out, "#{index} {uid:08x}\r\n")?;
                }
            }
        }
        Ok(())
    }

    fn write_drive<W: fmt::Write>(&self, out: &mut W) -> Result<(), CommandError> {
        let motion = self.bot.motion();
        write!(
            out,
            "speed={} dir={} left={} right={}\r\n",
            motion.speed(),
            motion.direction(),
            motion.speed_left(),
            motion.speed_right()
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::String;

    use super::*;
    use crate::button::ALL_RELEASED;
    use crate::color::NoopColorSampler;
    use crate::motion::{LatchedMotorDriver, MotionError};
    use crate::range::RangeError;
    use crate::robot::NoAccessories;
    use crate::storage::RamStore;
    use crate::timebase::{BaseTime, TimebaseError};

    type Bot = DiscBot<LatchedMotorDriver, RamStore<512>, NoopColorSampler>;

    fn bot() -> Bot {
        let mut bot = Bot::new(
            LatchedMotorDriver::new(),
            RamStore::new(),
            NoopColorSampler,
            NoAccessories,
        );
        bot.init(BaseTime::Ms10, ALL_RELEASED).unwrap();
        bot
    }

    fn run(bot: &mut Bot, line: &str) -> Result<String, CommandError> {
        let mut out = String::new();
        CommandExecutor::new(bot).execute(line, &mut out)?;
        Ok(out)
    }

    #[test]
    fn drive_commands_report_wheel_split() {
        let mut bot = bot();
        assert_eq!(
            run(&mut bot, "drive 100 25").unwrap(),
            "speed=100 dir=25 left=50 right=100\r\n"
        );
        assert_eq!(
            run(&mut bot, "speed 300").unwrap(),
            "speed=200 dir=25 left=100 right=200\r\n"
        );
    }

    #[test]
    fn blank_line_is_ignored() {
        let mut bot = bot();
        assert_eq!(run(&mut bot, "   ").unwrap(), "");
    }

    #[test]
    fn parse_errors_are_reported() {
        let mut bot = bot();
        assert!(matches!(
            run(&mut bot, "fly 10"),
            Err(CommandError::Parse(_))
        ));
    }

    #[test]
    fn invalid_calibration_is_rejected() {
        let mut bot = bot();
        assert_eq!(
            run(&mut bot, "circumference 250"),
            Err(CommandError::Bot(BotError::Motion(
                MotionError::InvalidCircumference(250)
            )))
        );
        assert_eq!(
            run(&mut bot, "circumference 200").unwrap(),
            "circumference 200mm\r\n"
        );
    }

    #[test]
    fn move_reports_pulse_budget() {
        let mut bot = bot();
        assert_eq!(
            run(&mut bot, "move 217 80").unwrap(),
            "moving 217mm at 80 (234 pulses)\r\n"
        );
    }

    #[test]
    fn events_list_telemetry() {
        let mut bot = bot();
        assert_eq!(run(&mut bot, "events").unwrap(), "no events\r\n");
        run(&mut bot, "measure 20").unwrap();
        run(&mut bot, "measure stop").unwrap();
        assert_eq!(
            run(&mut bot, "events").unwrap(),
            "[0 ms] measure-started 20 ms\r\n[0 ms] measure-stopped\r\n"
        );
    }

    #[test]
    fn color_learning_needs_a_frame() {
        let mut bot = bot();
        assert!(run(&mut bot, "color learn").is_err());
        assert_eq!(
            run(&mut bot, "color show").unwrap(),
            "0 references, minimum quality 5\r\n"
        );
    }

    #[test]
    fn help_lists_every_command() {
        let mut bot = bot();
        let out = run(&mut bot, "help").unwrap();
        assert_eq!(out.lines().count(), HELP.len());
    }

    #[test]
    fn accessory_commands_reply() {
        let mut bot = bot();
        assert_eq!(run(&mut bot, "play beep").unwrap(), "playing beep\r\n");
        assert!(bot.tunes().is_playing());
        assert_eq!(run(&mut bot, "buzz 440").unwrap(), "buzzing 440Hz\r\n");
        assert_eq!(run(&mut bot, "play stop").unwrap(), "tune stopped\r\n");
        assert_eq!(run(&mut bot, "light head on").unwrap(), "head on\r\n");
        assert_eq!(
            run(&mut bot, "indicator left").unwrap(),
            "indicator left\r\n"
        );
        assert_eq!(
            run(&mut bot, "range show").unwrap(),
            "front=- back=- left=- right=-\r\n"
        );
        assert_eq!(
            run(&mut bot, "range 25"),
            Err(CommandError::Bot(BotError::Range(RangeError::Timebase(
                TimebaseError::InvalidPeriod
            ))))
        );
    }

    #[test]
    fn cards_are_listed_in_table_order() {
        let mut bot = bot();
        assert_eq!(run(&mut bot, "card show").unwrap(), "0 cards\r\n");
        bot.on_card_scan(Some(0x0A0B_0C0D));
        assert_eq!(run(&mut bot, "card learn").unwrap(), "learned card #0\r\n");
        assert!(run(&mut bot, "card learn").is_err());
        assert_eq!(
            run(&mut bot, "card show").unwrap(),
            "1 cards\r\n#0 0a0b0c0d\r\n"
        );
    }
}
