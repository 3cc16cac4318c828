//! Parser for the robot console.
//!
//! Commands are a keyword followed by space-separated arguments. Keywords
//! match case-insensitively; numbers are plain decimal with an optional sign
//! where negative values make sense.

use core::fmt;

use winnow::ascii::{dec_int, dec_uint, hex_uint, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::token::take_while;
use winnow::{ModalResult, Parser};

use crate::button::Button;
use crate::lights::{CarLight, Indicator};
use crate::motion::{MAX_DIRECTION, Wheel};
use crate::range::RangeSensors;
use crate::rfid::CardUid;
use crate::tune::{PlayMode, Tune};

/// Structured commands produced by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Speed(i16),
    Direction(i8),
    Drive { speed: i16, direction: i8 },
    Wheel { wheel: Wheel, speed: i16 },
    /// Both wheels when no wheel is named.
    Brake(Option<Wheel>),
    Move { distance_mm: u16, speed: i16 },
    Rotate { angle_deg: i16, speed: u8 },
    /// Shows the calibration, or stores a new one.
    Circumference(Option<u16>),
    /// `None` stops continuous measurement.
    Measure(Option<u16>),
    Color(ColorCommand),
    Range(RangeCommand),
    Card(CardCommand),
    /// `None` stops the tune.
    Play(Option<PlayRequest>),
    /// Buzzer tone in Hz; `None` switches it off.
    Buzz(Option<u16>),
    Light { light: CarLight, on: bool },
    Indicator(Indicator),
    Status,
    Timers,
    Events,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorCommand {
    Learn,
    Clear,
    Show,
    Quality(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeCommand {
    Once(RangeSensors),
    Every(u16, RangeSensors),
    Stop,
    Show,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardCommand {
    Detect(u16),
    Stop,
    Learn,
    Clear,
    Show,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayRequest {
    pub tune: Tune,
    pub mode: PlayMode,
    pub repeat: bool,
}

/// Commands understood only by the host emulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostCommand {
    Run(u32),
    Press(Button),
    Release(Button),
    /// Places a card on the reader, or takes it away.
    Tag(Option<CardUid>),
}

/// Console help, one entry per line.
pub const HELP: &[&str] = &[
    "speed <cmps>            set robot speed (-200..200)",
    "direction <dir>         set steering (-100..100, positive slows left)",
    "drive <cmps> <dir>      set speed and steering together",
    "wheel <left|right> <cmps>  drive one wheel",
    "brake [left|right]      brake both wheels or one",
    "move <mm> <cmps>        drive straight for a distance",
    "rotate <deg> <cmps>     turn on the spot (positive turns right)",
    "circumference [<mm>]    show or store the wheel circumference",
    "measure <ms>|stop       start or stop colour measurement",
    "color learn|clear|show|quality <n>  manage reference colours",
    "range once|<ms> [sonar|ir]  measure distances once or periodically",
    "range stop|show         stop ranging or print the distances",
    "card detect <ms>|stop|learn|clear|show  RFID cards",
    "play <tune> [regular|smooth|staccato <n>] [loop] | play stop",
    "buzz <hz>|off           steady buzzer tone",
    "light <light|head|brake|back> on|off  car lights",
    "indicator off|left|right|both  blink the indicators",
    "status                  drivetrain and sensor summary",
    "timers                  dump the timer table",
    "events                  recent telemetry",
    "help                    this text",
];

/// Rejected input with the byte offset where parsing stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParseError {
    pub offset: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error at column {}, try `help`", self.offset + 1)
    }
}

/// Parses one console line. Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns the position of the first character that does not fit.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    parse_with(line, command)
}

/// Parses the emulator-only commands.
///
/// # Errors
///
/// Returns the position of the first character that does not fit.
pub fn parse_host(line: &str) -> Result<HostCommand, ParseError> {
    parse_with(line, host_command)
}

fn parse_with<'i, O>(
    line: &'i str,
    parser: impl Parser<&'i str, O, ErrMode<ContextError>>,
) -> Result<O, ParseError> {
    let body = line.trim_start();
    let leading = line.len() - body.len();
    terminated(parser, eof)
        .parse(body.trim_end())
        .map_err(|error| ParseError {
            offset: leading + error.offset(),
        })
}

fn command(input: &mut &str) -> ModalResult<Command> {
    alt((
        preceded(keyword("speed"), preceded(space1, dec_int)).map(Command::Speed),
        preceded(keyword("direction"), preceded(space1, direction)).map(Command::Direction),
        (
            keyword("drive"),
            preceded(space1, dec_int),
            preceded(space1, direction),
        )
            .map(|(_, speed, direction)| Command::Drive { speed, direction }),
        (
            keyword("wheel"),
            preceded(space1, wheel),
            preceded(space1, dec_int),
        )
            .map(|(_, wheel, speed)| Command::Wheel { wheel, speed }),
        preceded(keyword("brake"), opt(preceded(space1, wheel))).map(Command::Brake),
        (
            keyword("move"),
            preceded(space1, dec_uint),
            preceded(space1, dec_int),
        )
            .map(|(_, distance_mm, speed)| Command::Move { distance_mm, speed }),
        (
            keyword("rotate"),
            preceded(space1, dec_int),
            preceded(space1, dec_uint),
        )
            .map(|(_, angle_deg, speed)| Command::Rotate { angle_deg, speed }),
        preceded(keyword("circumference"), opt(preceded(space1, dec_uint)))
            .map(Command::Circumference),
        preceded(
            keyword("measure"),
            preceded(
                space1,
                alt((keyword("stop").value(None), dec_uint.map(Some))),
            ),
        )
        .map(Command::Measure),
        preceded(keyword("color"), preceded(space1, color_command)).map(Command::Color),
        accessory_command,
        keyword("status").value(Command::Status),
        keyword("timers").value(Command::Timers),
        keyword("events").value(Command::Events),
        keyword("help").value(Command::Help),
    ))
    .parse_next(input)
}

fn color_command(input: &mut &str) -> ModalResult<ColorCommand> {
    alt((
        keyword("learn").value(ColorCommand::Learn),
        keyword("clear").value(ColorCommand::Clear),
        keyword("show").value(ColorCommand::Show),
        preceded(keyword("quality"), preceded(space1, dec_uint)).map(ColorCommand::Quality),
    ))
    .parse_next(input)
}

fn accessory_command(input: &mut &str) -> ModalResult<Command> {
    alt((
        preceded(keyword("range"), preceded(space1, range_command)).map(Command::Range),
        preceded(keyword("card"), preceded(space1, card_command)).map(Command::Card),
        preceded(
            keyword("play"),
            preceded(
                space1,
                alt((keyword("stop").value(None), play_request.map(Some))),
            ),
        )
        .map(Command::Play),
        preceded(
            keyword("buzz"),
            preceded(
                space1,
                alt((keyword("off").value(None), dec_uint.map(Some))),
            ),
        )
        .map(Command::Buzz),
        (
            keyword("light"),
            preceded(space1, word.verify_map(CarLight::from_label)),
            preceded(space1, on_off),
        )
            .map(|(_, light, on)| Command::Light { light, on }),
        preceded(
            keyword("indicator"),
            preceded(space1, word.verify_map(Indicator::from_label)),
        )
        .map(Command::Indicator),
    ))
    .parse_next(input)
}

fn range_command(input: &mut &str) -> ModalResult<RangeCommand> {
    alt((
        keyword("stop").value(RangeCommand::Stop),
        keyword("show").value(RangeCommand::Show),
        preceded(keyword("once"), range_sensors).map(RangeCommand::Once),
        (dec_uint, range_sensors).map(|(period, sensors)| RangeCommand::Every(period, sensors)),
    ))
    .parse_next(input)
}

/// Optional sensor kind; both kinds when omitted.
fn range_sensors(input: &mut &str) -> ModalResult<RangeSensors> {
    opt(preceded(
        space1,
        alt((
            keyword("sonar").value(RangeSensors::ULTRASONIC),
            keyword("ir").value(RangeSensors::INFRARED),
        )),
    ))
    .map(|sensors| sensors.unwrap_or(RangeSensors::ALL))
    .parse_next(input)
}

fn card_command(input: &mut &str) -> ModalResult<CardCommand> {
    alt((
        preceded(keyword("detect"), preceded(space1, dec_uint)).map(CardCommand::Detect),
        keyword("stop").value(CardCommand::Stop),
        keyword("learn").value(CardCommand::Learn),
        keyword("clear").value(CardCommand::Clear),
        keyword("show").value(CardCommand::Show),
    ))
    .parse_next(input)
}

fn play_request(input: &mut &str) -> ModalResult<PlayRequest> {
    (
        word.verify_map(Tune::from_label),
        opt(preceded(space1, play_mode)),
        opt(preceded(space1, keyword("loop"))),
    )
        .map(|(tune, mode, repeat)| PlayRequest {
            tune,
            mode: mode.unwrap_or_default(),
            repeat: repeat.is_some(),
        })
        .parse_next(input)
}

fn play_mode(input: &mut &str) -> ModalResult<PlayMode> {
    alt((
        keyword("regular").value(PlayMode::Regular),
        keyword("smooth").value(PlayMode::Smooth),
        preceded(
            keyword("staccato"),
            preceded(
                space1,
                dec_uint.verify(|steps: &u8| PlayMode::STACCATO_STEPS.contains(steps)),
            ),
        )
        .map(PlayMode::Staccato),
    ))
    .parse_next(input)
}

fn on_off(input: &mut &str) -> ModalResult<bool> {
    alt((keyword("on").value(true), keyword("off").value(false))).parse_next(input)
}

fn host_command(input: &mut &str) -> ModalResult<HostCommand> {
    alt((
        preceded(keyword("run"), preceded(space1, dec_uint)).map(HostCommand::Run),
        preceded(keyword("press"), preceded(space1, button)).map(HostCommand::Press),
        preceded(keyword("release"), preceded(space1, button)).map(HostCommand::Release),
        preceded(
            keyword("tag"),
            preceded(
                space1,
                alt((keyword("none").value(None), hex_uint.map(Some))),
            ),
        )
        .map(HostCommand::Tag),
    ))
    .parse_next(input)
}

fn word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| c.is_ascii_alphabetic()).parse_next(input)
}

fn keyword<'i>(name: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    word.verify(move |found: &str| found.eq_ignore_ascii_case(name))
}

fn wheel(input: &mut &str) -> ModalResult<Wheel> {
    alt((
        keyword("left").value(Wheel::Left),
        keyword("right").value(Wheel::Right),
    ))
    .parse_next(input)
}

fn button(input: &mut &str) -> ModalResult<Button> {
    word.verify_map(Button::from_label).parse_next(input)
}

/// Steering value, clamped to the accepted range.
fn direction(input: &mut &str) -> ModalResult<i8> {
    dec_int
        .map(|value: i16| {
            let limit = i16::from(MAX_DIRECTION);
            i8::try_from(value.clamp(-limit, limit)).unwrap_or(0)
        })
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command {
        parse(input).unwrap_or_else(|error| panic!("`{input}` rejected: {error}"))
    }

    #[test]
    fn parses_drive_commands() {
        assert_eq!(parse_ok("speed 80"), Command::Speed(80));
        assert_eq!(parse_ok("  SPEED -120 "), Command::Speed(-120));
        assert_eq!(parse_ok("direction -30"), Command::Direction(-30));
        assert_eq!(
            parse_ok("drive 50 25"),
            Command::Drive {
                speed: 50,
                direction: 25
            }
        );
        assert_eq!(
            parse_ok("wheel right -40"),
            Command::Wheel {
                wheel: Wheel::Right,
                speed: -40
            }
        );
    }

    #[test]
    fn direction_is_clamped() {
        assert_eq!(parse_ok("direction 250"), Command::Direction(100));
        assert_eq!(parse_ok("direction -101"), Command::Direction(-100));
    }

    #[test]
    fn parses_brake_with_optional_wheel() {
        assert_eq!(parse_ok("brake"), Command::Brake(None));
        assert_eq!(parse_ok("brake Left"), Command::Brake(Some(Wheel::Left)));
        assert!(parse("brake middle").is_err());
    }

    #[test]
    fn parses_maneuvers() {
        assert_eq!(
            parse_ok("move 500 60"),
            Command::Move {
                distance_mm: 500,
                speed: 60
            }
        );
        assert_eq!(
            parse_ok("rotate -90 40"),
            Command::Rotate {
                angle_deg: -90,
                speed: 40
            }
        );
        assert!(parse("move -5 60").is_err());
        assert!(parse("rotate 90 300").is_err());
    }

    #[test]
    fn parses_sensor_and_info_commands() {
        assert_eq!(parse_ok("circumference"), Command::Circumference(None));
        assert_eq!(parse_ok("circumference 205"), Command::Circumference(Some(205)));
        assert_eq!(parse_ok("measure 20"), Command::Measure(Some(20)));
        assert_eq!(parse_ok("measure stop"), Command::Measure(None));
        assert_eq!(parse_ok("color learn"), Command::Color(ColorCommand::Learn));
        assert_eq!(
            parse_ok("color quality 9"),
            Command::Color(ColorCommand::Quality(9))
        );
        assert_eq!(parse_ok("timers"), Command::Timers);
        assert_eq!(parse_ok("HELP"), Command::Help);
    }

    #[test]
    fn rejects_trailing_input_with_offset() {
        assert_eq!(parse("speed 10 20"), Err(ParseError { offset: 8 }));
        assert!(parse("speedy 10").is_err());
        assert!(parse("").is_err());
        assert!(parse("status now").is_err());
    }

    #[test]
    fn parses_host_commands() {
        assert_eq!(parse_host("run 250"), Ok(HostCommand::Run(250)));
        assert_eq!(parse_host("press red"), Ok(HostCommand::Press(Button::Red)));
        assert_eq!(
            parse_host("release BLUE"),
            Ok(HostCommand::Release(Button::Blue))
        );
        assert!(parse_host("press purple").is_err());
        assert!(parse_host("speed 10").is_err());
        assert_eq!(parse_host("tag DEADBEEF"), Ok(HostCommand::Tag(Some(0xDEAD_BEEF))));
        assert_eq!(parse_host("tag none"), Ok(HostCommand::Tag(None)));
    }

    #[test]
    fn parses_range_and_card_commands() {
        assert_eq!(
            parse_ok("range once"),
            Command::Range(RangeCommand::Once(RangeSensors::ALL))
        );
        assert_eq!(
            parse_ok("range 100 sonar"),
            Command::Range(RangeCommand::Every(100, RangeSensors::ULTRASONIC))
        );
        assert_eq!(
            parse_ok("range once IR"),
            Command::Range(RangeCommand::Once(RangeSensors::INFRARED))
        );
        assert_eq!(parse_ok("range stop"), Command::Range(RangeCommand::Stop));
        assert!(parse("range once laser").is_err());
        assert_eq!(
            parse_ok("card detect 200"),
            Command::Card(CardCommand::Detect(200))
        );
        assert_eq!(parse_ok("card learn"), Command::Card(CardCommand::Learn));
    }

    #[test]
    fn parses_sound_and_light_commands() {
        assert_eq!(
            parse_ok("play siren"),
            Command::Play(Some(PlayRequest {
                tune: Tune::Siren,
                mode: PlayMode::Regular,
                repeat: false
            }))
        );
        assert_eq!(
            parse_ok("play song staccato 2 loop"),
            Command::Play(Some(PlayRequest {
                tune: Tune::Song,
                mode: PlayMode::Staccato(2),
                repeat: true
            }))
        );
        assert_eq!(
            parse_ok("play beepbeep loop"),
            Command::Play(Some(PlayRequest {
                tune: Tune::BeepBeep,
                mode: PlayMode::Regular,
                repeat: true
            }))
        );
        assert_eq!(parse_ok("play stop"), Command::Play(None));
        assert!(parse("play song staccato 4").is_err());
        assert_eq!(parse_ok("buzz 880"), Command::Buzz(Some(880)));
        assert_eq!(parse_ok("buzz off"), Command::Buzz(None));
        assert_eq!(
            parse_ok("light brake on"),
            Command::Light {
                light: CarLight::Brakelight,
                on: true
            }
        );
        assert_eq!(
            parse_ok("indicator both"),
            Command::Indicator(Indicator::Both)
        );
        assert!(parse("indicator up").is_err());
    }
}
