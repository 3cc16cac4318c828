//! Serial console session.
//!
//! Bytes arriving from the console UART are assembled into lines here, echoed
//! back for the terminal and handed to a [`LineHandler`] once a terminator
//! arrives. The robot itself implements [`LineHandler`] by running the shared
//! command executor from `discbot-core`.

use core::fmt::{self, Write as _};
use core::str;

use discbot_core::color::ColorSampler;
use discbot_core::motion::MotorDriver;
use discbot_core::repl::commands::CommandExecutor;
use discbot_core::robot::{Accessories, DiscBot};
use discbot_core::storage::NvStore;
use heapless::{String, Vec};

/// Maximum number of bytes accepted on a single console line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;

/// Size of the reply buffer filled while handling one line.
pub const REPLY_CAPACITY: usize = 2048;

pub const PROMPT: &str = "> ";

pub type Reply = String<REPLY_CAPACITY>;

/// Errors surfaced by the console session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplError {
    /// Encountered non-UTF-8 data in the assembled line buffer.
    InvalidUtf8,
    /// Input exceeded [`MAX_LINE_LEN`]; the partial line was discarded.
    LineOverflow,
}

impl fmt::Display for ReplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplError::InvalidUtf8 => f.write_str("line is not valid UTF-8"),
            ReplError::LineOverflow => write!(f, "line longer than {MAX_LINE_LEN} bytes"),
        }
    }
}

/// Consumer of complete console lines.
pub trait LineHandler {
    /// Executes one line (without terminator) and appends the reply.
    fn handle_line(&mut self, line: &str, reply: &mut Reply);
}

impl<M, S, C, A, const SLOTS: usize> LineHandler for DiscBot<M, S, C, A, SLOTS>
where
    M: MotorDriver,
    S: NvStore,
    C: ColorSampler,
    A: Accessories,
{
    fn handle_line(&mut self, line: &str, reply: &mut Reply) {
        if let Err(error) = CommandExecutor::new(self).execute(line, reply) {
            // A full reply buffer leaves no room for the error either.
            let _ = write!(reply, "error: {error}\r\n");
        }
    }
}

/// Line assembly state for one console.
pub struct ReplSession<H> {
    handler: H,
    buffer: Vec<u8, MAX_LINE_LEN>,
    after_cr: bool,
}

impl<H: LineHandler> ReplSession<H> {
    pub const fn new(handler: H) -> Self {
        Self {
            handler,
            buffer: Vec::new(),
            after_cr: false,
        }
    }

    /// Writes the banner shown when the console comes up.
    pub fn greet(&self, reply: &mut Reply) {
        let _ = reply.push_str("discbot console, type `help`\r\n");
        let _ = reply.push_str(PROMPT);
    }

    /// Feeds a single byte into the session. A CR, LF or CR LF pair ends the
    /// line; backspace and DEL erase the previous byte.
    ///
    /// # Errors
    ///
    /// Reports overlong and non-UTF-8 lines. The offending line is dropped
    /// and the session is ready for the next one.
    pub fn ingest(&mut self, byte: u8, reply: &mut Reply) -> Result<(), ReplError> {
        let after_cr = core::mem::replace(&mut self.after_cr, byte == b'\r');
        match byte {
            b'\n' if after_cr => Ok(()),
            b'\r' | b'\n' => {
                let _ = reply.push_str("\r\n");
                let result = self.process_line(reply);
                let _ = reply.push_str(PROMPT);
                result
            }
            0x08 | 0x7f => {
                if self.buffer.pop().is_some() {
                    let _ = reply.push_str("\x08 \x08");
                }
                Ok(())
            }
            value => {
                if self.buffer.push(value).is_err() {
                    self.buffer.clear();
                    return Err(ReplError::LineOverflow);
                }
                let _ = reply.push(char::from(value));
                Ok(())
            }
        }
    }

    fn process_line(&mut self, reply: &mut Reply) -> Result<(), ReplError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let result = match str::from_utf8(self.buffer.as_slice()) {
            Ok(line) => {
                self.handler.handle_line(line, reply);
                Ok(())
            }
            Err(_) => Err(ReplError::InvalidUtf8),
        };
        self.buffer.clear();
        result
    }

    #[cfg(test)]
    pub fn pending(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    #[cfg(test)]
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discbot_core::button::ALL_RELEASED;
    use discbot_core::color::NoopColorSampler;
    use discbot_core::motion::LatchedMotorDriver;
    use discbot_core::robot::NoAccessories;
    use discbot_core::storage::RamStore;
    use discbot_core::timebase::BaseTime;

    #[derive(Default)]
    struct Recorder {
        lines: std::vec::Vec<std::string::String>,
    }

    impl LineHandler for Recorder {
        fn handle_line(&mut self, line: &str, reply: &mut Reply) {
            self.lines.push(line.into());
            let _ = reply.push_str("ok\r\n");
        }
    }

    fn feed<H: LineHandler>(session: &mut ReplSession<H>, bytes: &[u8]) -> Reply {
        let mut reply = Reply::new();
        for byte in bytes {
            session.ingest(*byte, &mut reply).unwrap();
        }
        reply
    }

    #[test]
    fn session_routes_complete_lines() {
        let mut session = ReplSession::new(Recorder::default());
        let reply = feed(&mut session, b"status\r\n");

        assert_eq!(session.handler().lines, ["status"]);
        assert_eq!(reply.as_str(), "status\r\nok\r\n> ");
        assert!(session.pending().is_empty());
    }

    #[test]
    fn greeting_ends_with_prompt() {
        let session = ReplSession::new(Recorder::default());
        let mut reply = Reply::new();
        session.greet(&mut reply);
        assert!(reply.starts_with("discbot console"));
        assert!(reply.ends_with(PROMPT));
    }

    #[test]
    fn crlf_counts_as_one_terminator() {
        let mut session = ReplSession::new(Recorder::default());
        let reply = feed(&mut session, b"a\r\n\nb\n");

        assert_eq!(session.handler().lines, ["a", "b"]);
        assert_eq!(reply.matches(PROMPT).count(), 3);
    }

    #[test]
    fn backspace_erases_previous_byte() {
        let mut session = ReplSession::new(Recorder::default());
        feed(&mut session, b"spx\x08eex\x7fd 5\r");
        assert_eq!(session.handler().lines, ["speed 5"]);
    }

    #[test]
    fn overflow_is_reported() {
        let mut session = ReplSession::new(Recorder::default());
        let mut reply = Reply::new();
        for _ in 0..MAX_LINE_LEN {
            session.ingest(b'a', &mut reply).unwrap();
        }

        assert_eq!(
            session.ingest(b'b', &mut reply),
            Err(ReplError::LineOverflow)
        );
        assert!(session.pending().is_empty());
    }

    #[test]
    fn invalid_utf8_is_dropped() {
        let mut session = ReplSession::new(Recorder::default());
        let mut reply = Reply::new();
        session.ingest(0xff, &mut reply).unwrap();
        assert_eq!(
            session.ingest(b'\n', &mut reply),
            Err(ReplError::InvalidUtf8)
        );
        assert!(session.handler().lines.is_empty());
    }

    #[test]
    fn robot_replies_and_reports_errors() {
        let mut bot: DiscBot<_, _, _> = DiscBot::new(
            LatchedMotorDriver::new(),
            RamStore::<512>::new(),
            NoopColorSampler,
            NoAccessories,
        );
        bot.init(BaseTime::Ms10, ALL_RELEASED).unwrap();

        let mut reply = Reply::new();
        bot.handle_line("speed 50", &mut reply);
        assert_eq!(reply.as_str(), "speed=50 dir=0 left=50 right=50\r\n");

        reply.clear();
        bot.handle_line("speed", &mut reply);
        assert!(reply.starts_with("error: syntax error at column"));
    }
}
