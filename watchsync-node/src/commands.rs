//! Console commands

use std::fmt;

/// A line typed at the console
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Play,
    Pause,
    Seek(f64),
    Load(String),
    Queue(String),
    Unqueue(String),
    Next,
    Clear,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    MissingArgument(&'static str),
    InvalidPosition(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::Unknown(cmd) => write!(f, "unknown command '{}' (try 'help')", cmd),
            ParseError::MissingArgument(what) => write!(f, "missing {}", what),
            ParseError::InvalidPosition(arg) => write!(f, "invalid position '{}'", arg),
        }
    }
}

impl std::error::Error for ParseError {}

pub const HELP: &str = "\
commands:
  play                 resume the room
  pause                pause the room
  seek <secs|m:ss>     move the room's playhead
  load <item>          switch the room to another item
  queue <item>         add an item to the end of the queue
  unqueue <entry-id>   remove a queue entry
  next                 skip to the head of the queue
  clear                empty the queue
  status               print room, queue and sync statistics
  quit                 leave the room and exit";

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Err(ParseError::Empty);
        };
        let arg = words.next();

        let command = match cmd.to_ascii_lowercase().as_str() {
            "play" | "p" => ConsoleCommand::Play,
            "pause" => ConsoleCommand::Pause,
            "seek" | "s" => {
                let arg = arg.ok_or(ParseError::MissingArgument("position"))?;
                ConsoleCommand::Seek(parse_position(arg)?)
            }
            "load" => ConsoleCommand::Load(arg.ok_or(ParseError::MissingArgument("item id"))?.to_string()),
            "queue" | "q" => {
                ConsoleCommand::Queue(arg.ok_or(ParseError::MissingArgument("item id"))?.to_string())
            }
            "unqueue" | "rm" => {
                ConsoleCommand::Unqueue(arg.ok_or(ParseError::MissingArgument("entry id"))?.to_string())
            }
            "next" | "n" => ConsoleCommand::Next,
            "clear" => ConsoleCommand::Clear,
            "status" | "st" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Seconds as `90`, `90.5` or `1:30`
fn parse_position(arg: &str) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidPosition(arg.to_string());

    let secs = match arg.split_once(':') {
        Some((mins, secs)) => {
            let mins: u32 = mins.parse().map_err(|_| invalid())?;
            let secs: f64 = secs.parse().map_err(|_| invalid())?;
            if !(0.0..60.0).contains(&secs) {
                return Err(invalid());
            }
            mins as f64 * 60.0 + secs
        }
        None => arg.parse().map_err(|_| invalid())?,
    };

    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(invalid())
    }
}

/// `m:ss` for display
pub fn format_position(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
