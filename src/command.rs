use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// # Translation direction
///
/// Direction of a `move` primitive, relative to the drone body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

impl Direction {
    /// Keyword used by the textual command form (`forward 50`, `up 30`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Forward => "forward",
            Direction::Back => "back",
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "forward" => Ok(Direction::Forward),
            "back" | "backward" => Ok(Direction::Back),
            _ => Err(Error::ParseError(s.to_owned())),
        }
    }
}

/// # Rotation sense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    /// `cw`
    Clockwise,
    /// `ccw`
    CounterClockwise,
}

impl Rotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rotation::Clockwise => "cw",
            Rotation::CounterClockwise => "ccw",
        }
    }
}

/// # Flip direction
///
/// Rendered as the single letter the drone SDK expects (`f`, `b`, `l`, `r`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipDirection {
    Forward,
    Back,
    Left,
    Right,
}

impl FlipDirection {
    pub fn as_char(&self) -> char {
        match self {
            FlipDirection::Forward => 'f',
            FlipDirection::Back => 'b',
            FlipDirection::Left => 'l',
            FlipDirection::Right => 'r',
        }
    }
}

impl FromStr for FlipDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f" | "forward" => Ok(FlipDirection::Forward),
            "b" | "back" => Ok(FlipDirection::Back),
            "l" | "left" => Ok(FlipDirection::Left),
            "r" | "right" => Ok(FlipDirection::Right),
            _ => Err(Error::ParseError(s.to_owned())),
        }
    }
}

/// # Primitive drone command
///
/// This enum covers every primitive the motion transport accepts. Numeric arguments carried by a [Command]
/// produced by this crate have always been clamped to the configured
/// [SafetyBounds](crate::config::SafetyBounds).
///
/// The [Display] and [FromStr] implementations use the textual SDK form:
/// ```
/// # use tello_copilot::{Command, Direction};
/// let command: Command = "forward 120".parse().unwrap();
/// assert_eq!(command, Command::Move { direction: Direction::Forward, cm: 120 });
/// assert_eq!(command.to_string(), "forward 120");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Takeoff,
    Land,
    /// Stop the motors immediately.
    Emergency,
    Move { direction: Direction, cm: u32 },
    Rotate { rotation: Rotation, degrees: u32 },
    Flip(FlipDirection),
    /// Remote-control stick values, each in [-100, 100].
    Rc { lr: i8, fb: i8, ud: i8, yaw: i8 },
}

impl Command {
    /// Command verb as sent to the transport
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Takeoff => "takeoff",
            Command::Land => "land",
            Command::Emergency => "emergency",
            Command::Move { direction, .. } => direction.as_str(),
            Command::Rotate { rotation, .. } => rotation.as_str(),
            Command::Flip(_) => "flip",
            Command::Rc { .. } => "rc",
        }
    }

    /// Numeric argument of the command, if it carries a single one
    pub fn argument(&self) -> Option<u32> {
        match self {
            Command::Move { cm, .. } => Some(*cm),
            Command::Rotate { degrees, .. } => Some(*degrees),
            _ => None,
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, Command::Emergency)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move { direction, cm } => write!(f, "{} {}", direction.as_str(), cm),
            Command::Rotate { rotation, degrees } => write!(f, "{} {}", rotation.as_str(), degrees),
            Command::Flip(direction) => write!(f, "flip {}", direction.as_char()),
            Command::Rc { lr, fb, ud, yaw } => write!(f, "rc {} {} {} {}", lr, fb, ud, yaw),
            other => write!(f, "{}", other.verb()),
        }
    }
}

fn parse_number<T: FromStr>(input: &str, token: Option<&str>) -> Result<T, Error> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| Error::ParseError(input.to_owned()))
}

impl FromStr for Command {
    type Err = Error;

    /// Parse the textual form of a command.
    ///
    /// Accepts the short SDK form (`forward 50`, `cw 90`, `flip f`) as well as the long form
    /// (`move forward 50`, `rotate cw 90`). Values are not clamped here, use
    /// [SafetyBounds::clamp_command()](crate::config::SafetyBounds::clamp_command) before sending.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let mut parts = lower.split_whitespace();
        let verb = parts.next().ok_or_else(|| Error::ParseError(s.to_owned()))?;

        let command = match verb {
            "takeoff" => Command::Takeoff,
            "land" => Command::Land,
            "emergency" => Command::Emergency,
            "move" => {
                let direction = parts
                    .next()
                    .ok_or_else(|| Error::ParseError(s.to_owned()))?
                    .parse()?;
                let cm = parse_number(s, parts.next())?;
                Command::Move { direction, cm }
            }
            "rotate" => {
                let rotation = match parts.next() {
                    Some("cw") => Rotation::Clockwise,
                    Some("ccw") => Rotation::CounterClockwise,
                    _ => return Err(Error::ParseError(s.to_owned())),
                };
                let degrees = parse_number(s, parts.next())?;
                Command::Rotate { rotation, degrees }
            }
            "cw" | "ccw" => {
                let rotation = if verb == "cw" {
                    Rotation::Clockwise
                } else {
                    Rotation::CounterClockwise
                };
                let degrees = parse_number(s, parts.next())?;
                Command::Rotate { rotation, degrees }
            }
            "flip" => {
                let direction = parts
                    .next()
                    .ok_or_else(|| Error::ParseError(s.to_owned()))?
                    .parse()?;
                Command::Flip(direction)
            }
            "rc" => {
                let mut values = [0i8; 4];
                for value in values.iter_mut() {
                    let raw: i32 = parse_number(s, parts.next())?;
                    *value = raw.clamp(-100, 100) as i8;
                }
                Command::Rc {
                    lr: values[0],
                    fb: values[1],
                    ud: values[2],
                    yaw: values[3],
                }
            }
            direction => {
                let direction: Direction = direction.parse()?;
                let cm = parse_number(s, parts.next())?;
                Command::Move { direction, cm }
            }
        };

        if parts.next().is_some() {
            return Err(Error::ParseError(s.to_owned()));
        }

        Ok(command)
    }
}

/// # Interpreted instruction entry
///
/// Output unit of the [Interpreter](crate::interpreter::Interpreter). The order of entries in a plan is the
/// execution order. Comments are human-readable annotations and are never sent to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParsedCommand {
    Exec(Command),
    Comment(String),
}

impl ParsedCommand {
    pub fn comment(text: impl Into<String>) -> Self {
        ParsedCommand::Comment(text.into())
    }

    /// The executable command, `None` for comments
    pub fn command(&self) -> Option<&Command> {
        match self {
            ParsedCommand::Exec(command) => Some(command),
            ParsedCommand::Comment(_) => None,
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, ParsedCommand::Comment(_))
    }
}

impl From<Command> for ParsedCommand {
    fn from(command: Command) -> Self {
        ParsedCommand::Exec(command)
    }
}

impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsedCommand::Exec(command) => write!(f, "{}", command),
            ParsedCommand::Comment(text) => write!(f, "# {}", text),
        }
    }
}

/// # Telemetry query
///
/// Device state values the transport can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryQuery {
    /// Battery level in percent
    Battery,
    /// Height in cm
    Height,
    /// Temperature in degrees Celsius
    Temperature,
    /// Motor-on time in seconds
    FlightTime,
    /// Configured speed in cm/s
    Speed,
}

impl TelemetryQuery {
    pub fn label(&self) -> &'static str {
        match self {
            TelemetryQuery::Battery => "Battery",
            TelemetryQuery::Height => "Height",
            TelemetryQuery::Temperature => "Temp",
            TelemetryQuery::FlightTime => "Flight Time",
            TelemetryQuery::Speed => "Speed",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            TelemetryQuery::Battery => "%",
            TelemetryQuery::Height => "cm",
            TelemetryQuery::Temperature => "°C",
            TelemetryQuery::FlightTime => "s",
            TelemetryQuery::Speed => "cm/s",
        }
    }
}

/// Operator input from the manual command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualInput {
    Query(TelemetryQuery),
    Command(Command),
}

impl FromStr for ManualInput {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let query = match s.trim().to_lowercase().as_str() {
            "battery?" => Some(TelemetryQuery::Battery),
            "height?" => Some(TelemetryQuery::Height),
            "temp?" | "temperature?" => Some(TelemetryQuery::Temperature),
            "time?" => Some(TelemetryQuery::FlightTime),
            "speed?" => Some(TelemetryQuery::Speed),
            _ => None,
        };

        match query {
            Some(query) => Ok(ManualInput::Query(query)),
            None => Ok(ManualInput::Command(s.parse()?)),
        }
    }
}
