//! # Instruction interpreter
//!
//! The interpreter turns free-text operator instructions into a bounded plan of [ParsedCommand]. It is
//! deterministic and keyword based, there is no language model involved:
//!
//!  - [intent] classifies the instruction against an ordered keyword table,
//!  - [extract] reads distances and angles out of the text and clamps them,
//!  - [context] builds the plans of the vision-conditioned intents (follow, avoid, explore),
//!  - [Interpreter::synthesize()] puts everything together.
//!
//! ```
//! # use tello_copilot::interpreter::Interpreter;
//! # use tello_copilot::{Command, Direction, ParsedCommand};
//! let interpreter = Interpreter::default();
//!
//! let plan = interpreter.synthesize("move forward 120cm", None);
//! assert_eq!(plan, vec![ParsedCommand::Exec(Command::Move { direction: Direction::Forward, cm: 120 })]);
//!
//! // No keyword, no command
//! assert!(interpreter.synthesize("sing a song", None).is_empty());
//! ```

pub mod context;
pub mod extract;
pub mod intent;

use log::debug;

use crate::command::{Command, Direction, FlipDirection, ParsedCommand, Rotation};
use crate::config::{CopilotConfig, Defaults, SafetyBounds};

use context::ContextFuser;
use extract::ParameterExtractor;
use intent::{tokenize, Intent, IntentClassifier};

pub use intent::KeywordRule;

/// Rotation of the `turn around` intent
const TURN_AROUND_DEG: u64 = 180;

/// Pick the flip direction named in the instruction, forward when none is
fn flip_direction(text: &str) -> FlipDirection {
    let words = tokenize(text);
    let has = |w: &str| words.iter().any(|word| word == w);

    if has("forward") {
        FlipDirection::Forward
    } else if has("back") || has("backward") {
        FlipDirection::Back
    } else if has("left") {
        FlipDirection::Left
    } else if has("right") {
        FlipDirection::Right
    } else {
        FlipDirection::Forward
    }
}

/// # Command synthesizer
///
/// Pure function of the instruction, the last observation and the configuration it was built from.
/// See the [interpreter module documentation](crate::interpreter) for more context and information.
#[derive(Debug, Clone)]
pub struct Interpreter {
    classifier: IntentClassifier,
    extractor: ParameterExtractor,
    fuser: ContextFuser,
    bounds: SafetyBounds,
    defaults: Defaults,
}

impl Interpreter {
    pub fn new(config: &CopilotConfig) -> Self {
        Self {
            classifier: IntentClassifier::new(&config.keywords, &config.safety.emergency_words),
            extractor: ParameterExtractor::new(config.safety.clone()),
            fuser: ContextFuser::new(config.safety.clone()),
            bounds: config.safety.clone(),
            defaults: config.defaults.clone(),
        }
    }

    /// Classify an instruction without building a plan
    pub fn classify(&self, text: &str) -> Option<Intent> {
        self.classifier.classify(text)
    }

    /// Translate an instruction into an ordered plan
    ///
    /// `last_observation` is the most recent scene description, used by the vision-conditioned intents. An empty plan
    /// means the instruction could not be interpreted, or that a vision-conditioned intent found nothing to act on.
    pub fn synthesize(&self, text: &str, last_observation: Option<&str>) -> Vec<ParsedCommand> {
        let text = text.to_lowercase();
        let intent = match self.classifier.classify(&text) {
            Some(intent) => intent,
            None => {
                debug!("No intent recognised in {:?}", text);
                return Vec::new();
            }
        };
        debug!("Instruction {:?} classified as {:?}", text, intent);

        let command = match intent {
            Intent::Emergency => Command::Emergency,
            Intent::MoveForward => self.movement(Direction::Forward, &text),
            Intent::MoveBack => self.movement(Direction::Back, &text),
            Intent::MoveLeft => self.movement(Direction::Left, &text),
            Intent::MoveRight => self.movement(Direction::Right, &text),
            Intent::MoveUp => self.movement(Direction::Up, &text),
            Intent::MoveDown => self.movement(Direction::Down, &text),
            Intent::RotateLeft => self.rotation(Rotation::CounterClockwise, &text),
            Intent::RotateRight => self.rotation(Rotation::Clockwise, &text),
            Intent::TurnAround => Command::Rotate {
                rotation: Rotation::Clockwise,
                degrees: self.bounds.clamp_angle(TURN_AROUND_DEG),
            },
            Intent::Takeoff => Command::Takeoff,
            Intent::Land => Command::Land,
            Intent::Flip => Command::Flip(flip_direction(&text)),
            Intent::Follow | Intent::Avoid | Intent::Explore => {
                return self.fuser.fuse(intent, last_observation);
            }
        };

        vec![ParsedCommand::Exec(command)]
    }

    fn movement(&self, direction: Direction, text: &str) -> Command {
        Command::Move {
            direction,
            cm: self.extractor.distance(text, self.defaults.distance_cm),
        }
    }

    fn rotation(&self, rotation: Rotation, text: &str) -> Command {
        Command::Rotate {
            rotation,
            degrees: self.extractor.angle(text, self.defaults.angle_deg),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(&CopilotConfig::default())
    }
}
