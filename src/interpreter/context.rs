//! # Vision context fusion
//!
//! Vision-conditioned intents look at the last scene description before deciding what to do:
//!
//! | Intent  | Observation mentions     | Plan                          |
//! |---------|--------------------------|-------------------------------|
//! | follow  | `person` / `people`      | comment, `forward 30`         |
//! | follow  | `object`                 | comment, `forward 20`         |
//! | avoid   | `obstacle` / `wall`      | comment, `back 50`            |
//! | explore | anything (or nothing)    | comment, `cw 90`, `forward 30`, `cw 90`, `forward 30` |
//!
//! When follow or avoid find nothing relevant in the observation, the plan is empty.

use log::info;

use crate::command::{Command, Direction, ParsedCommand, Rotation};
use crate::config::SafetyBounds;
use crate::interpreter::intent::Intent;

const FOLLOW_PERSON_CM: u64 = 30;
const FOLLOW_OBJECT_CM: u64 = 20;
const AVOID_BACKOFF_CM: u64 = 50;
const EXPLORE_STEP_CM: u64 = 30;
const EXPLORE_TURN_DEG: u64 = 90;

const PERSON_WORDS: &[&str] = &["person", "people"];
const OBJECT_WORDS: &[&str] = &["object"];
const OBSTACLE_WORDS: &[&str] = &["obstacle", "wall"];

fn mentions(observation: &str, words: &[&str]) -> bool {
    words.iter().any(|w| observation.contains(w))
}

/// # Context fuser
#[derive(Debug, Clone, Default)]
pub struct ContextFuser {
    bounds: SafetyBounds,
}

impl ContextFuser {
    pub fn new(bounds: SafetyBounds) -> Self {
        Self { bounds }
    }

    fn step(&self, direction: Direction, cm: u64) -> ParsedCommand {
        Command::Move {
            direction,
            cm: self.bounds.clamp_distance(cm),
        }
        .into()
    }

    fn turn(&self, degrees: u64) -> ParsedCommand {
        Command::Rotate {
            rotation: Rotation::Clockwise,
            degrees: self.bounds.clamp_angle(degrees),
        }
        .into()
    }

    /// Build the plan of a vision-conditioned intent
    ///
    /// Non vision-conditioned intents yield an empty plan.
    pub fn fuse(&self, intent: Intent, observation: Option<&str>) -> Vec<ParsedCommand> {
        let observation = observation.unwrap_or_default().to_lowercase();

        match intent {
            Intent::Follow if mentions(&observation, PERSON_WORDS) => vec![
                ParsedCommand::comment("Following person detected in view"),
                self.step(Direction::Forward, FOLLOW_PERSON_CM),
            ],
            Intent::Follow if mentions(&observation, OBJECT_WORDS) => vec![
                ParsedCommand::comment("Moving towards detected object"),
                self.step(Direction::Forward, FOLLOW_OBJECT_CM),
            ],
            Intent::Avoid if mentions(&observation, OBSTACLE_WORDS) => vec![
                ParsedCommand::comment("Avoiding obstacle"),
                self.step(Direction::Back, AVOID_BACKOFF_CM),
            ],
            Intent::Explore => vec![
                ParsedCommand::comment("Exploration sequence"),
                self.turn(EXPLORE_TURN_DEG),
                self.step(Direction::Forward, EXPLORE_STEP_CM),
                self.turn(EXPLORE_TURN_DEG),
                self.step(Direction::Forward, EXPLORE_STEP_CM),
            ],
            Intent::Follow | Intent::Avoid => {
                info!("{:?}: nothing relevant in the last observation, no command", intent);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}
