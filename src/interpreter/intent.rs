//! # Intent classification
//!
//! Instructions are classified by scanning them for keyword phrases. The rules form an ordered table: the first rule
//! with a matching phrase wins, there is no scoring and no multi-intent fan-out. Matching is done on whole words.
//!
//! Two refinements apply on top of declaration order:
//!  - Emergency words are looked for before the table and always win.
//!  - A phrase occurrence that lies strictly inside a longer matching phrase belongs to the longer one. This is what
//!    makes `turn left` a rotation although `left` is a movement keyword, and `flip back` a flip.

use serde::{Deserialize, Serialize};

/// # Instruction intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Emergency,
    MoveForward,
    MoveBack,
    MoveLeft,
    MoveRight,
    MoveUp,
    MoveDown,
    RotateLeft,
    RotateRight,
    TurnAround,
    Takeoff,
    Land,
    Flip,
    Follow,
    Avoid,
    Explore,
}

/// One row of the intent table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub intent: Intent,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(intent: Intent, keywords: &[&str]) -> Self {
        Self {
            intent,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// The built-in intent table, in priority order
///
/// Movement comes before rotation, then flight control, flips and finally the vision-conditioned behaviors.
pub fn default_keyword_rules() -> Vec<KeywordRule> {
    vec![
        KeywordRule::new(Intent::MoveForward, &["forward", "ahead", "move forward", "go forward"]),
        KeywordRule::new(Intent::MoveBack, &["back", "backward", "backwards", "retreat"]),
        KeywordRule::new(Intent::MoveLeft, &["left", "go left", "move left"]),
        KeywordRule::new(Intent::MoveRight, &["right", "go right", "move right"]),
        KeywordRule::new(Intent::MoveUp, &["up", "higher", "rise", "ascend"]),
        KeywordRule::new(Intent::MoveDown, &["down", "lower", "descend"]),
        KeywordRule::new(Intent::RotateLeft, &["turn left", "rotate left", "spin left"]),
        KeywordRule::new(Intent::RotateRight, &["turn right", "rotate right", "spin right"]),
        KeywordRule::new(Intent::TurnAround, &["turn around", "spin around", "spin"]),
        KeywordRule::new(Intent::Takeoff, &["takeoff", "take off", "launch"]),
        KeywordRule::new(Intent::Land, &["land", "landing"]),
        KeywordRule::new(
            Intent::Flip,
            &[
                "flip",
                "do a flip",
                "barrel roll",
                "flip forward",
                "flip back",
                "flip backward",
                "flip left",
                "flip right",
            ],
        ),
        KeywordRule::new(Intent::Follow, &["follow", "track", "chase", "pursue"]),
        KeywordRule::new(Intent::Avoid, &["avoid", "dodge", "evade", "stay away"]),
        KeywordRule::new(Intent::Explore, &["explore", "look around", "search", "patrol"]),
    ]
}

/// Split lower-cased text into words
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_owned())
        .collect()
}

type Phrase = Vec<String>;

fn find_occurrences<'a>(words: &'a [String], phrase: &'a [String]) -> impl Iterator<Item = usize> + 'a {
    let len = phrase.len();
    let last_start = (words.len() + 1).saturating_sub(len);
    (0..last_start).filter(move |&start| len > 0 && words[start..start + len] == *phrase)
}

#[derive(Debug, Clone, Copy)]
struct Occurrence {
    rule: usize,
    start: usize,
    len: usize,
}

impl Occurrence {
    fn is_inside(&self, other: &Occurrence) -> bool {
        other.len > self.len && other.start <= self.start && self.start + self.len <= other.start + other.len
    }
}

/// # Keyword based intent classifier
///
/// Built from an ordered rule table and the emergency word list of the
/// [SafetyBounds](crate::config::SafetyBounds).
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    emergency: Vec<Phrase>,
    rules: Vec<(Intent, Vec<Phrase>)>,
}

impl IntentClassifier {
    pub fn new(rules: &[KeywordRule], emergency_words: &[String]) -> Self {
        let emergency = emergency_words
            .iter()
            .map(|w| tokenize(w))
            .filter(|p| !p.is_empty())
            .collect();
        let rules = rules
            .iter()
            .map(|rule| {
                let phrases = rule
                    .keywords
                    .iter()
                    .map(|k| tokenize(k))
                    .filter(|p| !p.is_empty())
                    .collect();
                (rule.intent, phrases)
            })
            .collect();

        Self { emergency, rules }
    }

    /// Classify an instruction
    ///
    /// Returns `None` when no keyword matches, the instruction is then uninterpretable.
    pub fn classify(&self, text: &str) -> Option<Intent> {
        let words = tokenize(text);

        if self
            .emergency
            .iter()
            .any(|phrase| find_occurrences(&words, phrase).next().is_some())
        {
            return Some(Intent::Emergency);
        }

        let occurrences: Vec<Occurrence> = self
            .rules
            .iter()
            .enumerate()
            .flat_map(|(rule, (_, phrases))| {
                let words = &words;
                phrases.iter().flat_map(move |phrase| {
                    find_occurrences(words, phrase).map(move |start| Occurrence {
                        rule,
                        start,
                        len: phrase.len(),
                    })
                })
            })
            .collect();

        occurrences
            .iter()
            .filter(|o| !occurrences.iter().any(|other| o.is_inside(other)))
            .map(|o| o.rule)
            .min()
            .map(|rule| self.rules[rule].0)
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(
            &default_keyword_rules(),
            &crate::config::SafetyBounds::default().emergency_words,
        )
    }
}
