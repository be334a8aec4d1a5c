//! # Numeric parameter extraction
//!
//! Distances and angles are read from the instruction text with an ordered list of unit patterns. The first pattern
//! that matches is converted to the canonical unit (cm or degrees) and clamped to the
//! [SafetyBounds]. When no unit is given, the first bare number is used. When there is no number at all, the
//! caller-supplied default is returned.
//!
//! Extraction never fails: whatever the input, the result is inside the bounds.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::SafetyBounds;

const CM_PER_METER: f64 = 100.0;
// Approximation used by the drone SDK users, 1 ft ≈ 30 cm
const CM_PER_FOOT: f64 = 30.0;

struct UnitPattern {
    regex: Regex,
    factor: f64,
}

impl UnitPattern {
    fn new(pattern: &str, factor: f64) -> Self {
        // Patterns are compile-time constants
        let regex = Regex::new(pattern).expect("invalid unit pattern");
        Self { regex, factor }
    }

    fn find(&self, text: &str) -> Option<f64> {
        let captures = self.regex.captures(text)?;
        let value: f64 = captures.get(1)?.as_str().parse().ok()?;
        Some(value * self.factor)
    }
}

fn distance_patterns() -> &'static [UnitPattern] {
    static PATTERNS: OnceLock<Vec<UnitPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            UnitPattern::new(r"(\d+(?:\.\d+)?)\s*(?:cm|centimet(?:er|re)s?)\b", 1.0),
            UnitPattern::new(r"(\d+(?:\.\d+)?)\s*(?:m|met(?:er|re)s?)\b", CM_PER_METER),
            UnitPattern::new(r"(\d+(?:\.\d+)?)\s*(?:ft|foot|feet)\b", CM_PER_FOOT),
            UnitPattern::new(r"(\d+(?:\.\d+)?)\s*(?:units?|steps?)\b", 1.0),
        ]
    })
}

fn angle_patterns() -> &'static [UnitPattern] {
    static PATTERNS: OnceLock<Vec<UnitPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            UnitPattern::new(r"(\d+(?:\.\d+)?)\s*(?:degrees?\b|deg\b|°)", 1.0),
            UnitPattern::new(r"(\d+(?:\.\d+)?)\s*(?:turns?|rotations?)\b", 1.0),
        ]
    })
}

fn bare_number() -> &'static UnitPattern {
    static PATTERN: OnceLock<UnitPattern> = OnceLock::new();
    PATTERN.get_or_init(|| UnitPattern::new(r"\b(\d+(?:\.\d+)?)\b", 1.0))
}

fn first_match(patterns: &[UnitPattern], text: &str) -> Option<f64> {
    patterns
        .iter()
        .find_map(|p| p.find(text))
        .or_else(|| bare_number().find(text))
}

// Float to integer casts saturate, so oversized numbers end up clamped to the maximum
fn to_integer(value: f64) -> u64 {
    value.round() as u64
}

/// # Distance and angle extractor
#[derive(Debug, Clone, Default)]
pub struct ParameterExtractor {
    bounds: SafetyBounds,
}

impl ParameterExtractor {
    pub fn new(bounds: SafetyBounds) -> Self {
        Self { bounds }
    }

    /// Extract a distance in cm
    ///
    /// Recognised units, in priority order: cm, m (×100), ft (×30), unit/step (×1).
    ///
    /// ```
    /// # use tello_copilot::interpreter::extract::ParameterExtractor;
    /// let extractor = ParameterExtractor::default();
    /// assert_eq!(extractor.distance("go up 2m", 50), 200);
    /// assert_eq!(extractor.distance("forward 5cm", 50), 20);
    /// assert_eq!(extractor.distance("forward", 50), 50);
    /// ```
    pub fn distance(&self, text: &str, default_cm: u32) -> u32 {
        match first_match(distance_patterns(), &text.to_lowercase()) {
            Some(cm) => self.bounds.clamp_distance(to_integer(cm)),
            None => default_cm,
        }
    }

    /// Extract an angle in degrees
    ///
    /// Recognised units, in priority order: degrees (`deg`, `°`), turn/rotation.
    pub fn angle(&self, text: &str, default_deg: u32) -> u32 {
        match first_match(angle_patterns(), &text.to_lowercase()) {
            Some(degrees) => self.bounds.clamp_angle(to_integer(degrees)),
            None => default_deg,
        }
    }
}
