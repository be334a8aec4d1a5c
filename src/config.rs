//! # Configuration
//!
//! All tunables of a [Copilot](crate::Copilot) session live in [CopilotConfig]. The configuration is read-only once
//! the session is connected. It can be built in code, starting from [CopilotConfig::default()], or loaded from a TOML
//! document where every section and every key is optional:
//!
//! ```
//! # use tello_copilot::config::CopilotConfig;
//! let config = CopilotConfig::from_toml_str(r#"
//!     [safety]
//!     max_distance = 300
//!
//!     [execution]
//!     settle_delay_ms = 250
//! "#).unwrap();
//!
//! assert_eq!(config.safety.max_distance, 300);
//! assert_eq!(config.safety.min_distance, 20);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::interpreter::intent::{default_keyword_rules, KeywordRule};
use crate::subsystems::video::StreamEndpoint;
use crate::{Error, Result};

/// Default number of vision observations kept in the history
pub const DEFAULT_HISTORY_SIZE: usize = 10;

/// # Safety bounds
///
/// Static limits applied to every numeric argument sent to the drone. Values outside of the bounds are clamped, never
/// rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyBounds {
    /// Minimum movement distance (cm)
    pub min_distance: u32,
    /// Maximum movement distance (cm)
    pub max_distance: u32,
    /// Minimum rotation angle (degrees)
    pub min_angle: u32,
    /// Maximum rotation angle (degrees)
    pub max_angle: u32,
    /// Altitude ceiling (cm), enforced on `up` moves when the current height is known
    pub max_altitude: u32,
    /// Words that trigger an immediate emergency stop, whatever else the instruction says
    pub emergency_words: Vec<String>,
}

impl Default for SafetyBounds {
    fn default() -> Self {
        Self {
            min_distance: 20,
            max_distance: 500,
            min_angle: 1,
            max_angle: 360,
            max_altitude: 300,
            emergency_words: ["emergency", "stop", "halt", "abort", "cancel"]
                .iter()
                .map(|w| w.to_string())
                .collect(),
        }
    }
}

impl SafetyBounds {
    pub fn clamp_distance(&self, cm: u64) -> u32 {
        cm.clamp(self.min_distance as u64, self.max_distance as u64) as u32
    }

    pub fn clamp_angle(&self, degrees: u64) -> u32 {
        degrees.clamp(self.min_angle as u64, self.max_angle as u64) as u32
    }

    /// Clamp the numeric arguments of any command into the bounds
    ///
    /// RC stick values are clamped to [-100, 100].
    pub fn clamp_command(&self, command: Command) -> Command {
        match command {
            Command::Move { direction, cm } => Command::Move {
                direction,
                cm: self.clamp_distance(cm as u64),
            },
            Command::Rotate { rotation, degrees } => Command::Rotate {
                rotation,
                degrees: self.clamp_angle(degrees as u64),
            },
            Command::Rc { lr, fb, ud, yaw } => Command::Rc {
                lr: lr.clamp(-100, 100),
                fb: fb.clamp(-100, 100),
                ud: ud.clamp(-100, 100),
                yaw: yaw.clamp(-100, 100),
            },
            other => other,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.min_distance == 0 || self.min_distance > self.max_distance {
            return Err(Error::ConfigError(format!(
                "invalid distance range [{}, {}]",
                self.min_distance, self.max_distance
            )));
        }
        if self.min_angle == 0 || self.min_angle > self.max_angle {
            return Err(Error::ConfigError(format!(
                "invalid angle range [{}, {}]",
                self.min_angle, self.max_angle
            )));
        }
        Ok(())
    }
}

/// Fallback values used when an instruction carries no number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Translation distance (cm)
    pub distance_cm: u32,
    /// Rotation angle (degrees)
    pub angle_deg: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            distance_cm: 50,
            angle_deg: 90,
        }
    }
}

/// Plan execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Delay between two executable commands of the same plan
    pub settle_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
        }
    }
}

impl ExecutionConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Video acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Stream endpoints, tried in this order
    pub candidates: Vec<String>,
    /// Time allowed for the single validation read of a candidate
    pub probe_timeout_ms: u64,
    /// Upper bound of a single frame read once streaming
    pub read_timeout_ms: u64,
    /// Pause after a read that returned no frame
    pub idle_backoff_ms: u64,
    /// Pause after a failed read
    pub error_backoff_ms: u64,
    /// Consecutive failures after which the feed is reported as degraded
    pub degraded_after: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                "udp://192.168.10.1:11111".to_owned(),
                "udp://@192.168.10.1:11111".to_owned(),
                "udp://0.0.0.0:11111".to_owned(),
            ],
            probe_timeout_ms: 2000,
            read_timeout_ms: 1000,
            idle_backoff_ms: 33,
            error_backoff_ms: 100,
            degraded_after: 5,
        }
    }
}

impl VideoConfig {
    /// Parse the configured candidates, keeping their priority order
    pub fn endpoints(&self) -> Result<Vec<StreamEndpoint>> {
        self.candidates.iter().map(|c| c.parse()).collect()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Vision service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Base URL of the inference API, the model name is appended
    pub api_base: String,
    /// Model used for scene description
    pub model: String,
    /// Bearer token, `HUGGINGFACE_API_TOKEN` is used when unset
    pub api_token: Option<String>,
    /// Upper bound of one analysis request
    pub timeout_secs: u64,
    /// Period of the automatic analysis
    pub auto_interval_secs: u64,
    /// Number of observations kept in the history
    pub history_size: usize,
    /// JPEG quality used when uploading raw frames
    pub jpeg_quality: u8,
    pub max_new_tokens: u32,
    pub temperature: f32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api-inference.huggingface.co/models".to_owned(),
            model: "microsoft/StreamVLM".to_owned(),
            api_token: None,
            timeout_secs: 10,
            auto_interval_secs: 5,
            history_size: DEFAULT_HISTORY_SIZE,
            jpeg_quality: 85,
            max_new_tokens: 100,
            temperature: 0.7,
        }
    }
}

impl VisionConfig {
    pub fn api_url(&self) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), self.model)
    }

    /// Token from the configuration, or from the environment
    pub fn token(&self) -> Option<String> {
        self.api_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("HUGGINGFACE_API_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn auto_interval(&self) -> Duration {
        Duration::from_secs(self.auto_interval_secs)
    }
}

/// Telemetry polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { interval_secs: 2 }
    }
}

impl TelemetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// # Session configuration
///
/// See the [config module documentation](crate::config) for an example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopilotConfig {
    pub safety: SafetyBounds,
    pub defaults: Defaults,
    /// Intent rules, in priority order: the first rule with a matching keyword wins
    pub keywords: Vec<KeywordRule>,
    pub execution: ExecutionConfig,
    pub video: VideoConfig,
    pub vision: VisionConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            safety: SafetyBounds::default(),
            defaults: Defaults::default(),
            keywords: default_keyword_rules(),
            execution: ExecutionConfig::default(),
            video: VideoConfig::default(),
            vision: VisionConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl CopilotConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: CopilotConfig = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check the configuration for inconsistencies
    ///
    /// Defaults must lie inside the safety bounds so that extraction always yields an in-bounds value.
    pub fn validate(&self) -> Result<()> {
        self.safety.validate()?;

        let distance = self.defaults.distance_cm;
        if distance < self.safety.min_distance || distance > self.safety.max_distance {
            return Err(Error::ConfigError(format!(
                "default distance {} outside of safety bounds",
                distance
            )));
        }
        let angle = self.defaults.angle_deg;
        if angle < self.safety.min_angle || angle > self.safety.max_angle {
            return Err(Error::ConfigError(format!(
                "default angle {} outside of safety bounds",
                angle
            )));
        }

        if self.keywords.iter().any(|rule| rule.keywords.is_empty()) {
            return Err(Error::ConfigError("keyword rule without keywords".to_owned()));
        }

        if self.vision.history_size == 0 {
            return Err(Error::ConfigError("vision history size must be at least 1".to_owned()));
        }
        if self.vision.timeout_secs == 0 || self.vision.auto_interval_secs == 0 {
            return Err(Error::ConfigError(
                "vision timeout and auto analysis interval must be at least 1s".to_owned(),
            ));
        }
        if self.telemetry.interval_secs == 0 {
            return Err(Error::ConfigError("telemetry interval must be at least 1s".to_owned()));
        }

        let video = &self.video;
        for (key, value) in [
            ("probe_timeout_ms", video.probe_timeout_ms),
            ("read_timeout_ms", video.read_timeout_ms),
            ("idle_backoff_ms", video.idle_backoff_ms),
            ("error_backoff_ms", video.error_backoff_ms),
        ] {
            if value == 0 {
                return Err(Error::ConfigError(format!("video {} must be at least 1ms", key)));
            }
        }
        video.endpoints()?;

        Ok(())
    }
}
