//! # Vision subsystem
//!
//! Scene understanding is delegated to a [VisionAnalyzer]: given a frame and a free-text prompt it returns a
//! free-text description. Two analyzers are provided:
//!  - [HuggingFaceAnalyzer] posts the frame to the HuggingFace inference API,
//!  - [ScriptedAnalyzer] answers with canned descriptions picked from the prompt, for demos and tests.
//!
//! Each analysis runs in its own task and is bounded by a timeout. A successful analysis becomes the latest
//! [VisionObservation] and is appended to a bounded history, oldest entries being evicted first. A failed analysis
//! is reported and leaves the latest observation untouched.
//!
//! Periodic analysis of the current frame can be switched on and off at runtime with
//! [Vision::set_auto_analysis()].

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Local};
use futures::lock::Mutex;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::VisionConfig;
use crate::latest::Latest;
use crate::subsystems::events::{Event, EventSink};
use crate::subsystems::pause;
use crate::subsystems::video::{Frame, FrameFormat};
use crate::{Error, Result};

/// Prompt of on-demand analyses
pub const DEFAULT_PROMPT: &str = "Describe what you see in this drone camera view. \
    Identify any people, objects, obstacles, or interesting features.";

/// Prompt of periodic analyses
pub const AUTO_PROMPT: &str =
    "Describe the current view. Are there any obstacles, people, or interesting features to note?";

const NO_DESCRIPTION: &str = "No description available";

/// # Vision analysis service
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, frame: &Frame, prompt: &str) -> Result<String>;
}

/// Encode a frame as JPEG
///
/// JPEG frames are passed through, RGB frames are compressed at `quality`. H.264 access units must go through a
/// [DecodingSource](crate::subsystems::video::DecodingSource) first and are rejected here.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    match frame.format {
        FrameFormat::Jpeg => Ok(frame.data.clone()),
        FrameFormat::Rgb24 { width, height } => {
            let expected = width as usize * height as usize * 3;
            if frame.data.len() != expected {
                return Err(Error::VisionError(format!(
                    "RGB frame of {}x{} carries {} bytes, expected {}",
                    width,
                    height,
                    frame.data.len(),
                    expected
                )));
            }

            let mut jpeg = Cursor::new(Vec::new());
            JpegEncoder::new_with_quality(&mut jpeg, quality).encode(&frame.data, width, height, ColorType::Rgb8)?;
            Ok(jpeg.into_inner())
        }
        FrameFormat::H264 => Err(Error::VisionError(
            "H.264 frames must be decoded before analysis".to_owned(),
        )),
    }
}

#[derive(Serialize)]
struct InferenceInputs<'a> {
    image: String,
    text: &'a str,
}

#[derive(Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: InferenceInputs<'a>,
    parameters: InferenceParameters,
}

/// Pull the generated text out of an inference response
///
/// The API answers either with an object or with a list of objects carrying `generated_text`.
fn generated_text(response: &Value) -> String {
    let text = match response {
        Value::Array(items) => items.first().and_then(|i| i.get("generated_text")),
        other => other.get("generated_text"),
    };

    text.and_then(Value::as_str)
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NO_DESCRIPTION.to_owned())
}

/// # HuggingFace inference API analyzer
pub struct HuggingFaceAnalyzer {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    jpeg_quality: u8,
    max_new_tokens: u32,
    temperature: f32,
}

impl HuggingFaceAnalyzer {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        let token = config.token();
        if token.is_none() {
            warn!("No HuggingFace API token configured, requests are likely to be rejected");
        }

        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            api_url: config.api_url(),
            token,
            jpeg_quality: config.jpeg_quality,
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl VisionAnalyzer for HuggingFaceAnalyzer {
    async fn analyze(&self, frame: &Frame, prompt: &str) -> Result<String> {
        let jpeg = encode_jpeg(frame, self.jpeg_quality)?;

        let request = InferenceRequest {
            inputs: InferenceInputs {
                image: BASE64.encode(jpeg),
                text: prompt,
            },
            parameters: InferenceParameters {
                max_new_tokens: self.max_new_tokens,
                temperature: self.temperature,
            },
        };

        let mut builder = self.client.post(&self.api_url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::VisionError(format!("API error {}: {}", status, body)));
        }

        let response: Value = response.json().await?;
        Ok(generated_text(&response))
    }
}

const SCENES: &[&str] = &[
    "I can see an open indoor space with good lighting. The area appears clear with no immediate obstacles.",
    "There's a wall visible in the distance. I recommend maintaining safe distance from obstacles.",
    "I detect what appears to be furniture or objects in the room. Navigate carefully around them.",
    "The view shows a clear path ahead with plenty of space for maneuvering.",
    "I can see some people in the background. Maintain safe distance and fly responsibly.",
    "The lighting conditions are good for flight. The area appears suitable for drone operations.",
    "I notice some ceiling features above. Be mindful of altitude limits indoors.",
    "The floor appears to have a clear pattern. This could be useful for navigation reference.",
];

const OBSTACLE_SCENES: &[&str] = &[
    "I can see the room layout. There appear to be some objects that could be obstacles on the sides.",
    "The view shows a relatively clear central area with potential obstacles near the edges.",
    "I detect some vertical structures that could be obstacles. Recommend cautious navigation.",
];

const PEOPLE_SCENES: &[&str] = &[
    "I can detect what may be people in the background. Maintaining safe distance is recommended.",
    "There appear to be some human figures in the view. Flying responsibly around people.",
    "I notice some movement that could be people. Exercise caution during flight operations.",
];

const EXPLORE_SCENES: &[&str] = &[
    "The area looks suitable for exploration. I recommend starting with gentle movements.",
    "Good visibility for exploration. The space appears to have multiple interesting areas to investigate.",
    "This environment seems safe for exploration flights with appropriate caution.",
];

/// # Scripted analyzer
///
/// Picks a canned description at random among the ones matching the prompt topic (obstacles, people, exploration),
/// or always returns the same text when built with [ScriptedAnalyzer::fixed()].
#[derive(Debug, Default)]
pub struct ScriptedAnalyzer {
    fixed: Option<String>,
    latency: Option<Duration>,
    failing: AtomicBool,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always describe the scene with `description`
    pub fn fixed(description: impl Into<String>) -> Self {
        Self {
            fixed: Some(description.into()),
            ..Self::default()
        }
    }

    /// Simulated processing time of every analysis
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the following analyses fail, or succeed again
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Relaxed);
    }
}

#[async_trait]
impl VisionAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, frame: &Frame, prompt: &str) -> Result<String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Relaxed) {
            return Err(Error::VisionError("scripted analyzer failure".to_owned()));
        }
        if frame.is_empty() {
            return Err(Error::VisionError("empty frame".to_owned()));
        }

        if let Some(description) = &self.fixed {
            return Ok(description.clone());
        }

        let prompt = prompt.to_lowercase();
        let scenes = if prompt.contains("obstacle") {
            OBSTACLE_SCENES
        } else if prompt.contains("person") || prompt.contains("people") {
            PEOPLE_SCENES
        } else if prompt.contains("explore") {
            EXPLORE_SCENES
        } else {
            SCENES
        };

        let scene = scenes.choose(&mut rand::thread_rng()).copied().unwrap_or(NO_DESCRIPTION);
        Ok(scene.to_owned())
    }
}

/// Scene description obtained from the analyzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionObservation {
    pub timestamp: DateTime<Local>,
    pub prompt: String,
    pub description: String,
}

impl VisionObservation {
    pub fn new(prompt: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            prompt: prompt.into(),
            description: description.into(),
        }
    }
}

/// # Observation history
///
/// The latest observation plus a FIFO history of at most `capacity` entries.
#[derive(Debug, Clone)]
pub struct ObservationLog {
    capacity: usize,
    history: Arc<Mutex<VecDeque<Arc<VisionObservation>>>>,
    latest: Latest<VisionObservation>,
}

impl ObservationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            latest: Latest::new(),
        }
    }

    pub async fn record(&self, observation: VisionObservation) -> Arc<VisionObservation> {
        let observation = Arc::new(observation);

        let mut history = self.history.lock().await;
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(observation.clone());
        self.latest.publish_arc(observation.clone());

        observation
    }

    pub fn latest(&self) -> Option<Arc<VisionObservation>> {
        self.latest.get()
    }

    /// Oldest first
    pub async fn history(&self) -> Vec<Arc<VisionObservation>> {
        self.history.lock().await.iter().cloned().collect()
    }
}

/// # Access to the vision subsystem
///
/// See the [vision module documentation](crate::subsystems::vision) for more context and information.
#[derive(Clone)]
pub struct Vision {
    analyzer: Arc<dyn VisionAnalyzer>,
    frames: Latest<Frame>,
    log: ObservationLog,
    events: EventSink,
    timeout: Duration,
    auto_interval: Duration,
    auto: Arc<AtomicBool>,
}

impl Vision {
    pub fn new(
        analyzer: Arc<dyn VisionAnalyzer>,
        frames: Latest<Frame>,
        config: &VisionConfig,
        events: EventSink,
    ) -> Self {
        Self {
            analyzer,
            frames,
            log: ObservationLog::new(config.history_size),
            events,
            timeout: config.timeout(),
            auto_interval: config.auto_interval(),
            auto: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Analyze the current frame with the default prompt
    pub async fn analyze_current(&self) -> Result<Arc<VisionObservation>> {
        self.analyze_with_prompt(DEFAULT_PROMPT).await
    }

    /// Analyze the current frame with a custom prompt
    ///
    /// The request runs in its own task: dropping the returned future does not cancel it, only the timeout does.
    pub async fn analyze_with_prompt(&self, prompt: &str) -> Result<Arc<VisionObservation>> {
        let frame = match self.frames.get() {
            Some(frame) => frame,
            None => {
                self.events.status("No video frame available for analysis").await;
                return Err(Error::NoFrameAvailable);
            }
        };

        let vision = self.clone();
        let prompt = prompt.to_owned();
        tokio::spawn(async move { vision.run_analysis(frame, prompt).await }).await?
    }

    async fn run_analysis(&self, frame: Arc<Frame>, prompt: String) -> Result<Arc<VisionObservation>> {
        debug!("Analyzing frame with prompt {:?}", prompt);
        let result = match tokio::time::timeout(self.timeout, self.analyzer.analyze(&frame, &prompt)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        match result {
            Ok(description) => {
                let observation = self.log.record(VisionObservation::new(prompt, description)).await;
                info!("Vision: {}", observation.description);
                self.events.publish(Event::Observation(observation.clone())).await;
                Ok(observation)
            }
            Err(e) => {
                error!("Vision analysis failed: {}", e);
                self.events.publish(Event::AnalysisFailed(e.to_string())).await;
                Err(e)
            }
        }
    }

    /// Latest successful observation
    pub fn last_observation(&self) -> Option<Arc<VisionObservation>> {
        self.log.latest()
    }

    /// Recent observations, oldest first
    pub async fn history(&self) -> Vec<Arc<VisionObservation>> {
        self.log.history().await
    }

    pub fn set_auto_analysis(&self, enabled: bool) {
        self.auto.store(enabled, Relaxed);
        info!("Auto analysis {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn auto_analysis(&self) -> bool {
        self.auto.load(Relaxed)
    }

    pub(crate) fn spawn_auto_analysis(&self, disconnect: Arc<AtomicBool>) -> JoinHandle<()> {
        let vision = self.clone();

        tokio::spawn(async move {
            while !disconnect.load(Relaxed) {
                pause(&disconnect, vision.auto_interval).await;

                if !vision.auto_analysis() || disconnect.load(Relaxed) {
                    continue;
                }
                match vision.frames.get() {
                    // Failures are already reported as events
                    Some(frame) => {
                        let _ = vision.run_analysis(frame, AUTO_PROMPT.to_owned()).await;
                    }
                    None => debug!("Auto analysis: no frame yet"),
                }
            }
        })
    }
}
