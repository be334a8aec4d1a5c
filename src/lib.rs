//! # Tello copilot
//!
//! This crate turns free-text operator instructions into safety-bounded drone commands, optionally informed by a
//! description of the current camera view, and keeps a live video feed from the drone acquired across several
//! possible stream configurations.
//!
//! The drone itself and the vision service are collaborators reached through capability traits:
//! [MotionTransport](transport::MotionTransport) for commands and telemetry,
//! [VisionAnalyzer](subsystems::vision::VisionAnalyzer) for scene descriptions, and
//! [CaptureBackend](subsystems::video::CaptureBackend) / [FallbackCapture](subsystems::video::FallbackCapture)
//! for video frames. A [SimulatedDrone](transport::SimulatedDrone) and a
//! [ScriptedAnalyzer](subsystems::vision::ScriptedAnalyzer) are provided to run a session without hardware.
//!
//! ## Status
//!
//! The functionalities are implemented in subsystems. The current status is:
//!
//! | Subsystem | Support |
//! |-----------|---------|
//! | Interpreter | Full (keyword based) |
//! | Commander | Full |
//! | Events | Full |
//! | Telemetry | Battery, height, flight time, temperature |
//! | Video | UDP capture with H.264 decoding, fallback capture |
//! | Vision | HuggingFace inference API, scripted |
//!
//! ## Usage
//!
//! The basic procedure to use the lib is:
//!  - Build a [CopilotConfig](config::CopilotConfig), either with the defaults or loaded from a TOML file
//!  - Pick the collaborators: a transport, a vision analyzer and the video capture backends
//!  - Create a [Copilot] object, this probes the drone, enables the video stream and starts the background tasks
//!  - Subsystems are available as public fields of the [Copilot] struct
//!  - Drop the Copilot object or call [Copilot::disconnect()]
//!
//! All methods take an un-mutable reference to self (`&self`), the intention is for the Copilot object to be shared
//! between tasks using `Arc<>`.
//!
//! For example:
//! ``` no_run
//! # use std::sync::Arc;
//! # use tello_copilot::config::CopilotConfig;
//! # use tello_copilot::copilot::{Collaborators, Copilot};
//! # use tello_copilot::subsystems::video::UdpCaptureBackend;
//! # use tello_copilot::subsystems::vision::ScriptedAnalyzer;
//! # use tello_copilot::transport::SimulatedDrone;
//! # async fn test() -> Result<(), Box<dyn std::error::Error>> {
//! let drone = Arc::new(SimulatedDrone::new());
//! let collaborators = Collaborators {
//!     transport: drone.clone(),
//!     analyzer: Arc::new(ScriptedAnalyzer::new()),
//!     capture: Arc::new(UdpCaptureBackend::new()),
//!     fallback: Some(drone),
//! };
//!
//! let copilot = Copilot::connect(CopilotConfig::default(), collaborators).await?;
//!
//! let report = copilot.instruct("take off").await?;
//! println!("{}", report);
//! let report = copilot.instruct("move forward 1.5m then look around").await?;
//! println!("{}", report);
//!
//! copilot.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod copilot;
mod error;
pub mod interpreter;
pub mod latest;
pub mod subsystems;
pub mod transport;

pub use crate::command::{
    Command, Direction, FlipDirection, ManualInput, ParsedCommand, Rotation, TelemetryQuery,
};
pub use crate::copilot::Copilot;
pub use crate::error::{Error, Result};
