//! # Motion transport
//!
//! The drone is reached through the [MotionTransport] capability: it executes primitive [Command]s, answers
//! [TelemetryQuery]s and switches the video stream on and off. The wire protocol is left to implementors.
//!
//! [SimulatedDrone] is an in-memory drone used by the demo shell and by the tests. It also provides synthetic video
//! frames as a [FallbackCapture] so that a complete session can run without hardware.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use async_trait::async_trait;
use futures::lock::Mutex;
use log::debug;
use tokio::time::Instant;

use crate::command::{Command, Direction, TelemetryQuery};
use crate::subsystems::video::{FallbackCapture, Frame, FrameFormat, FrameSource};
use crate::{Error, Result};

/// # Drone command transport
///
/// Implementations are shared between the tasks of a session and must tolerate concurrent calls, the
/// [Commander](crate::subsystems::commander::Commander) serialises the motion commands it sends.
#[async_trait]
pub trait MotionTransport: Send + Sync {
    /// Execute one primitive command, returning once the drone acknowledged it
    async fn execute(&self, command: &Command) -> Result<()>;

    /// Read one telemetry value
    async fn query(&self, query: TelemetryQuery) -> Result<i32>;

    /// Ask the drone to start streaming video
    async fn stream_on(&self) -> Result<()>;

    /// Ask the drone to stop streaming video
    async fn stream_off(&self) -> Result<()>;
}

const TAKEOFF_HEIGHT_CM: u32 = 80;
const MIN_FLIP_BATTERY: i32 = 50;
const INITIAL_BATTERY: i32 = 87;
const IDLE_TEMPERATURE: i32 = 62;

const FRAME_WIDTH: u32 = 96;
const FRAME_HEIGHT: u32 = 72;
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug)]
struct SimulatedState {
    flying: bool,
    height: u32,
    battery: i32,
    speed: i32,
    streaming: bool,
    airborne_since: Option<Instant>,
    flight_time: Duration,
    executed: Vec<Command>,
    failing_verbs: Vec<&'static str>,
}

/// # Simulated drone
///
/// Keeps a coarse model of the drone state: flying or not, height, battery, flight time. Motion commands are refused
/// while landed, as the real drone does. Failures can be injected per command verb, for queries and for the fallback
/// video.
pub struct SimulatedDrone {
    state: Mutex<SimulatedState>,
    queries_fail: AtomicBool,
    fallback_fails: AtomicBool,
}

impl Default for SimulatedDrone {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDrone {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                flying: false,
                height: 0,
                battery: INITIAL_BATTERY,
                speed: 100,
                streaming: false,
                airborne_since: None,
                flight_time: Duration::ZERO,
                executed: Vec::new(),
                failing_verbs: Vec::new(),
            }),
            queries_fail: AtomicBool::new(false),
            fallback_fails: AtomicBool::new(false),
        }
    }

    /// Make every command with this verb (`"forward"`, `"cw"`, `"flip"`, ...) fail
    pub async fn fail_on(&self, verb: &'static str) {
        self.state.lock().await.failing_verbs.push(verb);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.queries_fail.store(fail, Relaxed);
    }

    pub fn fail_fallback(&self, fail: bool) {
        self.fallback_fails.store(fail, Relaxed);
    }

    /// Commands accepted so far, in execution order
    pub async fn executed(&self) -> Vec<Command> {
        self.state.lock().await.executed.clone()
    }

    pub async fn is_flying(&self) -> bool {
        self.state.lock().await.flying
    }

    pub async fn height(&self) -> u32 {
        self.state.lock().await.height
    }

    pub async fn is_streaming(&self) -> bool {
        self.state.lock().await.streaming
    }
}

impl SimulatedState {
    fn land(&mut self) {
        if let Some(since) = self.airborne_since.take() {
            self.flight_time += since.elapsed();
        }
        self.flying = false;
        self.height = 0;
    }

    fn require_flying(&self, command: &Command) -> Result<()> {
        if self.flying {
            Ok(())
        } else {
            Err(Error::TransportError(format!("{}: not flying", command)))
        }
    }
}

#[async_trait]
impl MotionTransport for SimulatedDrone {
    async fn execute(&self, command: &Command) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.failing_verbs.contains(&command.verb()) {
            return Err(Error::TransportError(format!("{}: refused", command)));
        }

        match *command {
            Command::Takeoff => {
                if !state.flying {
                    state.flying = true;
                    state.height = TAKEOFF_HEIGHT_CM;
                    state.airborne_since = Some(Instant::now());
                }
            }
            Command::Land | Command::Emergency => state.land(),
            Command::Move { direction, cm } => {
                state.require_flying(command)?;
                match direction {
                    Direction::Up => state.height += cm,
                    Direction::Down => state.height = state.height.saturating_sub(cm),
                    _ => (),
                }
            }
            Command::Rotate { .. } => state.require_flying(command)?,
            Command::Flip(_) => {
                state.require_flying(command)?;
                if state.battery < MIN_FLIP_BATTERY {
                    return Err(Error::TransportError(format!("{}: battery too low", command)));
                }
            }
            Command::Rc { .. } => (),
        }

        if !matches!(command, Command::Rc { .. }) {
            state.battery = (state.battery - 1).max(0);
        }
        state.executed.push(*command);
        debug!("Simulated drone: {}", command);

        Ok(())
    }

    async fn query(&self, query: TelemetryQuery) -> Result<i32> {
        if self.queries_fail.load(Relaxed) {
            return Err(Error::TransportError(format!("{} query timed out", query.label())));
        }

        let state = self.state.lock().await;
        let value = match query {
            TelemetryQuery::Battery => state.battery,
            TelemetryQuery::Height => state.height as i32,
            TelemetryQuery::Temperature => IDLE_TEMPERATURE + if state.flying { 8 } else { 0 },
            TelemetryQuery::FlightTime => {
                let airborne = state.airborne_since.map(|s| s.elapsed()).unwrap_or_default();
                (state.flight_time + airborne).as_secs() as i32
            }
            TelemetryQuery::Speed => state.speed,
        };

        Ok(value)
    }

    async fn stream_on(&self) -> Result<()> {
        self.state.lock().await.streaming = true;
        Ok(())
    }

    async fn stream_off(&self) -> Result<()> {
        self.state.lock().await.streaming = false;
        Ok(())
    }
}

#[async_trait]
impl FallbackCapture for SimulatedDrone {
    async fn open_fallback(&self) -> Result<Box<dyn FrameSource>> {
        if self.fallback_fails.load(Relaxed) {
            return Err(Error::CaptureError("simulated camera unavailable".to_owned()));
        }
        Ok(Box::new(SyntheticFrames { tick: 0, released: false }))
    }
}

/// Moving gradient frames, one every ~33 ms
struct SyntheticFrames {
    tick: u32,
    released: bool,
}

#[async_trait]
impl FrameSource for SyntheticFrames {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Err(Error::CaptureError("synthetic source released".to_owned()));
        }
        tokio::time::sleep(FRAME_INTERVAL).await;
        self.tick = self.tick.wrapping_add(1);

        let mut data = Vec::with_capacity((FRAME_WIDTH * FRAME_HEIGHT * 3) as usize);
        for y in 0..FRAME_HEIGHT {
            for x in 0..FRAME_WIDTH {
                data.push(((x + self.tick) % 256) as u8);
                data.push(((y * 3) % 256) as u8);
                data.push((self.tick % 256) as u8);
            }
        }

        Ok(Some(Frame::new(
            FrameFormat::Rgb24 {
                width: FRAME_WIDTH,
                height: FRAME_HEIGHT,
            },
            data,
        )))
    }

    fn release(&mut self) {
        self.released = true;
    }
}
