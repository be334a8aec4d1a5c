use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

use flume as channel;
use futures::lock::Mutex;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::command::{Command, ManualInput, ParsedCommand, TelemetryQuery};
use crate::config::CopilotConfig;
use crate::interpreter::Interpreter;
use crate::subsystems::commander::{CommandOutcome, Commander, ExecutionReport};
use crate::subsystems::events::{self, Event, EventSink, Events};
use crate::subsystems::telemetry::TelemetryMonitor;
use crate::subsystems::video::{AcquisitionLoop, AcquisitionPhase, AcquisitionState, CaptureBackend, FallbackCapture, Video};
use crate::subsystems::vision::{Vision, VisionAnalyzer, VisionObservation};
use crate::transport::MotionTransport;
use crate::{Error, Result};

const EVENT_HISTORY: usize = 100;
const QUEUE_POLL: Duration = Duration::from_millis(100);

/// External services a session is built on
pub struct Collaborators {
    pub transport: Arc<dyn MotionTransport>,
    pub analyzer: Arc<dyn VisionAnalyzer>,
    /// Primary video capture, tried on every configured stream endpoint
    pub capture: Arc<dyn CaptureBackend>,
    /// Secondary video capture, used when no endpoint delivers frames
    pub fallback: Option<Arc<dyn FallbackCapture>>,
}

struct PlanRequest {
    instruction: String,
    plan: Vec<ParsedCommand>,
    epoch: u64,
    reply: channel::Sender<ExecutionReport>,
}

/// # The Copilot session
///
/// This struct is one-time use: Creating it will connect to the drone and once disconnected the object cannot be
/// reconnected. A new one need to be created to connect again.
///
/// Instructions are executed one at a time: [Copilot::instruct()] queues the synthesized plan and a single worker
/// runs the queued plans in FIFO order. Emergency plans are the exception, they run immediately and cancel every plan
/// queued or running at that time.
///
/// See the [tello-copilot crate root documentation](crate) for more context and information.
pub struct Copilot {
    /// Instruction interpreter
    pub interpreter: Interpreter,
    /// Plan and manual command execution
    pub commander: Arc<Commander>,
    /// Scene analysis
    pub vision: Vision,
    /// Most recent frame and acquisition state
    pub video: Video,
    /// Device state polling
    pub telemetry: TelemetryMonitor,
    /// Status and result events
    pub events: Events,
    event_sink: EventSink,
    plans: channel::Sender<PlanRequest>,
    emergency_epoch: Arc<AtomicU64>,
    limited: bool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disconnect: Arc<AtomicBool>,
}

impl Copilot {
    /// Connect a session
    ///
    /// The drone is probed by reading its battery level. A failing probe does not prevent the connection, the
    /// session is then flagged as limited. Video is switched on and acquired in the background, if that fails the
    /// controls keep working without video.
    ///
    /// An error is returned only if the configuration is invalid.
    pub async fn connect(config: CopilotConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let Collaborators {
            transport,
            analyzer,
            capture,
            fallback,
        } = collaborators;

        let disconnect = Arc::new(AtomicBool::new(false));
        let (event_sink, events) = events::channel(EVENT_HISTORY);

        let limited = match transport.query(TelemetryQuery::Battery).await {
            Ok(battery) => {
                info!("Connected, battery {}%", battery);
                event_sink.status(format!("Connected - Battery: {}%", battery)).await;
                false
            }
            Err(e) => {
                warn!("Battery probe failed ({}), connection is limited", e);
                event_sink.status("Connected (Limited)").await;
                true
            }
        };

        let telemetry = TelemetryMonitor::new();
        let video = Video::new();

        let commander = Arc::new(Commander::new(
            transport.clone(),
            config.safety.clone(),
            config.execution.settle_delay(),
            telemetry.clone(),
            event_sink.clone(),
        ));
        let vision = Vision::new(analyzer, video.frames.clone(), &config.vision, event_sink.clone());

        let mut tasks = Vec::new();

        // Video
        match transport.stream_on().await {
            Ok(()) => {
                let mut acquisition = AcquisitionLoop::new(&config.video, capture, event_sink.clone())?
                    .with_transport(transport.clone())
                    .with_state(video.state.clone());
                if let Some(fallback) = fallback {
                    acquisition = acquisition.with_fallback(fallback);
                }
                let frames = video.frames.clone();
                let stop = disconnect.clone();
                tasks.push(tokio::spawn(async move {
                    acquisition.run(frames, stop).await;
                }));
            }
            Err(e) => {
                warn!("Cannot start video stream: {}", e);
                video.state.publish(AcquisitionState {
                    phase: AcquisitionPhase::NoVideo,
                    active_source: None,
                    fallback: false,
                    consecutive_failures: 0,
                    frames: 0,
                });
                event_sink
                    .status(format!("Video stream unavailable ({}), controls remain active", e))
                    .await;
            }
        }

        // Telemetry
        tasks.push(telemetry.spawn_poller(
            transport.clone(),
            event_sink.clone(),
            config.telemetry.interval(),
            disconnect.clone(),
        ));

        // Auto analysis
        tasks.push(vision.spawn_auto_analysis(disconnect.clone()));

        // Plan queue
        let (plans, rx) = channel::unbounded::<PlanRequest>();
        let emergency_epoch = Arc::new(AtomicU64::new(0));
        let worker_commander = commander.clone();
        let worker_epoch = emergency_epoch.clone();
        let worker_disconnect = disconnect.clone();
        tasks.push(tokio::spawn(async move {
            while !worker_disconnect.load(Relaxed) {
                match timeout(QUEUE_POLL, rx.recv_async()).await {
                    Ok(Ok(request)) => {
                        let cancelled = || {
                            worker_disconnect.load(Relaxed) || worker_epoch.load(Relaxed) != request.epoch
                        };
                        let report = worker_commander
                            .execute_plan_unless(&request.instruction, &request.plan, cancelled)
                            .await;
                        // The caller may have given up waiting
                        let _ = request.reply.send(report);
                    }
                    Err(_) => (),
                    Ok(Err(flume::RecvError::Disconnected)) => return,
                }
            }
        }));

        Ok(Copilot {
            interpreter: Interpreter::new(&config),
            commander,
            vision,
            video,
            telemetry,
            events,
            event_sink,
            plans,
            emergency_epoch,
            limited,
            tasks: Mutex::new(tasks),
            disconnect,
        })
    }

    fn check_connected(&self) -> Result<()> {
        if self.disconnect.load(Relaxed) {
            Err(Error::Disconnected)
        } else {
            Ok(())
        }
    }

    /// The battery probe failed at connection time
    pub fn is_limited(&self) -> bool {
        self.limited
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnect.load(Relaxed)
    }

    /// Interpret and execute a free-text instruction
    ///
    /// The instruction is interpreted against the latest vision observation and its plan queued behind the ones
    /// already pending. The function returns once the plan has been executed. An instruction that cannot be
    /// interpreted is not an error, it yields an empty report.
    ///
    /// Plans containing an emergency stop skip the queue.
    pub async fn instruct(&self, instruction: &str) -> Result<ExecutionReport> {
        self.check_connected()?;

        let observation = self.vision.last_observation();
        let plan = self
            .interpreter
            .synthesize(instruction, observation.as_ref().map(|o| o.description.as_str()));

        self.event_sink
            .publish(Event::Plan {
                instruction: instruction.to_owned(),
                plan: plan.clone(),
            })
            .await;

        if plan.is_empty() {
            debug!("No commands produced for {:?}", instruction);
            return Ok(ExecutionReport::empty(instruction));
        }

        if plan.iter().filter_map(ParsedCommand::command).any(Command::is_emergency) {
            self.emergency_epoch.fetch_add(1, Relaxed);
            warn!("Emergency stop requested");
            return Ok(self.commander.execute_plan(instruction, &plan).await);
        }

        let (reply, report) = channel::bounded(1);
        self.plans
            .send_async(PlanRequest {
                instruction: instruction.to_owned(),
                plan,
                epoch: self.emergency_epoch.load(Relaxed),
                reply,
            })
            .await?;

        Ok(report.recv_async().await?)
    }

    /// Run one manual command line
    ///
    /// Accepts telemetry queries (`battery?`, `height?`, `speed?`, `temp?`, `time?`) and primitive commands in their
    /// textual form (`forward 50`, `cw 90`, `flip l`, ...). Returns a human readable status line.
    pub async fn send_manual(&self, line: &str) -> Result<String> {
        self.check_connected()?;

        match line.parse::<ManualInput>()? {
            ManualInput::Query(query) => {
                let value = self.commander.query(query).await?;
                Ok(format!("{}: {}{}", query.label(), value, query.unit()))
            }
            ManualInput::Command(command) => {
                if command.is_emergency() {
                    self.emergency_epoch.fetch_add(1, Relaxed);
                }
                let report = self.commander.execute(command).await;
                let command = report.command;
                match report.outcome {
                    CommandOutcome::Executed => Ok(format!("Executed: {}", command)),
                    CommandOutcome::Skipped(reason) => Ok(format!("Skipped: {} ({})", command, reason)),
                    CommandOutcome::Failed(reason) => Err(Error::TransportError(reason)),
                }
            }
        }
    }

    /// Send remote-control stick values, each in [-100, 100]
    pub async fn send_rc(&self, lr: i8, fb: i8, ud: i8, yaw: i8) -> Result<()> {
        self.check_connected()?;
        self.commander.send_rc(lr, fb, ud, yaw).await
    }

    fn check_video(&self) -> Result<()> {
        let no_video = self
            .video
            .state()
            .map_or(false, |state| state.phase == AcquisitionPhase::NoVideo);
        if no_video && self.video.current_frame().is_none() {
            Err(Error::NoVideoAvailable)
        } else {
            Ok(())
        }
    }

    /// Describe the current frame with the default prompt
    ///
    /// Returns [Error::NoVideoAvailable] when video acquisition gave up without ever delivering a frame.
    pub async fn analyze_current(&self) -> Result<Arc<VisionObservation>> {
        self.check_connected()?;
        self.check_video()?;
        self.vision.analyze_current().await
    }

    /// Describe the current frame with a custom prompt
    pub async fn analyze_with_prompt(&self, prompt: &str) -> Result<Arc<VisionObservation>> {
        self.check_connected()?;
        self.check_video()?;
        self.vision.analyze_with_prompt(prompt).await
    }

    /// Switch periodic analysis of the current frame on or off
    pub async fn set_auto_analysis(&self, enabled: bool) {
        self.vision.set_auto_analysis(enabled);
        let state = if enabled { "enabled" } else { "disabled" };
        self.event_sink.status(format!("Auto analysis {}", state)).await;
    }

    /// Disconnect the session
    ///
    /// The session can be ended in two ways: either by dropping the [Copilot] object or by calling this
    /// disconnect() function. Once this function returns, every background task has ended, the video capture has
    /// been released and the drone asked to stop streaming.
    ///
    /// Sticks are centered before disconnecting. Pending instructions return [Error::Disconnected].
    pub async fn disconnect(&self) {
        if self.disconnect.load(Relaxed) {
            return;
        }

        if let Err(e) = self.commander.send_rc(0, 0, 0, 0).await {
            debug!("Cannot center sticks: {}", e);
        }

        // Set disconnect to true, will make all the tasks quit
        self.disconnect.store(true, Relaxed);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        self.event_sink.status("Disconnected").await;
        info!("Disconnected");
    }
}

impl Drop for Copilot {
    fn drop(&mut self) {
        self.disconnect.store(true, Relaxed);
    }
}
