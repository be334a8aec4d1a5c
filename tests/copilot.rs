// End-to-end sessions against the simulated drone

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tello_copilot::config::CopilotConfig;
use tello_copilot::copilot::{Collaborators, Copilot};
use tello_copilot::subsystems::commander::CommandOutcome;
use tello_copilot::subsystems::events::Event;
use tello_copilot::subsystems::video::{AcquisitionPhase, CaptureBackend, FrameSource, StreamEndpoint};
use tello_copilot::subsystems::vision::ScriptedAnalyzer;
use tello_copilot::transport::SimulatedDrone;
use tello_copilot::{Command, Direction, Error, Result, Rotation};

/// No stream endpoint ever works, video comes from the simulator fallback
struct NoStream;

#[async_trait]
impl CaptureBackend for NoStream {
    async fn open(&self, endpoint: &StreamEndpoint) -> Result<Box<dyn FrameSource>> {
        Err(Error::CaptureError(format!("{} unreachable", endpoint)))
    }
}

async fn connect_with(
    config: CopilotConfig,
    drone: Arc<SimulatedDrone>,
    scene: &str,
) -> Copilot {
    Copilot::connect(
        config,
        Collaborators {
            transport: drone.clone(),
            analyzer: Arc::new(ScriptedAnalyzer::fixed(scene)),
            capture: Arc::new(NoStream),
            fallback: Some(drone),
        },
    )
    .await
    .unwrap()
}

async fn connect(drone: Arc<SimulatedDrone>) -> Copilot {
    connect_with(CopilotConfig::default(), drone, "I see a person near the wall").await
}

async fn wait_for_frame(copilot: &Copilot) {
    while copilot.video.current_frame().is_none() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn forward(cm: u32) -> Command {
    Command::Move {
        direction: Direction::Forward,
        cm,
    }
}

#[tokio::test(start_paused = true)]
async fn instructions_are_executed_in_order() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = connect(drone.clone()).await;

    let report = copilot.instruct("take off").await.unwrap();
    assert_eq!(report.executed(), vec![Command::Takeoff]);

    let report = copilot.instruct("move forward 120cm").await.unwrap();
    assert_eq!(report.executed(), vec![forward(120)]);

    let report = copilot.instruct("turn left").await.unwrap();
    assert_eq!(
        report.executed(),
        vec![Command::Rotate {
            rotation: Rotation::CounterClockwise,
            degrees: 90
        }]
    );

    assert_eq!(drone.executed().await.len(), 3);
    assert!(drone.is_flying().await);

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn follow_uses_last_observation() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = connect(drone.clone()).await;
    copilot.instruct("take off").await.unwrap();

    // Nothing observed yet
    let report = copilot.instruct("follow").await.unwrap();
    assert!(report.executed().is_empty());

    wait_for_frame(&copilot).await;
    let observation = copilot.analyze_current().await.unwrap();
    assert_eq!(observation.description, "I see a person near the wall");

    let report = copilot.instruct("follow").await.unwrap();
    assert_eq!(report.plan.len(), 2);
    assert!(report.plan[0].is_comment());
    assert_eq!(report.executed(), vec![forward(30)]);

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn failed_command_does_not_abort_plan() {
    let drone = Arc::new(SimulatedDrone::new());
    drone.fail_on("cw").await;
    let copilot = connect(drone.clone()).await;
    copilot.instruct("take off").await.unwrap();

    let report = copilot.instruct("explore the area").await.unwrap();

    assert_eq!(report.commands.len(), 4);
    assert_eq!(report.failures(), 2);
    assert_eq!(report.executed(), vec![forward(30), forward(30)]);
    assert!(matches!(report.commands[0].outcome, CommandOutcome::Failed(_)));

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn settle_delay_separates_commands() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = connect(drone.clone()).await;
    copilot.instruct("take off").await.unwrap();

    let start = tokio::time::Instant::now();
    copilot.instruct("explore").await.unwrap();

    // Four commands, three delays of 500 ms
    assert!(start.elapsed() >= Duration::from_millis(1500));

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn altitude_ceiling_limits_climbs() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = connect(drone.clone()).await;
    copilot.instruct("take off").await.unwrap();

    // 80 cm after takeoff, 300 cm ceiling
    let report = copilot.instruct("go up 5m").await.unwrap();
    assert_eq!(
        report.executed(),
        vec![Command::Move {
            direction: Direction::Up,
            cm: 220
        }]
    );
    assert_eq!(drone.height().await, 300);

    let report = copilot.instruct("higher").await.unwrap();
    assert!(matches!(report.commands[0].outcome, CommandOutcome::Skipped(_)));
    assert_eq!(drone.height().await, 300);

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn plans_are_queued_one_at_a_time() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = Arc::new(connect(drone.clone()).await);
    copilot.instruct("take off").await.unwrap();

    let (first, second) = tokio::join!(copilot.instruct("forward 30cm"), copilot.instruct("back 40cm"));
    assert_eq!(first.unwrap().executed(), vec![forward(30)]);
    assert_eq!(
        second.unwrap().executed(),
        vec![Command::Move {
            direction: Direction::Back,
            cm: 40
        }]
    );

    let executed = drone.executed().await;
    assert_eq!(executed[1..], [forward(30), Command::Move { direction: Direction::Back, cm: 40 }]);

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn emergency_cancels_running_plan() {
    let drone = Arc::new(SimulatedDrone::new());
    let config = CopilotConfig::from_toml_str("[execution]\nsettle_delay_ms = 5000").unwrap();
    let copilot = Arc::new(connect_with(config, drone.clone(), "nothing").await);
    copilot.instruct("take off").await.unwrap();

    let exploring = copilot.clone();
    let exploration = tokio::spawn(async move { exploring.instruct("explore").await });

    // The first rotation is done, the plan waits for the settle delay
    tokio::time::sleep(Duration::from_secs(1)).await;
    let report = copilot.instruct("emergency, stop now").await.unwrap();
    assert_eq!(report.executed(), vec![Command::Emergency]);

    let exploration = exploration.await.unwrap().unwrap();
    assert_eq!(exploration.executed().len(), 1);
    assert!(exploration.commands[1..]
        .iter()
        .all(|r| matches!(r.outcome, CommandOutcome::Skipped(_))));

    assert!(!drone.is_flying().await);
    assert_eq!(drone.executed().await.last(), Some(&Command::Emergency));

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn uninterpretable_instruction_is_not_an_error() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = connect(drone.clone()).await;

    let report = copilot.instruct("sing a song").await.unwrap();
    assert!(report.no_commands());
    assert!(drone.executed().await.is_empty());

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn manual_commands() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = connect(drone.clone()).await;

    assert_eq!(copilot.send_manual("battery?").await.unwrap(), "Battery: 87%");
    // Not flying yet
    assert!(matches!(
        copilot.send_manual("cw 45").await,
        Err(Error::TransportError(_))
    ));
    assert_eq!(copilot.send_manual("takeoff").await.unwrap(), "Executed: takeoff");
    assert_eq!(copilot.send_manual("forward 1000").await.unwrap(), "Executed: forward 500");
    assert_eq!(copilot.send_manual("height?").await.unwrap(), "Height: 80cm");
    assert!(matches!(copilot.send_manual("dance").await, Err(Error::ParseError(_))));

    copilot.send_rc(0, 50, 0, -20).await.unwrap();

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn failed_probe_gives_limited_connection() {
    let drone = Arc::new(SimulatedDrone::new());
    drone.fail_queries(true);
    let copilot = connect(drone.clone()).await;

    assert!(copilot.is_limited());
    let history = copilot.events.history().await;
    assert!(matches!(&history[0], Event::Status(s) if s == "Connected (Limited)"));

    // Controls still work
    let report = copilot.instruct("take off").await.unwrap();
    assert_eq!(report.executed(), vec![Command::Takeoff]);

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn telemetry_and_auto_analysis() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = connect(drone.clone()).await;
    wait_for_frame(&copilot).await;

    copilot.set_auto_analysis(true).await;
    tokio::time::sleep(Duration::from_secs(12)).await;

    let telemetry = copilot.telemetry.latest().unwrap();
    assert_eq!(telemetry.battery, Some(87));
    assert_eq!(telemetry.height, Some(0));

    assert!(copilot.vision.history().await.len() >= 2);

    copilot.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_releases_everything() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = connect(drone.clone()).await;
    wait_for_frame(&copilot).await;
    assert!(drone.is_streaming().await);

    copilot.disconnect().await;

    assert!(!copilot.is_connected());
    assert!(!drone.is_streaming().await);
    assert_eq!(copilot.video.state().unwrap().phase, AcquisitionPhase::Stopped);
    assert_eq!(
        drone.executed().await.last(),
        Some(&Command::Rc {
            lr: 0,
            fb: 0,
            ud: 0,
            yaw: 0
        })
    );
    assert!(matches!(copilot.instruct("land").await, Err(Error::Disconnected)));
}

#[tokio::test(start_paused = true)]
async fn analysis_without_video_is_reported() {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = Copilot::connect(
        CopilotConfig::default(),
        Collaborators {
            transport: drone.clone(),
            analyzer: Arc::new(ScriptedAnalyzer::fixed("a wall")),
            capture: Arc::new(NoStream),
            fallback: None,
        },
    )
    .await
    .unwrap();

    while copilot.video.state().map_or(true, |s| s.phase != AcquisitionPhase::NoVideo) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(matches!(copilot.analyze_current().await, Err(Error::NoVideoAvailable)));
    assert!(matches!(
        copilot.analyze_with_prompt("Is there a person?").await,
        Err(Error::NoVideoAvailable)
    ));

    // Controls are not affected
    let report = copilot.instruct("take off").await.unwrap();
    assert_eq!(report.executed(), vec![Command::Takeoff]);

    copilot.disconnect().await;
}

#[test]
fn configuration_errors() {
    let cases = [
        "[safety]\nmin_distance = 600",
        "[defaults]\ndistance_cm = 5",
        "[defaults]\nangle_deg = 400",
        "[video]\ncandidates = [\"rtsp://192.168.10.1\"]",
        "[vision]\nhistory_size = 0",
        "[telemetry]\ninterval_secs = \"often\"",
        "[telemetry]\ninterval_secs = 0",
        "[video]\nprobe_timeout_ms = 0",
        "[video]\nread_timeout_ms = 0",
        "[video]\nidle_backoff_ms = 0",
        "[video]\nerror_backoff_ms = 0",
    ];

    for case in cases {
        assert!(
            matches!(CopilotConfig::from_toml_str(case), Err(Error::ConfigError(_))),
            "{}",
            case
        );
    }

    let config = CopilotConfig::from_toml_str("").unwrap();
    assert_eq!(config, CopilotConfig::default());
}
