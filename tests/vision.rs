// Vision analysis, observation history and frame encoding

use std::sync::Arc;
use std::time::Duration;

use tello_copilot::config::VisionConfig;
use tello_copilot::latest::Latest;
use tello_copilot::subsystems::events::{self, Event};
use tello_copilot::subsystems::video::{Frame, FrameFormat};
use tello_copilot::subsystems::vision::{
    encode_jpeg, ObservationLog, ScriptedAnalyzer, Vision, VisionAnalyzer, VisionObservation,
};
use tello_copilot::Error;

fn rgb_frame() -> Frame {
    Frame::new(FrameFormat::Rgb24 { width: 4, height: 2 }, vec![128; 4 * 2 * 3])
}

#[tokio::test]
async fn history_keeps_last_ten_observations() {
    let log = ObservationLog::new(10);

    for i in 0..15 {
        log.record(VisionObservation::new("prompt", format!("scene {}", i))).await;
    }

    let history = log.history().await;
    assert_eq!(history.len(), 10);
    assert_eq!(history.first().unwrap().description, "scene 5");
    assert_eq!(history.last().unwrap().description, "scene 14");
    assert_eq!(log.latest().unwrap().description, "scene 14");
}

#[tokio::test]
async fn failed_analysis_keeps_last_observation() {
    let analyzer = Arc::new(ScriptedAnalyzer::fixed("An empty corridor"));
    let frames = Latest::new();
    frames.publish(rgb_frame());
    let (sink, events) = events::channel(16);
    let vision = Vision::new(analyzer.clone(), frames, &VisionConfig::default(), sink);

    let observation = vision.analyze_current().await.unwrap();
    assert_eq!(observation.description, "An empty corridor");

    analyzer.set_failing(true);
    let result = vision.analyze_with_prompt("Any people?").await;
    assert!(matches!(result, Err(Error::VisionError(_))));

    let last = vision.last_observation().unwrap();
    assert_eq!(last.description, "An empty corridor");
    assert_eq!(vision.history().await.len(), 1);
    assert!(events
        .history()
        .await
        .iter()
        .any(|e| matches!(e, Event::AnalysisFailed(_))));
}

#[tokio::test(start_paused = true)]
async fn slow_analysis_times_out() {
    let analyzer = Arc::new(ScriptedAnalyzer::fixed("Too late").with_latency(Duration::from_secs(30)));
    let frames = Latest::new();
    frames.publish(rgb_frame());
    let (sink, _events) = events::channel(16);
    let vision = Vision::new(analyzer, frames, &VisionConfig::default(), sink);

    let result = vision.analyze_current().await;

    assert!(matches!(result, Err(Error::Timeout)));
    assert!(vision.last_observation().is_none());
}

#[tokio::test]
async fn analysis_needs_a_frame() {
    let (sink, _events) = events::channel(16);
    let vision = Vision::new(
        Arc::new(ScriptedAnalyzer::new()),
        Latest::new(),
        &VisionConfig::default(),
        sink,
    );

    assert!(matches!(vision.analyze_current().await, Err(Error::NoFrameAvailable)));
}

#[tokio::test]
async fn scripted_descriptions_follow_the_prompt() {
    let analyzer = ScriptedAnalyzer::new();
    let frame = rgb_frame();

    let obstacles = analyzer.analyze(&frame, "Any obstacles ahead?").await.unwrap();
    assert!(obstacles.contains("obstacle"));

    let people = analyzer.analyze(&frame, "Is there a person?").await.unwrap();
    assert!(people.contains("people") || people.contains("human"));
}

#[test]
fn frames_are_encoded_as_jpeg() {
    let jpeg = encode_jpeg(&rgb_frame(), 85).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let passthrough = Frame::new(FrameFormat::Jpeg, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    assert_eq!(encode_jpeg(&passthrough, 85).unwrap(), passthrough.data);

    let h264 = Frame::new(FrameFormat::H264, vec![0, 0, 0, 1]);
    assert!(encode_jpeg(&h264, 85).is_err());

    let truncated = Frame::new(FrameFormat::Rgb24 { width: 4, height: 2 }, vec![0; 5]);
    assert!(encode_jpeg(&truncated, 85).is_err());
}
