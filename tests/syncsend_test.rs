// Test that the Copilot object can be sent between threads

use std::sync::Arc;
use std::thread::spawn;

use async_trait::async_trait;
use tello_copilot::config::CopilotConfig;
use tello_copilot::copilot::{Collaborators, Copilot};
use tello_copilot::subsystems::video::{CaptureBackend, FrameSource, StreamEndpoint};
use tello_copilot::subsystems::vision::ScriptedAnalyzer;
use tello_copilot::transport::SimulatedDrone;
use tello_copilot::{Error, Result};

struct NoStream;

#[async_trait]
impl CaptureBackend for NoStream {
    async fn open(&self, endpoint: &StreamEndpoint) -> Result<Box<dyn FrameSource>> {
        Err(Error::CaptureError(endpoint.to_string()))
    }
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn copilot_is_send_and_sync() {
    assert_send_sync::<Copilot>();
}

#[tokio::test]
async fn copilot_can_be_sent_to_thread() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let drone = Arc::new(SimulatedDrone::new());
    let copilot = Copilot::connect(
        CopilotConfig::default(),
        Collaborators {
            transport: drone,
            analyzer: Arc::new(ScriptedAnalyzer::new()),
            capture: Arc::new(NoStream),
            fallback: None,
        },
    )
    .await?;

    let copilot = spawn(move || copilot).join().unwrap();
    copilot.disconnect().await;

    Ok(())
}
