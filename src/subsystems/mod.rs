//! # Copilot subsystems
//!
//! A session is organized in logical subsystems, each with one role. They are independent from each other and only
//! share snapshot slots ([Latest](crate::latest::Latest)) and the event channel:
//!  - [commander] sends plans and manual commands to the drone,
//!  - [events] carries status messages and results to the presentation layer,
//!  - [telemetry] polls the device state,
//!  - [video] acquires frames from the drone camera,
//!  - [vision] describes the current frame.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

pub mod commander;
pub mod events;
pub mod telemetry;
pub mod video;
pub mod vision;

const DISCONNECT_POLL: Duration = Duration::from_millis(100);

/// Sleep for `duration`, returning early once `disconnect` is set
pub(crate) async fn pause(disconnect: &AtomicBool, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;

    while !disconnect.load(Relaxed) {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep((deadline - now).min(DISCONNECT_POLL)).await;
    }
}
