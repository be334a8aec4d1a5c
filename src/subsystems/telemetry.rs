//! # Telemetry subsystem
//!
//! Device state is polled periodically through the [MotionTransport]. Each poll produces a complete [Telemetry]
//! snapshot, published in a [Latest] slot and as an event. A failing query leaves its field empty for that poll,
//! polling itself never stops before the session is disconnected.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::command::TelemetryQuery;
use crate::latest::Latest;
use crate::subsystems::events::{Event, EventSink};
use crate::subsystems::pause;
use crate::transport::MotionTransport;

/// Telemetry snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Battery level (%)
    pub battery: Option<i32>,
    /// Height (cm)
    pub height: Option<i32>,
    /// Motor-on time (s)
    pub flight_time: Option<i32>,
    /// Temperature (°C)
    pub temperature: Option<i32>,
    pub polled_at: DateTime<Local>,
}

fn field(f: &mut fmt::Formatter<'_>, query: TelemetryQuery, value: Option<i32>) -> fmt::Result {
    match value {
        Some(value) => write!(f, "{}: {}{}", query.label(), value, query.unit()),
        None => write!(f, "{}: --", query.label()),
    }
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        field(f, TelemetryQuery::Battery, self.battery)?;
        write!(f, " | ")?;
        field(f, TelemetryQuery::Height, self.height)?;
        write!(f, " | ")?;
        field(f, TelemetryQuery::FlightTime, self.flight_time)?;
        write!(f, " | ")?;
        field(f, TelemetryQuery::Temperature, self.temperature)
    }
}

async fn poll(transport: &dyn MotionTransport, query: TelemetryQuery) -> Option<i32> {
    match transport.query(query).await {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("{} query failed: {}", query.label(), e);
            None
        }
    }
}

/// Query every telemetry value once
pub async fn poll_once(transport: &dyn MotionTransport) -> Telemetry {
    Telemetry {
        battery: poll(transport, TelemetryQuery::Battery).await,
        height: poll(transport, TelemetryQuery::Height).await,
        flight_time: poll(transport, TelemetryQuery::FlightTime).await,
        temperature: poll(transport, TelemetryQuery::Temperature).await,
        polled_at: Local::now(),
    }
}

/// # Access to the telemetry subsystem
#[derive(Debug, Clone, Default)]
pub struct TelemetryMonitor {
    latest: Latest<Telemetry>,
}

impl TelemetryMonitor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Last polled snapshot, `None` before the first poll
    pub fn latest(&self) -> Option<Arc<Telemetry>> {
        self.latest.get()
    }

    pub(crate) fn spawn_poller(
        &self,
        transport: Arc<dyn MotionTransport>,
        events: EventSink,
        interval: Duration,
        disconnect: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let latest = self.latest.clone();

        tokio::spawn(async move {
            let mut failing = false;

            while !disconnect.load(Relaxed) {
                let telemetry = poll_once(transport.as_ref()).await;

                let all_failed = telemetry.battery.is_none()
                    && telemetry.height.is_none()
                    && telemetry.flight_time.is_none()
                    && telemetry.temperature.is_none();
                if all_failed && !failing {
                    warn!("Telemetry unavailable, will keep polling");
                }
                failing = all_failed;

                let telemetry = Arc::new(telemetry);
                latest.publish_arc(telemetry.clone());
                events.publish(Event::Telemetry(telemetry)).await;

                pause(&disconnect, interval).await;
            }
        })
    }
}
