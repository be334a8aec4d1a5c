//! # Event subsystem
//!
//! Everything a presentation layer needs to show is published as an [Event]: status messages, synthesized plans,
//! command outcomes, vision observations, telemetry and video state changes. Background tasks never touch the
//! consumer state directly.
//!
//! Events can be read as a stream, either starting with the recent history or only with new events.
//!
//! ```no_run
//! # use futures::StreamExt;
//! # async fn test(copilot: tello_copilot::Copilot) {
//! let mut events = copilot.events.stream().await;
//! while let Some(event) = events.next().await {
//!     println!("{}", event);
//! }
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_broadcast::{broadcast, InactiveReceiver, Sender};
use futures::lock::Mutex;
use futures::{Stream, StreamExt};

use crate::command::{Command, ParsedCommand};
use crate::subsystems::telemetry::Telemetry;
use crate::subsystems::video::AcquisitionState;
use crate::subsystems::vision::VisionObservation;

const CHANNEL_CAPACITY: usize = 256;

/// Session event
#[derive(Debug, Clone)]
pub enum Event {
    /// Human readable status message
    Status(String),
    /// Plan synthesized for an instruction
    Plan {
        instruction: String,
        plan: Vec<ParsedCommand>,
    },
    CommandExecuted(Command),
    CommandFailed {
        command: Command,
        reason: String,
    },
    CommandSkipped {
        command: Command,
        reason: String,
    },
    Observation(Arc<VisionObservation>),
    AnalysisFailed(String),
    Telemetry(Arc<Telemetry>),
    Video(AcquisitionState),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Status(message) => write!(f, "{}", message),
            Event::Plan { instruction, plan } if plan.is_empty() => {
                write!(f, "No commands produced for {:?}", instruction)
            }
            Event::Plan { instruction, plan } => {
                let plan: Vec<String> = plan.iter().map(|c| c.to_string()).collect();
                write!(f, "Interpreted {:?}: {}", instruction, plan.join(", "))
            }
            Event::CommandExecuted(command) => write!(f, "Executed: {}", command),
            Event::CommandFailed { command, reason } => write!(f, "Failed: {} ({})", command, reason),
            Event::CommandSkipped { command, reason } => write!(f, "Skipped: {} ({})", command, reason),
            Event::Observation(observation) => write!(f, "AI: {}", observation.description),
            Event::AnalysisFailed(reason) => write!(f, "Analysis failed: {}", reason),
            Event::Telemetry(telemetry) => write!(f, "{}", telemetry),
            Event::Video(state) => write!(f, "{}", state),
        }
    }
}

/// Create a connected publisher and reader pair
///
/// `history_size` events are kept for the [Events::stream()] replay.
pub fn channel(history_size: usize) -> (EventSink, Events) {
    let (mut sender, receiver) = broadcast(CHANNEL_CAPACITY);
    // Slow readers lose the oldest events instead of blocking the publishers
    sender.set_overflow(true);

    let history = Arc::new(Mutex::new(VecDeque::with_capacity(history_size)));

    let sink = EventSink {
        sender,
        history: history.clone(),
        history_size,
    };
    let events = Events {
        receiver: receiver.deactivate(),
        history,
    };

    (sink, events)
}

/// Publishing side of the event channel
#[derive(Clone)]
pub struct EventSink {
    sender: Sender<Event>,
    history: Arc<Mutex<VecDeque<Event>>>,
    history_size: usize,
}

impl EventSink {
    /// Publish an event, never blocks
    pub async fn publish(&self, event: Event) {
        let mut history = self.history.lock().await;

        if self.history_size > 0 {
            if history.len() == self.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // Fails only when nobody listens
        let _ = self.sender.try_broadcast(event);
    }

    pub async fn status(&self, message: impl Into<String>) {
        self.publish(Event::Status(message.into())).await;
    }
}

/// # Access to the session events
///
/// See the [events module documentation](crate::subsystems::events) for more context and information.
pub struct Events {
    receiver: InactiveReceiver<Event>,
    history: Arc<Mutex<VecDeque<Event>>>,
}

impl Events {
    /// Stream of events starting with the recent history
    pub async fn stream(&self) -> impl Stream<Item = Event> {
        let history = self.history.lock().await;
        let history_events: Vec<Event> = history.iter().cloned().collect();
        // Activated while holding the history lock, no event can fall between the two
        let receiver = self.receiver.activate_cloned();
        drop(history);

        futures::stream::iter(history_events).chain(receiver)
    }

    /// Stream of the events published from now on
    pub async fn stream_no_history(&self) -> impl Stream<Item = Event> {
        self.receiver.activate_cloned()
    }

    /// Recent history, oldest first
    pub async fn history(&self) -> Vec<Event> {
        self.history.lock().await.iter().cloned().collect()
    }
}
