//! # Commander subsystem
//!
//! The commander sends synthesized plans to the [MotionTransport]. Execution is best effort: executable entries are
//! sent one at a time, in plan order, with a fixed settle delay between two sends. A command refused by the transport
//! is reported and the next one is sent anyway. Comments are published as status messages and never reach the
//! transport.
//!
//! Every command goes through the [SafetyBounds] before being sent, including manual ones. On top of the static
//! clamping, `up` moves are shortened so that the drone stays under the altitude ceiling, or skipped when there is no
//! room left for a minimal move.
//!
//! ```no_run
//! # use tello_copilot::{Command, Direction};
//! # async fn send(copilot: tello_copilot::Copilot) {
//! let report = copilot.commander.execute(Command::Move { direction: Direction::Up, cm: 1000 }).await;
//! println!("{} {}", report.command, report.outcome);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::lock::Mutex;
use log::{debug, info, warn};

use crate::command::{Command, Direction, ParsedCommand, TelemetryQuery};
use crate::config::SafetyBounds;
use crate::subsystems::events::{Event, EventSink};
use crate::subsystems::telemetry::TelemetryMonitor;
use crate::transport::MotionTransport;
use crate::Result;

/// Result of sending one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Executed,
    /// The transport refused the command
    Failed(String),
    /// The command was not sent
    Skipped(String),
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Executed => write!(f, "executed"),
            CommandOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            CommandOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

/// A command as actually sent, after clamping, and its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub command: Command,
    pub outcome: CommandOutcome,
}

/// # Plan execution report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub instruction: String,
    pub plan: Vec<ParsedCommand>,
    /// One entry per executable command of the plan, in plan order
    pub commands: Vec<CommandReport>,
}

impl ExecutionReport {
    pub(crate) fn empty(instruction: &str) -> Self {
        Self {
            instruction: instruction.to_owned(),
            plan: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// The instruction could not be interpreted
    pub fn no_commands(&self) -> bool {
        self.plan.is_empty()
    }

    /// Commands sent and acknowledged, in order
    pub fn executed(&self) -> Vec<Command> {
        self.commands
            .iter()
            .filter(|r| r.outcome == CommandOutcome::Executed)
            .map(|r| r.command)
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.commands
            .iter()
            .filter(|r| matches!(r.outcome, CommandOutcome::Failed(_)))
            .count()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.no_commands() {
            return write!(f, "No commands produced for {:?}", self.instruction);
        }

        write!(f, "{}", self.instruction)?;
        let mut commands = self.commands.iter();
        for entry in &self.plan {
            match entry {
                ParsedCommand::Comment(text) => write!(f, "\n  # {}", text)?,
                ParsedCommand::Exec(_) => match commands.next() {
                    Some(report) => write!(f, "\n  {} -> {}", report.command, report.outcome)?,
                    None => write!(f, "\n  {} -> not run", entry)?,
                },
            }
        }
        Ok(())
    }
}

/// # Access to the commander subsystem
///
/// See the [commander module documentation](crate::subsystems::commander) for more context and information.
pub struct Commander {
    transport: Arc<dyn MotionTransport>,
    bounds: SafetyBounds,
    settle_delay: Duration,
    telemetry: TelemetryMonitor,
    events: EventSink,
    serial: Mutex<()>,
}

impl Commander {
    pub fn new(
        transport: Arc<dyn MotionTransport>,
        bounds: SafetyBounds,
        settle_delay: Duration,
        telemetry: TelemetryMonitor,
        events: EventSink,
    ) -> Self {
        Self {
            transport,
            bounds,
            settle_delay,
            telemetry,
            events,
            serial: Mutex::new(()),
        }
    }

    /// Execute a plan, best effort
    pub async fn execute_plan(&self, instruction: &str, plan: &[ParsedCommand]) -> ExecutionReport {
        self.execute_plan_unless(instruction, plan, || false).await
    }

    /// Execute a plan, skipping the remaining commands as soon as `cancelled` returns true
    pub(crate) async fn execute_plan_unless(
        &self,
        instruction: &str,
        plan: &[ParsedCommand],
        cancelled: impl Fn() -> bool,
    ) -> ExecutionReport {
        let mut report = ExecutionReport {
            instruction: instruction.to_owned(),
            plan: plan.to_vec(),
            commands: Vec::new(),
        };
        let mut sent_any = false;

        for entry in plan {
            let command = match entry {
                ParsedCommand::Comment(text) => {
                    self.events.status(format!("# {}", text)).await;
                    continue;
                }
                ParsedCommand::Exec(command) => *command,
            };

            if sent_any && !cancelled() {
                tokio::time::sleep(self.settle_delay).await;
            }

            let outcome = if cancelled() {
                let reason = "plan cancelled".to_owned();
                self.publish_skipped(command, &reason).await;
                CommandReport {
                    command,
                    outcome: CommandOutcome::Skipped(reason),
                }
            } else {
                self.send(command).await
            };

            sent_any |= !matches!(outcome.outcome, CommandOutcome::Skipped(_));
            report.commands.push(outcome);
        }

        report
    }

    /// Send one command through the safety layer
    ///
    /// The report holds the command as sent, which may differ from `command` once clamped.
    pub async fn execute(&self, command: Command) -> CommandReport {
        self.send(command).await
    }

    async fn send(&self, command: Command) -> CommandReport {
        let command = self.bounds.clamp_command(command);

        let command = match self.apply_ceiling(command).await {
            Ok(command) => command,
            Err(reason) => {
                self.publish_skipped(command, &reason).await;
                return CommandReport {
                    command,
                    outcome: CommandOutcome::Skipped(reason),
                };
            }
        };

        let result = if command.is_emergency() {
            self.transport.execute(&command).await
        } else {
            let _serial = self.serial.lock().await;
            self.transport.execute(&command).await
        };

        let outcome = match result {
            Ok(()) => {
                info!("Executed {}", command);
                self.events.publish(Event::CommandExecuted(command)).await;
                CommandOutcome::Executed
            }
            Err(e) => {
                warn!("Command {} failed: {}", command, e);
                self.events
                    .publish(Event::CommandFailed {
                        command,
                        reason: e.to_string(),
                    })
                    .await;
                CommandOutcome::Failed(e.to_string())
            }
        };

        CommandReport { command, outcome }
    }

    async fn publish_skipped(&self, command: Command, reason: &str) {
        info!("Skipped {}: {}", command, reason);
        self.events
            .publish(Event::CommandSkipped {
                command,
                reason: reason.to_owned(),
            })
            .await;
    }

    async fn current_height(&self) -> Option<u32> {
        let height = match self.transport.query(TelemetryQuery::Height).await {
            Ok(height) => Some(height),
            Err(e) => {
                debug!("Height query failed ({}), using last telemetry", e);
                self.telemetry.latest().and_then(|t| t.height)
            }
        };
        height.map(|h| h.max(0) as u32)
    }

    /// Shorten `up` moves to the room left under the altitude ceiling
    async fn apply_ceiling(&self, command: Command) -> std::result::Result<Command, String> {
        let cm = match command {
            Command::Move {
                direction: Direction::Up,
                cm,
            } => cm,
            other => return Ok(other),
        };

        let height = match self.current_height().await {
            Some(height) => height,
            None => return Ok(command),
        };

        let room = self.bounds.max_altitude.saturating_sub(height);
        if room < self.bounds.min_distance {
            return Err(format!(
                "altitude ceiling of {}cm reached (height {}cm)",
                self.bounds.max_altitude, height
            ));
        }

        Ok(Command::Move {
            direction: Direction::Up,
            cm: cm.min(room),
        })
    }

    /// Query one telemetry value
    pub async fn query(&self, query: TelemetryQuery) -> Result<i32> {
        self.transport.query(query).await
    }

    /// Send remote-control stick values
    ///
    /// Values are clamped to [-100, 100]. Stick updates are sent at a high rate and are not published as events.
    pub async fn send_rc(&self, lr: i8, fb: i8, ud: i8, yaw: i8) -> Result<()> {
        let command = self.bounds.clamp_command(Command::Rc { lr, fb, ud, yaw });
        debug!("{}", command);
        self.transport.execute(&command).await
    }
}
