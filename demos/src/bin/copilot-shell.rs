// Interactive shell driving a copilot session against the simulated drone.
//
// Every line is an instruction ("take off", "move forward 1m", "follow the person"), except:
//   !<command>       manual command or query ("!cw 45", "!battery?")
//   ?                analyze the current view
//   ? <prompt>       analyze the current view with a custom prompt
//   auto on|off      toggle periodic analysis
//   quit
//
// An optional TOML configuration file can be given as first argument.

use std::sync::Arc;

use futures::StreamExt;
use tello_copilot::config::CopilotConfig;
use tello_copilot::copilot::{Collaborators, Copilot};
use tello_copilot::subsystems::events::Event;
use tello_copilot::subsystems::video::UdpCaptureBackend;
use tello_copilot::subsystems::vision::ScriptedAnalyzer;
use tello_copilot::transport::SimulatedDrone;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => CopilotConfig::load(path)?,
        None => CopilotConfig::default(),
    };

    let drone = Arc::new(SimulatedDrone::new());
    let copilot = Arc::new(
        Copilot::connect(
            config,
            Collaborators {
                transport: drone.clone(),
                analyzer: Arc::new(ScriptedAnalyzer::new()),
                capture: Arc::new(UdpCaptureBackend::new()),
                fallback: Some(drone),
            },
        )
        .await?,
    );

    // Print status events, telemetry is too chatty for a terminal
    let mut events = copilot.events.stream().await;
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if !matches!(event, Event::Telemetry(_)) {
                println!("  | {}", event);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();

        match line {
            "" => continue,
            "quit" | "exit" => break,
            "auto on" => copilot.set_auto_analysis(true).await,
            "auto off" => copilot.set_auto_analysis(false).await,
            "?" => {
                if let Err(e) = copilot.analyze_current().await {
                    println!("{}", e);
                }
            }
            _ if line.starts_with('?') => {
                if let Err(e) = copilot.analyze_with_prompt(line[1..].trim()).await {
                    println!("{}", e);
                }
            }
            _ if line.starts_with('!') => match copilot.send_manual(&line[1..]).await {
                Ok(status) => println!("{}", status),
                Err(e) => println!("{}", e),
            },
            instruction => match copilot.instruct(instruction).await {
                Ok(report) => println!("{}", report),
                Err(e) => println!("{}", e),
            },
        }
    }

    copilot.instruct("land").await?;
    copilot.disconnect().await;

    Ok(())
}
