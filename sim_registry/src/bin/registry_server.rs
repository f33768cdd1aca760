use std::io::{self, BufRead};
use std::thread;

use crossbeam_channel::{unbounded, Receiver};
use tracing::{info, warn};

use sim_registry::{
    build_headless_app, request_clock, run_ticks, seed_scenario, ClockRequest,
    RegistryInstrumentation, Scalar, ScenarioSettings, ScrubDirection, TickClock,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut app = build_headless_app();
    seed_scenario(&mut app, ScenarioSettings::default());
    let command_rx = spawn_stdin_listener();

    info!(
        target: "sim_registry::server",
        "registry server ready (tick N | rewind T | scrub fwd|back S | pause | resume | record | report | quit)"
    );

    while let Ok(command) = command_rx.recv() {
        match command {
            Command::Tick(count) => run_ticks(&mut app, count),
            Command::Clock(request) => {
                if let Some(superseded) = request_clock(&mut app, request) {
                    warn!(
                        target: "sim_registry::server",
                        ?superseded,
                        "clock.request.superseded"
                    );
                }
                // Apply the request without waiting for the next tick command.
                run_ticks(&mut app, 1);
            }
            Command::Report => report(&app),
            Command::Quit => break,
        }
        let clock = app.world.resource::<TickClock>();
        info!(
            target: "sim_registry::server",
            tick = clock.current_tick(),
            observed = clock.observed_tick(),
            mode = %clock.mode(),
            "command.applied"
        );
    }
}

#[derive(Debug)]
enum Command {
    Tick(u64),
    Clock(ClockRequest),
    Report,
    Quit,
}

fn spawn_stdin_listener() -> Receiver<Command> {
    let (sender, receiver) = unbounded::<Command>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("Command read error: {}", err);
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_command(trimmed) {
                Some(cmd) => {
                    if sender.send(cmd).is_err() {
                        break;
                    }
                }
                None => warn!("Invalid command: {}", trimmed),
            }
        }
    });
    receiver
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "tick" => {
            let amount = parts.next().unwrap_or("1").parse().ok()?;
            Some(Command::Tick(amount))
        }
        "rewind" => {
            let target: u64 = parts.next()?.parse().ok()?;
            Some(Command::Clock(ClockRequest::BeginPlayback(target)))
        }
        "scrub" => {
            let direction = match parts.next()? {
                "fwd" | "forward" => ScrubDirection::Forward,
                "back" | "backward" => ScrubDirection::Backward,
                other => {
                    warn!("Unsupported scrub direction: {}", other);
                    return None;
                }
            };
            let speed: f32 = parts.next().unwrap_or("1").parse().ok()?;
            Some(Command::Clock(ClockRequest::Scrub {
                direction,
                speed: Scalar::from_f32(speed),
            }))
        }
        "speed" => {
            let multiplier: f32 = parts.next()?.parse().ok()?;
            Some(Command::Clock(ClockRequest::SetSpeed(Scalar::from_f32(
                multiplier,
            ))))
        }
        "pause" => Some(Command::Clock(ClockRequest::Pause)),
        "resume" => Some(Command::Clock(ClockRequest::Resume)),
        "record" => Some(Command::Clock(ClockRequest::ResumeRecording)),
        "report" => Some(Command::Report),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

fn report(app: &bevy::prelude::App) {
    let instrumentation = app.world.resource::<RegistryInstrumentation>();
    match instrumentation.export_json() {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(
            target: "sim_registry::server",
            error = %err,
            "report.export_failed"
        ),
    }
}
