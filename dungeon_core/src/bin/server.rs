use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{info, warn};

use dungeon_core::{
    apply_command, build_headless_app, run_tick, GameRulesHandle, SimulationConfig,
    SimulationMetrics,
};
use dungeon_runtime::{parse_command_line, CommandPayload};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut app = build_headless_app();
    let tick_seconds = app.world.resource::<GameRulesHandle>().rules().tick_seconds;
    let tick_interval = Duration::from_secs_f32(tick_seconds.max(0.001));
    let config = app.world.resource::<SimulationConfig>().clone();

    let command_rx = spawn_command_listener();

    info!(
        target: "dungeon::server",
        width = config.grid_size.x,
        height = config.grid_size.y,
        players = config.starts.len(),
        tick_ms = tick_interval.as_millis() as u64,
        "Dungeon headless server ready"
    );

    loop {
        match command_rx.recv_timeout(tick_interval) {
            Ok(payload) => {
                let verb = payload.verb();
                match apply_command(&mut app, payload) {
                    Ok(outcome) => {
                        let rendered = serde_json::to_string(&outcome)
                            .unwrap_or_else(|err| format!("<unserializable outcome: {err}>"));
                        info!(
                            target: "dungeon::server",
                            command = verb,
                            outcome = %rendered,
                            "command.applied"
                        );
                        println!("{rendered}");
                    }
                    Err(err) => {
                        warn!(
                            target: "dungeon::server",
                            command = verb,
                            error = %err,
                            "command.failed"
                        );
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                run_tick(&mut app);
                log_metrics(&app);
            }
            Err(RecvTimeoutError::Disconnected) => {
                info!(target: "dungeon::server", "command stream closed; shutting down");
                break;
            }
        }
    }
}

fn spawn_command_listener() -> Receiver<CommandPayload> {
    let (sender, receiver) = unbounded::<CommandPayload>();
    thread::spawn(move || read_commands(io::stdin().lock(), sender));
    receiver
}

fn read_commands(reader: impl BufRead, sender: Sender<CommandPayload>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(target: "dungeon::server", error = %err, "Command read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_command_line(&line) {
            Ok(payload) => {
                if sender.send(payload).is_err() {
                    break;
                }
            }
            Err(err) => warn!(
                target: "dungeon::server",
                input = line.trim(),
                error = %err,
                "command.invalid"
            ),
        }
    }
}

fn log_metrics(app: &bevy::prelude::App) {
    let metrics = app.world.resource::<SimulationMetrics>();
    if metrics.tick % 50 != 0 {
        return;
    }
    for (player, stats) in &metrics.players {
        tracing::debug!(
            target: "dungeon::server",
            tick = metrics.tick,
            player,
            gold = stats.gold,
            capacity = stats.capacity,
            rooms = stats.rooms,
            "metrics.player"
        );
    }
    tracing::debug!(
        target: "dungeon::server",
        tick = metrics.tick,
        room_instances = metrics.room_instances,
        loose_gold = metrics.loose_gold,
        "metrics.world"
    );
}
