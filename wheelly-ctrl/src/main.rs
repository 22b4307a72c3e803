//! # wheelly-ctrl
//!
//! Control plane entry point. Loads the TOML configuration, builds the robot
//! (simulated or real — both behind the same contract), wires the world
//! modeller into the controller and runs until ctrl-c or `--duration`.
//! `--dump` taps the inference stream into a binary record file for replay.

mod clock;
mod config;
mod controller;
mod driver;
mod error;
mod wire;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};

use wheelly_sim::SimulatedRobot;
use wheelly_world::codec::RecordWriter;
use wheelly_world::robot::Robot;
use wheelly_world::{SupplyDecoder, WorldModelSpec, WorldModeller};

use config::{RobotMode, WheellyConfig};
use controller::{InferenceEvent, RobotController};
use driver::RealRobot;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "wheelly-ctrl", about = "Wheelly robot control plane")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "wheelly.toml")]
    config: String,
    /// Dump world-model records to this file
    #[arg(long)]
    dump: Option<PathBuf>,
    /// Override the simulator seed
    #[arg(long)]
    seed: Option<u64>,
    /// Stop after this many seconds (default: run until ctrl-c)
    #[arg(long)]
    duration: Option<u64>,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wheelly=info,wheelly_ctrl=info".into()),
        )
        .init();

    let args = Args::parse();

    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../wheelly.toml").to_string());
    let mut cfg: WheellyConfig =
        toml::from_str(&config_str).with_context(|| format!("invalid config {}", args.config))?;
    if let Some(seed) = args.seed {
        cfg.simulation.seed = seed;
    }

    info!(
        "🤖 Wheelly controller starting — {:?} robot, {}×{} radar grid",
        cfg.robot.mode, cfg.radar.radar_width, cfg.radar.radar_height
    );

    match cfg.robot.mode {
        RobotMode::Sim => {
            let robot = SimulatedRobot::new(cfg.robot_spec(), cfg.simulation.clone());
            run(robot, cfg, args).await
        }
        RobotMode::Real => {
            let robot = RealRobot::new(cfg.robot_spec(), cfg.driver_config());
            run(robot, cfg, args).await
        }
    }
}

async fn run<R: Robot + 'static>(robot: R, cfg: WheellyConfig, args: Args) -> anyhow::Result<()> {
    let modeller = WorldModeller::new(cfg.world_model_spec(), cfg.supply_decoder());
    let controller = RobotController::new(robot, cfg.controller_config(), modeller);

    controller.set_inference_callback(Box::new(|model| {
        let hindered = model
            .radar_map
            .cells()
            .iter()
            .filter(|c| c.is_hindered())
            .count();
        debug!(
            "inference: sim={} ms, {} hindered cells, {} markers",
            model.simulation_time(),
            hindered,
            model.markers.len()
        );
        Ok(None)
    }));

    let mut errors = controller.subscribe_errors();
    tokio::spawn(async move {
        while let Ok(e) = errors.recv().await {
            warn!("⚠ {e}");
        }
    });

    let mut status = controller.subscribe_status();
    tokio::spawn(async move {
        while let Ok(s) = status.recv().await {
            info!("controller → {s:?}");
        }
    });

    if let Some(path) = args.dump.clone() {
        let inference = controller.subscribe_inference();
        let spec = cfg.world_model_spec();
        let decoder = cfg.supply_decoder();
        tokio::spawn(async move {
            dump_records(path, inference, spec, decoder).await;
        });
    }

    let handle = controller.start();

    match args.duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    controller.shutdown().await;
    handle.await.ok();
    info!("bye");
    Ok(())
}

/// Drain the inference stream into a record file until the stream completes.
async fn dump_records(
    path: PathBuf,
    mut inference: tokio::sync::broadcast::Receiver<InferenceEvent>,
    spec: WorldModelSpec,
    decoder: SupplyDecoder,
) {
    let file = match std::fs::File::create(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!("dump: cannot create {path:?}: {e}");
            return;
        }
    };
    let mut writer = match RecordWriter::create(std::io::BufWriter::new(file), &spec, &decoder) {
        Ok(w) => w,
        Err(e) => {
            warn!("dump: cannot write header: {e}");
            return;
        }
    };
    info!("dump: recording world models to {path:?}");
    let mut count = 0u64;
    loop {
        match inference.recv().await {
            Ok((model, commands)) => {
                if let Err(e) = writer.write_record(&model, commands.as_ref()) {
                    warn!("dump: write failed: {e}");
                    break;
                }
                count += 1;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("dump: lost {n} records to backpressure");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    if let Err(e) = writer.flush() {
        warn!("dump: flush failed: {e}");
    }
    info!("dump: {count} records written");
}

#[cfg(test)]
mod tests {
    use super::*;
    use wheelly_world::codec::RecordReader;
    use wheelly_world::robot::RobotMessage;
    use wheelly_world::{Complex, ProxyMessage};

    #[tokio::test]
    async fn dump_writes_replayable_records() {
        let cfg: WheellyConfig = toml::from_str(include_str!("../wheelly.toml")).unwrap();
        let spec = cfg.world_model_spec();
        let decoder = cfg.supply_decoder();

        // Produce a couple of inference events by hand.
        let mut modeller = WorldModeller::new(spec.clone(), decoder);
        modeller.latch(&RobotMessage::Proxy(ProxyMessage {
            sim_time: 100,
            sensor_direction: Complex::zero(),
            echo_delay: 1700,
            x_pulses: 0.0,
            y_pulses: 0.0,
            direction: Complex::zero(),
        }));
        let model = modeller.infer();

        let (tx, rx) = tokio::sync::broadcast::channel(8);
        tx.send((model.clone(), None)).unwrap();
        tx.send((model, Some(wheelly_world::RobotCommands::halt())))
            .unwrap();
        drop(tx);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.wdump");
        dump_records(path.clone(), rx, spec, decoder).await;

        let file = std::fs::File::open(&path).unwrap();
        let mut reader = RecordReader::open(std::io::BufReader::new(file)).unwrap();
        let first = reader.read_record().unwrap().expect("first record");
        assert_eq!(first.0.status.simulation_time, 100);
        assert!(first.1.is_none());
        let second = reader.read_record().unwrap().expect("second record");
        assert_eq!(
            second.1,
            Some(wheelly_world::RobotCommands::halt())
        );
        assert!(reader.read_record().unwrap().is_none());
    }
}
