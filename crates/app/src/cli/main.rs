//! Jongleur CLI Application

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use jongleur_core::domain::{
    Device, DeviceRegistry, Element, EngineConfig, Pipeline, State,
};
use jongleur_infra::audio::{AudioOutput, CpalMonitor, DeviceWatcher};

#[derive(Parser)]
#[command(name = "jongleur")]
#[command(about = "A media-graph engine playground", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List discovered audio devices
    Devices {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Run a short tone pipeline with a mid-flight volume change
    Demo {
        /// How long to run, in milliseconds
        #[arg(long, default_value_t = 400)]
        duration_ms: u64,
    },
}

#[derive(Serialize)]
struct DeviceRow {
    description: String,
    bus_path: String,
    default: bool,
    mode: &'static str,
}

fn row(device: &Device, mode: &'static str) -> DeviceRow {
    DeviceRow {
        description: device.description().to_string(),
        bus_path: device.bus_path().unwrap_or_default().to_string(),
        default: device.is_default(),
        mode,
    }
}

fn list_devices(json: bool) -> anyhow::Result<()> {
    let registry = Arc::new(DeviceRegistry::new());
    let watcher = DeviceWatcher::start(CpalMonitor::default(), registry.clone())?;

    let mut rows: Vec<DeviceRow> = Vec::new();
    rows.extend(registry.audio_inputs().iter().map(|d| row(d, "input")));
    rows.extend(registry.audio_outputs().iter().map(|d| row(d, "output")));

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No audio devices found");
    } else {
        for r in &rows {
            println!(
                "{:6} {} {}{}",
                r.mode,
                r.bus_path,
                r.description,
                if r.default { " (default)" } else { "" }
            );
        }
    }

    drop(watcher);
    Ok(())
}

fn run_demo(duration_ms: u64) -> anyhow::Result<()> {
    let config = EngineConfig::load_default()?;

    let pipeline = Pipeline::new("demo");
    let tone = Element::from_factory("tone-source", "tone")
        .ok_or_else(|| anyhow::anyhow!("tone-source factory missing"))?;

    let mut output = AudioOutput::new("audioOutput")?;
    output.set_pipeline(&pipeline);
    output.set_volume(config.audio.volume);
    output.set_muted(config.audio.muted);
    output.on_volume_changed(|v| tracing::info!(volume = v as f64, "volume changed"));

    pipeline.add(&tone)?;
    pipeline.add(output.element())?;
    anyhow::ensure!(tone.link(output.element()), "could not link tone to output");

    anyhow::ensure!(
        pipeline.set_state_sync(State::Playing, config.state_change_timeout()),
        "pipeline did not reach Playing"
    );
    tracing::info!("pipeline playing");

    std::thread::sleep(Duration::from_millis(duration_ms / 2));
    output.set_volume(0.2);
    std::thread::sleep(Duration::from_millis(duration_ms / 2));

    anyhow::ensure!(
        pipeline.set_state_sync(State::Null, config.stop_timeout()),
        "pipeline did not stop"
    );

    println!(
        "demo finished, sink consumed {} buffers",
        output.sink().get_uint64("received")
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Command::Devices { json } => list_devices(json),
        Command::Demo { duration_ms } => run_demo(duration_ms),
    }
}
