//! Demo binary: runs the acquisition pipeline against the synthetic block
//! source and records to disk per the loaded configuration.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ephys_daq::acquisition::{AcquisitionController, TriggerState};
use ephys_daq::config::DaqConfig;
use ephys_daq::core::{AcquisitionSink, DisplayFrame, SAMPLES_PER_BLOCK};
use ephys_daq::source::SyntheticSource;

#[derive(Parser, Debug)]
#[command(name = "ephys-daq", about = "Bioelectric signal acquisition demo")]
struct Args {
    /// Configuration file path.
    #[arg(short, long, default_value = "ephys-daq.toml")]
    config: PathBuf,

    /// Seconds of synthetic data to acquire.
    #[arg(short, long, default_value_t = 10.0)]
    duration: f64,

    /// Synthetic sample rate in Hz.
    #[arg(short, long, default_value_t = 20000.0)]
    sample_rate: f64,
}

/// Sink that forwards pipeline events to the log.
struct LogSink {
    bytes_saved: u64,
}

impl AcquisitionSink for LogSink {
    fn push_display_frame(&mut self, _frame: DisplayFrame<'_>) {}

    fn push_saved_byte_count(&mut self, bytes: u64) {
        self.bytes_saved += bytes;
    }

    fn raise_status(&mut self, message: &str) {
        info!("{message}");
    }

    fn raise_fatal_error(&mut self, message: &str) {
        error!("{message}");
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = DaqConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate().context("invalid configuration")?;

    let source = SyntheticSource::new(args.sample_rate, config.acquisition.num_streams);
    let sink = LogSink { bytes_saved: 0 };
    let mut controller =
        AcquisitionController::new(source, sink, config).context("building controller")?;

    controller.start().context("starting acquisition")?;
    info!(
        duration = args.duration,
        sample_rate = args.sample_rate,
        "acquisition started"
    );

    let target_samples = (args.duration * args.sample_rate) as u64;
    let mut cycles = 0u64;
    let batch_samples = (controller.blocks_per_batch() * SAMPLES_PER_BLOCK) as u64;
    while controller.state() != TriggerState::Idle && cycles * batch_samples < target_samples {
        controller.poll_cycle()?;
        cycles += 1;
    }
    controller.stop()?;

    info!(
        cycles,
        samples_saved = controller.total_samples_saved(),
        sessions = controller.sessions_opened(),
        "acquisition finished"
    );
    Ok(())
}
