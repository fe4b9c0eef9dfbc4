use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use angelic_detector::analysis::{annotate, closest_reference, is_angelic, summarize_detections};
use angelic_detector::config::{AppConfig, Sensitivity};
use angelic_detector::engine::DetectorEngine;
use angelic_detector::random::FallbackGenerator;
use angelic_detector::recording::RecordingOutcome;
use angelic_detector::session::{DetectedFrequencyEvent, SessionUpdate};
use angelic_detector::telemetry;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "angelic_cli",
    about = "Diagnostic harness for the angelic frequency detector"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one multi-iteration batch and print its JSON summary
    Batch(BatchArgs),
    /// Run the continuous detector and print detected events as JSON lines
    Listen(ListenArgs),
    /// Classify a single frequency against the reference table
    Classify { frequency_hz: u32 },
    /// Render a saved detection history (JSON array of events)
    Summary { file: PathBuf },
}

#[derive(Args, Debug, Clone)]
struct DetectorArgs {
    /// Configuration file (defaults to assets/detector_config.json)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    min: Option<u32>,
    #[arg(long)]
    max: Option<u32>,
    #[arg(long)]
    sensitivity: Option<Sensitivity>,
    /// Use the synthetic source instead of the microphone
    #[arg(long)]
    simulate: bool,
    /// Seed for fallback and simulated values
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct BatchArgs {
    #[command(flatten)]
    detector: DetectorArgs,
    /// Print the telemetry snapshot to stderr after the run
    #[arg(long)]
    telemetry: bool,
}

#[derive(Args, Debug, Clone)]
struct ListenArgs {
    #[command(flatten)]
    detector: DetectorArgs,
    #[arg(long, default_value_t = 10)]
    seconds: u64,
}

impl DetectorArgs {
    fn app_config(&self) -> AppConfig {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from_file(path),
            None => AppConfig::load(),
        };
        if let Some(min) = self.min {
            config.detector.min_frequency_hz = min;
        }
        if let Some(max) = self.max {
            config.detector.max_frequency_hz = max;
        }
        if let Some(sensitivity) = self.sensitivity {
            config.detector.sensitivity = sensitivity;
        }
        config
    }

    async fn engine(&self) -> Result<DetectorEngine> {
        let config = self.app_config();
        config
            .detector
            .validate()
            .context("invalid detector configuration")?;
        let rng = match self.seed {
            Some(seed) => FallbackGenerator::seeded(seed),
            None => FallbackGenerator::from_entropy(),
        };
        let engine = DetectorEngine::with_defaults(config, rng);
        engine.set_simulation_mode(self.simulate).await?;
        Ok(engine)
    }
}

#[derive(Serialize)]
struct Classification {
    frequency_hz: u32,
    is_angelic: bool,
    closest: Option<angelic_detector::AngelicReference>,
    annotation: angelic_detector::analysis::ReferenceAnnotation,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Batch(args) => block_on(run_batch(args)),
        Commands::Listen(args) => block_on(run_listen(args)),
        Commands::Classify { frequency_hz } => run_classify(frequency_hz),
        Commands::Summary { file } => run_summary(file),
    }
}

fn block_on<F: std::future::Future<Output = Result<ExitCode>>>(future: F) -> Result<ExitCode> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(future)
}

async fn run_batch(args: BatchArgs) -> Result<ExitCode> {
    let engine = args.detector.engine().await?;
    let run = engine.run_batch();
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, cancelling batch");
            engine.cancel_batch();
            run.await
        }
    }
    .context("running batch")?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    eprintln!("{}", engine.reading().status);
    if args.telemetry {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&telemetry::hub().snapshot())?
        );
    }

    Ok(match outcome {
        RecordingOutcome::Completed(_) => ExitCode::from(0),
        RecordingOutcome::SetupFailed { .. } => ExitCode::from(1),
        RecordingOutcome::TimedOut { .. } | RecordingOutcome::Cancelled { .. } => {
            ExitCode::from(2)
        }
    })
}

async fn run_listen(args: ListenArgs) -> Result<ExitCode> {
    let engine = args.detector.engine().await?;
    let mut updates = engine.subscribe_session();
    engine
        .start_continuous()
        .await
        .context("starting continuous detection")?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(SessionUpdate::Detected(event)) => {
                    println!("{}", serde_json::to_string(&event)?);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("dropped {} session updates", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let report = engine
        .stop_continuous()
        .await
        .context("stopping continuous detection")?;
    // Runs still open at the deadline are flushed by the stop
    loop {
        match updates.try_recv() {
            Ok(SessionUpdate::Detected(event)) => {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    eprintln!(
        "{} frames, {} read failures, {} recoveries",
        report.frames, report.read_failures, report.recoveries
    );
    eprintln!("{}", summarize_detections(&engine.history()));
    Ok(ExitCode::from(0))
}

fn run_classify(frequency_hz: u32) -> Result<ExitCode> {
    let classification = Classification {
        frequency_hz,
        is_angelic: is_angelic(frequency_hz),
        closest: closest_reference(frequency_hz).copied(),
        annotation: annotate(frequency_hz),
    };
    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(ExitCode::from(0))
}

fn run_summary(file: PathBuf) -> Result<ExitCode> {
    let contents =
        fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let events: Vec<DetectedFrequencyEvent> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing detection history {}", file.display()))?;
    println!("{}", summarize_detections(&events));
    Ok(ExitCode::from(0))
}
