//! `rust_faims` command line.
//!
//! - `simulate` runs an acquisition against the simulated instrument and
//!   oracle and prints the final counters as JSON.
//! - `check-config` loads and validates a method file, optionally printing the
//!   effective method with environment overrides applied.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use rust_faims::factory::{ScanFactory, TemplateScanFactory};
use rust_faims::sim::{SimulatedInstrument, SimulatedOracle};
use rust_faims::{
    logging, IngressPipeline, MethodConfig, PipelineStats, ScanScheduler, SchedulerStats,
    SpectrumProcessor,
};

#[derive(Parser, Debug)]
#[command(name = "rust_faims")]
#[command(about = "FAIMS CV scan scheduler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a simulated acquisition
    Simulate {
        /// Method file
        #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "config/method.toml")]
        config: PathBuf,

        /// Number of host polls to run
        #[arg(short = 'n', long = "polls", default_value_t = 1_000)]
        polls: u64,

        /// Seed for the simulated instrument
        #[arg(short = 's', long = "seed", default_value_t = 42)]
        seed: u64,

        /// Delay between polls in milliseconds (0 = as fast as possible)
        #[arg(long = "poll-interval-ms", default_value_t = 0)]
        poll_interval_ms: u64,
    },
    /// Load and validate a method file
    CheckConfig {
        /// Method file
        #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "config/method.toml")]
        config: PathBuf,

        /// Print the effective method as TOML
        #[arg(long = "print")]
        print: bool,
    },
}

#[derive(Serialize)]
struct RunReport {
    run_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    finished_at: chrono::DateTime<Utc>,
    polls: u64,
    pipeline: PipelineStats,
    scheduler: SchedulerStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Simulate {
            config,
            polls,
            seed,
            poll_interval_ms,
        } => simulate(config, polls, seed, poll_interval_ms).await,
        Command::CheckConfig { config, print } => check_config(config, print),
    }
}

fn load(path: &Path) -> Result<MethodConfig> {
    MethodConfig::load_from(path)
        .with_context(|| format!("Failed to load method from {}", path.display()))
}

fn check_config(path: PathBuf, print: bool) -> Result<()> {
    let method = load(&path)?;
    if print {
        println!("{}", method.to_toml_string()?);
    }
    println!(
        "{}: OK ({} CVs, budget {}, top-N {}, cycling {})",
        path.display(),
        method.acquisition.cv_values.len(),
        method.acquisition.cycle_budget,
        method.acquisition.top_n,
        if method.acquisition.cycling_enabled { "on" } else { "off" }
    );
    Ok(())
}

async fn simulate(path: PathBuf, polls: u64, seed: u64, poll_interval_ms: u64) -> Result<()> {
    let method = load(&path)?;
    logging::init_from_config(&method.application);

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(%run_id, config = %path.display(), polls, seed, "Starting simulated acquisition");

    let factory: Arc<dyn ScanFactory> = Arc::new(TemplateScanFactory::new(method.scans.clone()));
    let oracle = Arc::new(SimulatedOracle::default());
    let scheduler = Arc::new(ScanScheduler::new(&method.acquisition, Arc::clone(&factory)));
    let processor = Arc::new(SpectrumProcessor::from_config(
        &method.acquisition,
        oracle,
        factory,
    ));
    let pipeline = IngressPipeline::spawn(processor, Arc::clone(&scheduler), &method.pipeline);

    let mut instrument = method
        .acquisition
        .cv_values
        .iter()
        .enumerate()
        .fold(SimulatedInstrument::new(seed), |instrument, (i, &cv)| {
            instrument.with_density(cv, 15 + 10 * i)
        });

    let mut ticker = tokio::time::interval(Duration::from_millis(poll_interval_ms.max(1)));
    for _ in 0..polls {
        if poll_interval_ms > 0 {
            ticker.tick().await;
        }
        let request = scheduler.dequeue();
        let spectrum = instrument.acquire(&request);
        if let Err(e) = pipeline.submit(spectrum).await {
            warn!(error = %e, "Pipeline refused spectrum, stopping");
            break;
        }
    }

    let pipeline_stats = pipeline.shutdown().await?;
    let report = RunReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        polls: instrument.scans_acquired(),
        pipeline: pipeline_stats,
        scheduler: scheduler.stats(),
    };
    info!(%run_id, polls = report.polls, "Simulated acquisition finished");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
