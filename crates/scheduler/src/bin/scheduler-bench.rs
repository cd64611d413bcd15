//! scheduler-bench -- drives the scheduler with synthetic codec sessions.
//!
//! Each session submits, per frame, a decode → vpp → encode chain linked by
//! dependency tokens. Encode tasks are exclusive per session, so frames of one
//! session are encoded in order while sessions run side by side.
//!
//! Prints the scheduler metrics as JSON when done.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use rayon::prelude::*;
use tracing::{info, warn};

use codecflow_core::config::load_dotenv;
use codecflow_scheduler::{
    DependencyToken, OwnerId, Priority, Scheduler, SchedulerConfig, TaskDescription, TaskOutcome,
    TaskReturn, ThreadingMode,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Synthetic load generator for the codec task scheduler.
#[derive(Parser, Debug)]
#[command(name = "scheduler-bench", version, about)]
struct Cli {
    /// Path to a scheduler TOML config. Falls back to the environment.
    #[arg(long, env = "CODECFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Number of concurrent sessions.
    #[arg(long, default_value_t = 4)]
    sessions: u64,

    /// Frames per session.
    #[arg(long, default_value_t = 100)]
    frames: u64,

    /// Simulated work per task call in microseconds.
    #[arg(long, default_value_t = 200)]
    work_us: u64,

    /// Override the worker thread count.
    #[arg(long)]
    workers: Option<usize>,

    /// Run tasks on the submitting threads instead of a pool.
    #[arg(long)]
    single_threaded: bool,

    /// Pretty-print the metrics JSON.
    #[arg(long)]
    pretty: bool,
}

// ── Session ─────────────────────────────────────────────────────────

/// Tokens for one frame's surfaces. Distinct per session and frame.
fn surface(session: u64, frame: u64, stage: u64) -> DependencyToken {
    DependencyToken((session << 40) | (frame << 8) | stage)
}

fn stage(name: &str, work: Duration, calls: Arc<AtomicU64>) -> TaskDescription {
    TaskDescription::from_fn(name, move |_| {
        calls.fetch_add(1, Ordering::Relaxed);
        std::thread::sleep(work);
        TaskReturn::Done
    })
}

/// Submit every frame of one session and wait for all of it.
fn run_session(scheduler: &Scheduler, session: u64, frames: u64, work: Duration, calls: &Arc<AtomicU64>) -> anyhow::Result<u64> {
    let owner = OwnerId(session + 1);
    let mut failed = 0;
    let mut last_encode = None;

    for frame in 0..frames {
        let bitstream = surface(session, frame, 0);
        let decoded = surface(session, frame, 1);
        let processed = surface(session, frame, 2);

        scheduler.submit(
            stage("decode", work, Arc::clone(calls))
                .input(bitstream)
                .output(decoded)
                .owner(owner)
                .priority(Priority::High)
                .dedicated(),
        )?;
        scheduler.submit(
            stage("vpp", work, Arc::clone(calls))
                .input(decoded)
                .output(processed)
                .owner(owner),
        )?;
        last_encode = Some(
            scheduler.submit(
                stage("encode", work, Arc::clone(calls))
                    .input(processed)
                    .owner(owner)
                    .priority(Priority::Low)
                    .exclusive(),
            )?,
        );
    }

    scheduler.wait_for_all(owner)?;
    if let Some(handle) = last_encode {
        if let TaskOutcome::Failed(code) = scheduler.synchronize(handle, Some(Duration::ZERO))? {
            warn!(session, code, "last encode failed");
            failed += 1;
        }
    }
    Ok(failed)
}

// ── Main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SchedulerConfig::from_env().context("reading config from environment")?,
    };
    if let Some(workers) = cli.workers {
        config.worker_threads = workers;
    }
    if cli.single_threaded {
        config.mode = ThreadingMode::SingleThreaded;
    }

    let scheduler = Scheduler::with_config(config).context("starting scheduler")?;
    let work = Duration::from_micros(cli.work_us);
    let calls = Arc::new(AtomicU64::new(0));

    info!(
        sessions = cli.sessions,
        frames = cli.frames,
        work_us = cli.work_us,
        "starting bench"
    );
    let started = Instant::now();
    let failed: u64 = (0..cli.sessions)
        .into_par_iter()
        .map(|session| run_session(&scheduler, session, cli.frames, work, &calls))
        .collect::<anyhow::Result<Vec<u64>>>()?
        .into_iter()
        .sum();
    let elapsed = started.elapsed();

    let tasks = cli.sessions * cli.frames * 3;
    info!(
        tasks,
        calls = calls.load(Ordering::Relaxed),
        failed,
        elapsed_ms = elapsed.as_millis() as u64,
        "bench finished"
    );

    let metrics = scheduler.metrics()?;
    let json = if cli.pretty {
        serde_json::to_string_pretty(&metrics)?
    } else {
        serde_json::to_string(&metrics)?
    };
    println!("{json}");
    Ok(())
}
