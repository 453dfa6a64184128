//! `sweep` command-line entry point.
//!
//! Usage:
//!   sweep run [--workers N] [--dry-run] [--fresh] [--report PATH]
//!   sweep plan [--json]
//!   sweep status

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sweep_core::SweepError;
use sweep_runner::config::DEFAULT_CONFIG_PATH;
use sweep_runner::{exit_status, plan, run_sweep, status, ObserverRegistry, RunOptions, SweepConfig};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", about = "Run an external program over a parameter sweep")]
struct Cli {
    /// Job-set declaration
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH, env = "SWEEP_CONFIG")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every job not already completed in the checkpoint
    Run {
        #[arg(long)]
        workers: Option<usize>,
        /// Sleep instead of invoking the executable
        #[arg(long)]
        dry_run: bool,
        /// Discard an existing checkpoint first
        #[arg(long)]
        fresh: bool,
        /// Write a run report (.csv for CSV, JSON otherwise)
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the expanded job set
    Plan {
        #[arg(long)]
        json: bool,
    },
    /// Show the resumable run, if any
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = execute(cli);
    if let Err(error) = &result {
        error!(%error, "sweep failed");
        eprintln!("Error: {error}");
    }
    ExitCode::from(exit_status(&result))
}

fn execute(cli: Cli) -> Result<(), SweepError> {
    let mut config = SweepConfig::load(&cli.config)?;

    match cli.command {
        Command::Run {
            workers,
            dry_run,
            fresh,
            report,
        } => {
            let options = RunOptions {
                workers,
                dry_run,
                fresh,
                report,
            };
            options.apply(&mut config);
            let outcome = run_sweep(&config, &options, &ObserverRegistry::builtin())?;

            let summary = &outcome.report.summary;
            println!(
                "total={} completed={} skipped={} canceled={} failed={} unfinished={} worker_failures={}",
                summary.total,
                summary.completed,
                summary.skipped,
                summary.canceled,
                summary.failed,
                summary.unfinished,
                summary.worker_failures.len()
            );
            if !summary.is_clean() {
                warn!("run finished with cancellations or failures");
            }
            Ok(())
        }
        Command::Plan { json } => {
            let jobs = plan(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                for job in &jobs {
                    let marker = if job.completed { "done" } else { "todo" };
                    let short = job.fingerprint.get(..12).unwrap_or(&job.fingerprint);
                    println!("{:>6} {marker} {short} {}", job.id, job.command_line);
                }
                println!("{} jobs", jobs.len());
            }
            Ok(())
        }
        Command::Status => {
            match status(&config)? {
                Some(checkpoint) => println!(
                    "run {} has {} completed jobs ({})",
                    checkpoint.run_id,
                    checkpoint.completed,
                    checkpoint.path.display()
                ),
                None => println!("no resumable run in {}", config.state_dir.display()),
            }
            Ok(())
        }
    }
}
