use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

const DEMO_CONFIG: &str = "crates/sweep_runner/sweep.example.toml";

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the sweep workspace",
    long_about = "A unified CLI for running the demo sweep, benchmarks,\n\
                  and CI checks in the sweep workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dry-run the example job set with two workers
    Demo {
        /// Write the run report here (.csv or .json)
        #[arg(long)]
        report: Option<String>,
    },
    /// Print the expanded example job set
    Plan,
    /// Run Criterion benchmarks
    Bench,
    /// Compare benchmarks: stash changes, create baseline, restore, compare
    BenchCompare,
    /// Run CI checks (fmt, clippy, tests, demo, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Plan and dry-run the example job set
    Demo,
    /// Run benchmarks
    Bench,
    /// Run check + demo + bench
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn git(args: &[&str]) -> ExitStatus {
    eprintln!("+ git {}", args.join(" "));
    Command::new("git")
        .args(args)
        .status()
        .expect("failed to execute git")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_git(args: &[&str]) {
    let status = git(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_sweep(args: &[&str]) {
    let mut cargo_args = vec!["run", "-p", "sweep_runner", "--bin", "sweep", "--", "--config", DEMO_CONFIG];
    cargo_args.extend_from_slice(args);
    run_cargo(&cargo_args);
}

fn bench(extra: &[&str]) {
    let mut cargo_args = vec!["bench", "--package", "sweep_core", "--bench", "expansion"];
    if !extra.is_empty() {
        cargo_args.push("--");
        cargo_args.extend_from_slice(extra);
    }
    run_cargo(&cargo_args);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test sweep_core");
    run_cargo(&["test", "-p", "sweep_core"]);

    step("Test sweep_runner");
    run_cargo(&["test", "-p", "sweep_runner"]);
}

fn ci_demo() {
    step("Plan the example job set");
    run_sweep(&["plan"]);

    step("Dry-run the example job set");
    run_sweep(&["run", "--dry-run", "--fresh"]);
}

fn ci_bench() {
    step("Run benchmarks");
    bench(&[]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo { report } => {
            let mut args = vec!["run", "--dry-run", "--fresh"];
            if let Some(path) = report.as_deref() {
                args.extend_from_slice(&["--report", path]);
            }
            run_sweep(&args);
        }
        Commands::Plan => {
            run_sweep(&["plan"]);
        }
        Commands::Bench => {
            bench(&[]);
        }
        Commands::BenchCompare => {
            let baseline_dir = Path::new("target/criterion");
            if baseline_dir.exists() {
                step("Removing existing benchmark data");
                std::fs::remove_dir_all(baseline_dir).expect("failed to remove target/criterion");
            }

            step("Stashing current changes");
            run_git(&[
                "stash",
                "push",
                "-m",
                "Temporary stash for benchmark comparison",
            ]);

            step("Running benchmark to create baseline");
            bench(&["--save-baseline", "main"]);

            step("Reapplying changes");
            run_git(&["stash", "pop"]);

            step("Running benchmark comparing against baseline");
            bench(&["--baseline", "main"]);

            eprintln!("\nDone! Check the output above to see performance comparison.");
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Demo => ci_demo(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_demo();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
