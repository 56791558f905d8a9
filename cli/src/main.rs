//! Alembic CLI - Campaign driver for the dual-representation ledger harness
//!
//! This CLI runs fuzz campaigns against the built-in reference ledger,
//! crosses the planted-defect ledgers with every validation policy, and
//! exports machine-readable campaign reports.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod campaign;
mod config;
mod matrix;
mod report;

#[derive(Parser)]
#[command(name = "alembic")]
#[command(about = "Model-based fuzz harness for dual-representation token ledgers", long_about = None)]
#[command(version)]
struct Cli {
    /// Campaign settings file (TOML); command-line flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fuzz campaigns against the reference in-memory ledger
    Run {
        /// Validation policy (loose, strict, discriminate, all)
        #[arg(short, long)]
        policy: Option<String>,

        /// Independent runs per campaign
        #[arg(short, long)]
        runs: Option<u32>,

        /// Operations per run
        #[arg(short, long)]
        depth: Option<u32>,

        /// Base seed; run i draws from seed + i
        #[arg(short, long)]
        seed: Option<u64>,

        /// Sweep invariants every N steps (0 = at run end only)
        #[arg(long)]
        check_every: Option<u32>,

        /// End a run at the first call the ledger refuses
        #[arg(long)]
        abort_on_failure: bool,

        /// Model overflow handling (saturating, panicking)
        #[arg(long)]
        arithmetic: Option<String>,

        /// Write campaign reports to a JSON file
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Cross every planted-defect ledger with the validation policies
    Faults {
        /// Policies to include (loose, strict, discriminate, all)
        #[arg(short, long, default_value = "all")]
        policy: String,

        /// Independent runs per cell
        #[arg(short, long)]
        runs: Option<u32>,

        /// Operations per run
        #[arg(short, long)]
        depth: Option<u32>,

        /// Base seed; run i draws from seed + i
        #[arg(short, long)]
        seed: Option<u64>,

        /// Sweep invariants every N steps (0 = at run end only)
        #[arg(long)]
        check_every: Option<u32>,
    },

    /// Describe the validation policies and what each one can detect
    Policies,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            policy,
            runs,
            depth,
            seed,
            check_every,
            abort_on_failure,
            arithmetic,
            json,
        } => {
            let (policies, settings) = config::resolve(
                cli.config.as_deref(),
                policy.as_deref(),
                runs,
                depth,
                seed,
                check_every,
                abort_on_failure,
                arithmetic.as_deref(),
            )?;
            campaign::run_campaigns(&policies, &settings, json.as_deref(), cli.verbose)?;
        }
        Commands::Faults {
            policy,
            runs,
            depth,
            seed,
            check_every,
        } => {
            let (policies, settings) = config::resolve(
                cli.config.as_deref(),
                Some(&policy),
                runs,
                depth,
                seed,
                check_every,
                false,
                None,
            )?;
            matrix::run_matrix(&policies, &settings, cli.verbose)?;
        }
        Commands::Policies => {
            campaign::describe_policies();
        }
    }

    Ok(())
}
