//! Command-line surface (grounded in the teacher's `cli::Cli`/`Command`
//! derive-based layout).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "raymond",
    about = "Chains coding-agent CLI invocations into multi-step, crash-safe workflows",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress streamed progress output; keep only state headers,
    /// transitions, errors, and final cost.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new workflow from the entry state in `scope_dir`.
    Run {
        /// Directory containing the workflow's state files.
        #[arg(value_name = "SCOPE_DIR")]
        scope_dir: PathBuf,

        /// Starting state filename, relative to `scope_dir`. Overrides
        /// `.raymond/config.toml`'s `entry_state`.
        #[arg(long)]
        entry_state: Option<String>,

        /// Total USD budget for the run. Overrides config.
        #[arg(long)]
        budget: Option<f64>,

        /// Directory where workflow documents and debug artifacts are
        /// written. Defaults to `<scope_dir>/.raymond/state`.
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Write per-step JSONL debug artifacts under `<state_dir>/debug`.
        #[arg(long)]
        debug: bool,
    },

    /// Resume every paused/incomplete workflow found under `state_dir`.
    Resume {
        #[arg(value_name = "SCOPE_DIR")]
        scope_dir: PathBuf,

        #[arg(long)]
        state_dir: Option<PathBuf>,

        #[arg(long)]
        debug: bool,
    },

    /// List workflow documents under `state_dir` and their status.
    Status {
        #[arg(value_name = "SCOPE_DIR")]
        scope_dir: PathBuf,

        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}
