mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use raymond::event::EventBus;
use raymond::executor::llm::TokioSpawner;
use raymond::model::Workflow;
use raymond::observers::{ConsoleObserver, DebugObserver, TitleObserver};
use raymond::scheduler::Scheduler;
use raymond::store::Store;
use raymond::{config, logging};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Some(Command::Run { scope_dir, entry_state, budget, state_dir, debug }) => {
            run(scope_dir, entry_state, budget, state_dir, debug, cli.quiet).await
        }
        Some(Command::Resume { scope_dir, state_dir, debug }) => {
            resume(scope_dir, state_dir, debug, cli.quiet).await
        }
        Some(Command::Status { scope_dir, state_dir }) => status(scope_dir, state_dir),
        None => {
            anyhow::bail!("no subcommand given; see `raymond --help`");
        }
    }
}

fn default_state_dir(scope_dir: &std::path::Path) -> PathBuf {
    scope_dir.join(".raymond/state")
}

fn build_bus(state_dir: &std::path::Path, debug: bool, quiet: bool) -> Result<EventBus> {
    let bus = EventBus::new();
    bus.subscribe(Arc::new(ConsoleObserver::stdout(quiet)));
    bus.subscribe(Arc::new(TitleObserver::stdout()));
    if debug {
        bus.subscribe(Arc::new(DebugObserver::new(state_dir.join("debug"))?));
    }
    Ok(bus)
}

async fn run(
    scope_dir: PathBuf,
    entry_state: Option<String>,
    budget: Option<f64>,
    state_dir: Option<PathBuf>,
    debug: bool,
    quiet: bool,
) -> Result<()> {
    let project_config = config::load(&scope_dir)?;
    let state_dir = state_dir.unwrap_or_else(|| default_state_dir(&scope_dir));
    let bus = build_bus(&state_dir, debug, quiet)?;
    let store = Store::new(&state_dir)?;

    let workflow_id = uuid::Uuid::new_v4().to_string();
    let workflow = Workflow::new(
        workflow_id,
        scope_dir,
        budget.unwrap_or(project_config.budget),
        entry_state.unwrap_or(project_config.entry_state),
    );

    let scheduler = Scheduler::new(bus, store, Arc::new(TokioSpawner));
    let result = scheduler.run(workflow).await?;

    if result.is_terminated() {
        println!("workflow {} complete, total cost ${:.4}", result.workflow_id, result.total_cost_usd);
    } else {
        println!("workflow {} paused, resume with `raymond resume`", result.workflow_id);
    }
    Ok(())
}

async fn resume(scope_dir: PathBuf, state_dir: Option<PathBuf>, debug: bool, quiet: bool) -> Result<()> {
    let state_dir = state_dir.unwrap_or_else(|| default_state_dir(&scope_dir));
    let bus = build_bus(&state_dir, debug, quiet)?;
    let store = Store::new(&state_dir)?;

    let (pending, diagnostics) = store.recover()?;
    for diagnostic in &diagnostics {
        tracing::warn!(workflow_id = %diagnostic.workflow_id, reason = %diagnostic.reason, "skipping unrecoverable workflow");
    }

    let scheduler = Scheduler::new(bus, store, Arc::new(TokioSpawner));
    for mut workflow in pending {
        let id = workflow.workflow_id.clone();
        for agent in &mut workflow.agents {
            agent.paused = false;
        }
        let result = scheduler.run(workflow).await?;
        if result.is_terminated() {
            println!("workflow {id} complete, total cost ${:.4}", result.total_cost_usd);
        } else {
            println!("workflow {id} paused again");
        }
    }
    Ok(())
}

fn status(scope_dir: PathBuf, state_dir: Option<PathBuf>) -> Result<()> {
    let state_dir = state_dir.unwrap_or_else(|| default_state_dir(&scope_dir));
    let store = Store::new(&state_dir)?;
    let (pending, diagnostics) = store.recover()?;
    if pending.is_empty() && diagnostics.is_empty() {
        println!("no workflows pending under {}", state_dir.display());
        return Ok(());
    }
    for workflow in &pending {
        println!(
            "{}: {} agent(s), ${:.4} spent of ${:.4}",
            workflow.workflow_id,
            workflow.agents.len(),
            workflow.total_cost_usd,
            workflow.budget
        );
    }
    for diagnostic in &diagnostics {
        println!("{}: unrecoverable ({})", diagnostic.workflow_id, diagnostic.reason);
    }
    Ok(())
}
