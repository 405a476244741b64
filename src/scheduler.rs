//! The workflow loop (C10, spec §4.10).
//!
//! Advances a workflow document until every agent terminates or the whole
//! workflow pauses. Concurrency is per-agent and cooperative: each agent has
//! at most one in-flight step, and the scheduler waits for the first of any
//! in-flight steps to complete using a `tokio::task::JoinSet` — the natural
//! tokio analogue of the teacher's channel-based `session::event_loop`
//! "wait for the next thing to happen" pattern, generalized from one
//! channel of UI events to N concurrent agent steps.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::task::JoinSet;

use crate::error::{ErrorClass, OrchestratorError};
use crate::event::{Event, EventBus, Timestamp};
use crate::executor::llm::{self, LlmConfig, ProcessSpawner};
use crate::executor::script::{self, ScriptConfig};
use crate::model::Workflow;
use crate::resolver::{self, StateKind};
use crate::store::Store;
use crate::{applicator, model::Agent};

/// Retry budget shared by every retryable LLM/script failure class at the
/// scheduler level (spec §4.10's recovery table).
pub const MAX_RETRIES: u32 = 3;

pub fn unix_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

struct StepOutcome {
    kind: StateKind,
    transition: crate::transition::ParsedTransition,
    new_session: Option<String>,
    cost_delta: f64,
    duration_ms: u64,
}

pub struct Scheduler {
    pub bus: EventBus,
    pub store: Store,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub llm_config: LlmConfig,
    pub script_config: ScriptConfig,
}

impl Scheduler {
    pub fn new(bus: EventBus, store: Store, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Scheduler {
            bus,
            store,
            spawner,
            llm_config: LlmConfig::default(),
            script_config: ScriptConfig::default(),
        }
    }

    /// Run `workflow` to completion or pause, persisting after every step
    /// outcome (spec §4.10's persistence discipline).
    pub async fn run(&self, mut workflow: Workflow) -> Result<Workflow, OrchestratorError> {
        let mut in_flight: JoinSet<(String, Result<StepOutcome, OrchestratorError>)> = JoinSet::new();
        let mut pending: HashSet<String> = HashSet::new();

        loop {
            if workflow.is_terminated() {
                self.bus.emit(&Event::WorkflowCompleted {
                    workflow_id: workflow.workflow_id.clone(),
                    at: unix_millis(),
                });
                self.store.delete(&workflow.workflow_id)?;
                return Ok(workflow);
            }
            if workflow.all_paused() {
                self.bus.emit(&Event::WorkflowPaused {
                    workflow_id: workflow.workflow_id.clone(),
                    at: unix_millis(),
                });
                self.store.write(&workflow)?;
                return Ok(workflow);
            }

            for agent in workflow.agents.iter().filter(|a| !a.paused) {
                if pending.contains(&agent.id) {
                    continue;
                }
                pending.insert(agent.id.clone());
                in_flight.spawn(spawn_step(
                    Arc::clone(&self.spawner),
                    self.bus.clone(),
                    self.llm_config.clone(),
                    self.script_config.clone(),
                    workflow.workflow_id.clone(),
                    workflow.scope_dir.clone(),
                    agent.clone(),
                ));
            }

            let Some(joined) = in_flight.join_next().await else {
                // No in-flight tasks and not terminated/paused: every agent is
                // either already pending or awaiting a future tick. Shouldn't
                // occur given the loop invariant above, but avoid a hot spin.
                continue;
            };
            let (agent_id, result) = joined.expect("agent step task panicked");
            pending.remove(&agent_id);
            self.handle_result(&mut workflow, &agent_id, result)?;
            self.store.write(&workflow)?;
        }
    }

    fn handle_result(
        &self,
        workflow: &mut Workflow,
        agent_id: &str,
        result: Result<StepOutcome, OrchestratorError>,
    ) -> Result<(), OrchestratorError> {
        match result {
            Ok(outcome) => self.handle_success(workflow, agent_id, outcome),
            Err(err) => self.handle_error(workflow, agent_id, err),
        }
    }

    fn handle_success(&self, workflow: &mut Workflow, agent_id: &str, outcome: StepOutcome) -> Result<(), OrchestratorError> {
        if outcome.cost_delta != 0.0 {
            workflow.total_cost_usd += outcome.cost_delta;
        }

        let state_name = workflow
            .agent_mut(agent_id)
            .map(|a| a.current_state.clone())
            .unwrap_or_default();

        let transition = if workflow.total_cost_usd > workflow.budget {
            self.bus.emit(&Event::ErrorOccurred {
                agent_id: agent_id.to_string(),
                kind: "BudgetExceeded".to_string(),
                retryable: false,
                attempt: 0,
                message: format!(
                    "accumulated cost {} exceeds budget {}",
                    workflow.total_cost_usd, workflow.budget
                ),
                at: unix_millis(),
            });
            crate::transition::ParsedTransition::Result {
                payload: format!("budget exceeded: ${:.4} over ${:.4}", workflow.total_cost_usd, workflow.budget),
            }
        } else {
            outcome.transition
        };

        self.bus.emit(&Event::StateCompleted {
            agent_id: agent_id.to_string(),
            state: state_name,
            kind: outcome.kind,
            session: outcome.new_session.clone(),
            cost_delta: outcome.cost_delta,
            cumulative_cost: workflow.total_cost_usd,
            duration_ms: outcome.duration_ms,
            at: unix_millis(),
        });

        applicator::apply(workflow, agent_id, transition, outcome.new_session, &self.bus, unix_millis);
        if let Some(agent) = workflow.agent_mut(agent_id) {
            agent.retry_count = 0;
        }
        Ok(())
    }

    fn handle_error(&self, workflow: &mut Workflow, agent_id: &str, err: OrchestratorError) -> Result<(), OrchestratorError> {
        self.bus.emit(&Event::ErrorOccurred {
            agent_id: agent_id.to_string(),
            kind: format!("{err}"),
            retryable: matches!(err.classify(), ErrorClass::Retryable),
            attempt: workflow.agent_mut(agent_id).map(|a| a.retry_count).unwrap_or(0),
            message: err.to_string(),
            at: unix_millis(),
        });

        match err.classify() {
            ErrorClass::Pausable => {
                if let Some(agent) = workflow.agent_mut(agent_id) {
                    agent.paused = true;
                }
                Ok(())
            }
            ErrorClass::Retryable => {
                let retry_count = workflow
                    .agent_mut(agent_id)
                    .map(|a| {
                        a.retry_count += 1;
                        a.retry_count
                    })
                    .unwrap_or(0);
                if retry_count >= MAX_RETRIES {
                    if matches!(err, OrchestratorError::Timeout { .. }) {
                        if let Some(agent) = workflow.agent_mut(agent_id) {
                            agent.paused = true;
                        }
                    } else {
                        workflow.remove_agent(agent_id);
                    }
                }
                Ok(())
            }
            ErrorClass::FatalToWorkflow => Err(err),
            ErrorClass::Propagate => Err(err),
        }
    }
}

async fn spawn_step(
    spawner: Arc<dyn ProcessSpawner>,
    bus: EventBus,
    llm_config: LlmConfig,
    script_config: ScriptConfig,
    workflow_id: String,
    scope_dir: PathBuf,
    agent: Agent,
) -> (String, Result<StepOutcome, OrchestratorError>) {
    let agent_id = agent.id.clone();
    let result = run_one_step(spawner, bus, llm_config, script_config, workflow_id, scope_dir, agent).await;
    (agent_id, result)
}

async fn run_one_step(
    spawner: Arc<dyn ProcessSpawner>,
    bus: EventBus,
    llm_config: LlmConfig,
    script_config: ScriptConfig,
    workflow_id: String,
    scope_dir: PathBuf,
    agent: Agent,
) -> Result<StepOutcome, OrchestratorError> {
    let resolved = resolver::resolve(&scope_dir, &agent.current_state)?;
    match resolved.kind {
        StateKind::Llm => {
            let outcome = llm::run_step(spawner.as_ref(), &scope_dir, &agent, &bus, &llm_config, unix_millis).await?;
            Ok(StepOutcome {
                kind: StateKind::Llm,
                transition: outcome.transition,
                new_session: outcome.new_session,
                cost_delta: outcome.cost_delta,
                duration_ms: outcome.duration_ms,
            })
        }
        StateKind::Script => {
            let outcome = script::run_step(&workflow_id, &scope_dir, &agent, &bus, &script_config, unix_millis).await?;
            Ok(StepOutcome {
                kind: StateKind::Script,
                transition: outcome.transition,
                new_session: agent.session_id.clone(),
                cost_delta: 0.0,
                duration_ms: 0,
            })
        }
    }
}
