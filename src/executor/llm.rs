//! LLM-state executor (C7, spec §4.7).
//!
//! Drives one agent through one step at an LLM state: render the prompt,
//! spawn the external coding agent, stream-consume its stdout, and resolve
//! the transition it emits. Generalizes the teacher's long-lived
//! `SessionRunner` (one subprocess serving a whole interactive session) to
//! one subprocess per step, with a bounded reminder-retry loop driven by
//! policy (spec §4.2) rather than a human at a terminal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::agent_process::{AgentInvocation, AgentProcess};
use crate::error::{OrchestratorError, TimeoutKind};
use crate::event::{Event, EventBus, Timestamp};
use crate::model::Agent;
use crate::policy::{self, Policy, PolicyDecision};
use crate::protocol::{self, AssistantContentBlock, InboundEvent};
use crate::resolver::{self, StateKind};
use crate::template;
use crate::transition::ParsedTransition;

/// Bounded per-step reminder-retry budget (spec §4.7 step 7).
pub const MAX_REMINDER_ATTEMPTS: u32 = 3;

/// Knobs that configure every LLM step, separate from the persisted document
/// (mirrors the teacher's `RunConfig`/`WorkerConfig` plain-struct-of-knobs
/// pattern, spec §3 NEW).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub binary: String,
    pub wall_timeout: Duration,
    pub idle_timeout: Duration,
    pub cleanup_timeout: Duration,
    pub default_model: Option<String>,
    pub default_effort: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            binary: "claude".to_string(),
            wall_timeout: Duration::from_secs(600),
            idle_timeout: Duration::from_secs(120),
            cleanup_timeout: Duration::from_secs(30),
            default_model: None,
            default_effort: None,
        }
    }
}

/// What a successful LLM step produced, ready for the applicator (C9).
pub struct LlmStepOutcome {
    pub transition: ParsedTransition,
    pub new_session: Option<String>,
    pub cost_delta: f64,
    pub duration_ms: u64,
}

/// Spawns an `AgentProcess` for one invocation. Production code implements
/// this over `TokioAgentProcess`; tests implement it over a scripted queue
/// of `MockAgentProcess` turns (C13, spec §4.13).
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, invocation: &AgentInvocation) -> Result<Box<dyn AgentProcess>, OrchestratorError>;
}

pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, invocation: &AgentInvocation) -> Result<Box<dyn AgentProcess>, OrchestratorError> {
        let process = crate::agent_process::TokioAgentProcess::spawn(invocation)?;
        Ok(Box::new(process))
    }
}

/// Drive `agent` through one LLM step (spec §4.7).
pub async fn run_step(
    spawner: &dyn ProcessSpawner,
    scope: &Path,
    agent: &Agent,
    bus: &EventBus,
    config: &LlmConfig,
    now: impl Fn() -> Timestamp,
) -> Result<LlmStepOutcome, OrchestratorError> {
    let resolved = resolver::resolve(scope, &agent.current_state)?;
    debug_assert_eq!(resolved.kind, StateKind::Llm);

    let contents = template::load(scope, &agent.current_state)?;
    let (policy, body) = policy::split_frontmatter(&contents)?;
    let variables = template::build_variables(agent.pending_result.as_deref(), agent.fork_attributes.as_ref());
    let base_prompt = template::render(&body, &variables);

    let working_dir = agent.cwd.clone().unwrap_or_else(|| scope.to_path_buf());

    bus.emit(&Event::StateStarted {
        agent_id: agent.id.clone(),
        state: agent.current_state.clone(),
        kind: StateKind::Llm,
        session: agent.session_id.clone(),
        at: now(),
    });

    let started_at = Instant::now();
    let mut session = agent.session_id.clone();
    let mut prompt = base_prompt;
    let mut attempt = 0u32;

    let outcome = loop {
        bus.emit(&Event::LlmInvocationStarted {
            agent_id: agent.id.clone(),
            session: session.clone(),
            is_reminder_retry: attempt > 0,
            attempt,
            at: now(),
        });

        let invocation = AgentInvocation {
            binary: config.binary.clone(),
            prompt: prompt.clone(),
            resume_session: session.clone(),
            model: policy.model.clone().or_else(|| config.default_model.clone()),
            effort: policy.effort.clone().or_else(|| config.default_effort.clone()),
            working_dir: working_dir.clone(),
        };

        let mut process = spawner.spawn(&invocation)?;
        let turn = consume_stream(process.as_mut(), agent, bus, config, &now).await?;

        match decide_transition(&policy, &turn.assistant_text, scope)? {
            TransitionDecision::Resolved(transition) => {
                break LlmStepOutcome {
                    transition,
                    new_session: turn.session_id.or(session),
                    cost_delta: turn.cost_usd,
                    duration_ms: started_at.elapsed().as_millis() as u64,
                };
            }
            TransitionDecision::NeedsReminder { reason } => {
                attempt += 1;
                session = turn.session_id.or(session);
                if !policy.is_empty() && attempt < MAX_REMINDER_ATTEMPTS {
                    prompt = reminder_prompt(&policy, &reason);
                    continue;
                }
                return Err(OrchestratorError::PolicyViolation {
                    state: agent.current_state.clone(),
                    reason,
                });
            }
        }
    };

    // `StateCompleted` carries the cumulative workflow cost, which is only
    // known once the scheduler folds this step's delta into the document
    // (spec §4.7 step 9) — the scheduler emits it, not this executor.
    Ok(outcome)
}

enum TransitionDecision {
    Resolved(ParsedTransition),
    NeedsReminder { reason: String },
}

/// Per spec §4.7's C7-specific classification: `PolicyViolation`,
/// `TransitionTargetUnsafe`, and resolution errors are all retried through
/// the reminder loop rather than failing the step outright.
fn decide_transition(
    policy: &Policy,
    assistant_text: &str,
    scope: &Path,
) -> Result<TransitionDecision, OrchestratorError> {
    let transitions = match crate::transition::parse_transitions(assistant_text) {
        Ok(t) => t,
        Err(e @ (OrchestratorError::TransitionParseError { .. } | OrchestratorError::TransitionTargetUnsafe { .. })) => {
            return Ok(TransitionDecision::NeedsReminder { reason: e.to_string() });
        }
        Err(e) => return Err(e),
    };
    match policy::decide(policy, transitions) {
        PolicyDecision::Valid(transition) | PolicyDecision::Implicit(transition) => {
            if let Some(target) = transition.target() {
                if let Err(e) = resolver::resolve(scope, target) {
                    return Ok(TransitionDecision::NeedsReminder { reason: e.to_string() });
                }
            }
            Ok(TransitionDecision::Resolved(transition))
        }
        PolicyDecision::Violation { reason, .. } => Ok(TransitionDecision::NeedsReminder { reason }),
    }
}

fn reminder_prompt(policy: &Policy, reason: &str) -> String {
    let mut options = String::new();
    for entry in &policy.allowed_transitions {
        options.push_str(&format!("- <{}", entry.tag));
        if let Some(target) = &entry.target {
            options.push_str(&format!(" target={target:?}"));
        }
        if let Some(ret) = &entry.r#return {
            options.push_str(&format!(" return={ret:?}"));
        }
        if let Some(next) = &entry.next {
            options.push_str(&format!(" next={next:?}"));
        }
        options.push_str(">\n");
    }
    format!(
        "Your previous response did not produce a valid transition: {reason}\n\n\
         You must emit exactly one of the following transition tags:\n{options}"
    )
}

struct ConsumedTurn {
    assistant_text: String,
    cost_usd: f64,
    session_id: Option<String>,
}

async fn consume_stream(
    process: &mut dyn AgentProcess,
    agent: &Agent,
    bus: &EventBus,
    config: &LlmConfig,
    now: &impl Fn() -> Timestamp,
) -> Result<ConsumedTurn, OrchestratorError> {
    let deadline = Instant::now() + config.wall_timeout;
    let mut assistant_text = String::new();
    let mut cost_usd = 0.0;
    let mut session_id = None;

    loop {
        let remaining_wall = deadline.saturating_duration_since(Instant::now());
        if remaining_wall.is_zero() {
            return Err(timeout_and_cleanup(process, TimeoutKind::Wall, config.wall_timeout, config).await);
        }

        let per_read_budget = remaining_wall.min(config.idle_timeout);
        let line = match tokio::time::timeout(per_read_budget, process.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(OrchestratorError::SubprocessError(e)),
            Err(_) => {
                return Err(timeout_and_cleanup(process, TimeoutKind::Idle, config.idle_timeout, config).await);
            }
        };

        bus.emit(&Event::LlmStreamChunk {
            agent_id: agent.id.clone(),
            raw: line.clone(),
            at: now(),
        });

        match protocol::parse_line(&line) {
            Ok(Some(InboundEvent::Assistant(msg))) => {
                for block in msg.message.content {
                    match block {
                        AssistantContentBlock::Text { text } => {
                            assistant_text.push_str(&text);
                            bus.emit(&Event::ProgressMessage {
                                agent_id: agent.id.clone(),
                                text,
                                at: now(),
                            });
                        }
                        AssistantContentBlock::ToolUse { name, .. } => {
                            bus.emit(&Event::ToolInvocation {
                                agent_id: agent.id.clone(),
                                tool_name: name,
                                at: now(),
                            });
                        }
                        AssistantContentBlock::Other => {}
                    }
                }
            }
            Ok(Some(InboundEvent::User(user))) => {
                if let Some(result) = user.tool_use_result {
                    if result.is_error {
                        bus.emit(&Event::ToolError {
                            agent_id: agent.id.clone(),
                            tool_name: result.name,
                            message: result.content,
                            at: now(),
                        });
                    }
                }
            }
            Ok(Some(InboundEvent::Result(result))) => {
                if protocol::is_usage_limit(&result) {
                    return Err(OrchestratorError::UsageLimit);
                }
                cost_usd = result.total_cost_usd;
                if !result.session_id.is_empty() {
                    session_id = Some(result.session_id);
                }
            }
            Ok(Some(InboundEvent::System(_) | InboundEvent::Other)) | Ok(None) => {}
            Err(_) => {} // tolerate unparseable lines; the debug observer still records the raw chunk
        }
    }

    process.wait().await.map_err(OrchestratorError::SubprocessError)?;

    Ok(ConsumedTurn {
        assistant_text,
        cost_usd,
        session_id,
    })
}

async fn timeout_and_cleanup(
    process: &mut dyn AgentProcess,
    kind: TimeoutKind,
    elapsed: Duration,
    config: &LlmConfig,
) -> OrchestratorError {
    let _ = process.terminate().await;
    let _ = tokio::time::timeout(config.cleanup_timeout, process.wait()).await;
    let _ = process.kill().await;
    OrchestratorError::Timeout {
        kind,
        elapsed_secs: elapsed.as_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_process::{MockAgentProcess, MockTurn};
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct QueueSpawner {
        turns: Mutex<std::collections::VecDeque<MockTurn>>,
    }

    impl QueueSpawner {
        fn new(turns: Vec<MockTurn>) -> Self {
            QueueSpawner {
                turns: Mutex::new(turns.into()),
            }
        }
    }

    impl ProcessSpawner for QueueSpawner {
        fn spawn(&self, _invocation: &AgentInvocation) -> Result<Box<dyn AgentProcess>, OrchestratorError> {
            let turn = self.turns.lock().unwrap().pop_front().expect("no more scripted turns");
            Ok(Box::new(MockAgentProcess::new(turn)))
        }
    }

    fn result_line(session_id: &str, cost: f64) -> String {
        format!(
            r#"{{"type":"result","subtype":"success","total_cost_usd":{cost},"session_id":"{session_id}"}}"#
        )
    }

    fn assistant_line(text: &str) -> String {
        format!(r#"{{"type":"assistant","message":{{"content":[{{"type":"text","text":{text}}}]}}}}"#)
    }

    #[tokio::test]
    async fn successful_goto_step() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("A.md"), "do the thing").unwrap();
        std::fs::write(dir.path().join("B.md"), "next state").unwrap();

        let text = serde_json::to_string("<goto>B.md</goto>").unwrap();
        let turn = MockTurn {
            lines: vec![assistant_line(&text), result_line("sess-1", 0.25)],
            exit_code: Some(0),
        };
        let spawner = QueueSpawner::new(vec![turn]);
        let bus = EventBus::new();
        let agent = Agent::entry("main", "A.md");
        let config = LlmConfig::default();

        let outcome = run_step(&spawner, dir.path(), &agent, &bus, &config, || 0)
            .await
            .unwrap();

        assert_eq!(outcome.transition, ParsedTransition::Goto { target: "B.md".into() });
        assert_eq!(outcome.new_session.as_deref(), Some("sess-1"));
        assert_eq!(outcome.cost_delta, 0.25);
    }

    #[tokio::test]
    async fn reminder_retry_recovers_after_policy_violation() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("A.md"),
            "---\nallowed_transitions:\n  - tag: goto\n    target: B.md\n---\nbody",
        )
        .unwrap();
        std::fs::write(dir.path().join("B.md"), "next").unwrap();

        let bad_turn = MockTurn {
            lines: vec![result_line("sess-1", 0.1)],
            exit_code: Some(0),
        };
        let good_text = serde_json::to_string("<goto>B.md</goto>").unwrap();
        let good_turn = MockTurn {
            lines: vec![assistant_line(&good_text), result_line("sess-1", 0.1)],
            exit_code: Some(0),
        };
        let spawner = QueueSpawner::new(vec![bad_turn, good_turn]);
        let bus = EventBus::new();
        let agent = Agent::entry("main", "A.md");
        let config = LlmConfig::default();

        let outcome = run_step(&spawner, dir.path(), &agent, &bus, &config, || 0)
            .await
            .unwrap();
        assert_eq!(outcome.transition, ParsedTransition::Goto { target: "B.md".into() });
    }

    #[tokio::test]
    async fn exhausting_reminder_attempts_is_policy_violation() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("A.md"),
            "---\nallowed_transitions:\n  - tag: goto\n    target: B.md\n---\nbody",
        )
        .unwrap();

        let empty_turn = || MockTurn {
            lines: vec![result_line("sess-1", 0.0)],
            exit_code: Some(0),
        };
        let spawner = QueueSpawner::new(vec![empty_turn(), empty_turn(), empty_turn()]);
        let bus = EventBus::new();
        let agent = Agent::entry("main", "A.md");
        let config = LlmConfig::default();

        let err = run_step(&spawner, dir.path(), &agent, &bus, &config, || 0)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PolicyViolation { .. }));
    }

    #[tokio::test]
    async fn usage_limit_short_circuits() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("A.md"), "body").unwrap();

        let turn = MockTurn {
            lines: vec![
                r#"{"type":"result","subtype":"usage_limit_reached","total_cost_usd":0.0,"session_id":"s"}"#
                    .to_string(),
            ],
            exit_code: Some(0),
        };
        let spawner = QueueSpawner::new(vec![turn]);
        let bus = EventBus::new();
        let agent = Agent::entry("main", "A.md");
        let config = LlmConfig::default();

        let err = run_step(&spawner, dir.path(), &agent, &bus, &config, || 0)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UsageLimit));
    }

    #[test]
    fn invocation_working_dir_defaults_to_scope() {
        let scope = PathBuf::from("/scope");
        let agent = Agent::entry("main", "A.md");
        let wd = agent.cwd.clone().unwrap_or(scope.clone());
        assert_eq!(wd, scope);
    }
}
