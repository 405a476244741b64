//! Script-state executor (C8, spec §4.8).
//!
//! Runs a resolved `.sh`/`.bat` state file as a subprocess with a composed
//! environment, captures its output, and requires exactly one transition on
//! stdout. Scripts never retry: a non-zero exit or a malformed transition set
//! is always fatal (spec §4.8 steps 6–7).

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::OrchestratorError;
use crate::event::{Event, EventBus, Timestamp};
use crate::model::Agent;
use crate::resolver::{self, StateKind};
use crate::transition::{self, ParsedTransition};

#[derive(Debug, Clone)]
pub struct ScriptConfig {
    pub wall_timeout: Duration,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        ScriptConfig {
            wall_timeout: Duration::from_secs(300),
        }
    }
}

pub struct ScriptStepOutcome {
    pub transition: ParsedTransition,
}

/// Build the argv for running `path` as a script (spec §4.8 step 2): never
/// hands the path to a shell for interpretation, only as a literal argument
/// to a fixed interpreter.
fn interpreter_argv(path: &Path) -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        ("cmd.exe", vec!["/c".to_string(), path.display().to_string()])
    } else {
        ("bash", vec![path.display().to_string()])
    }
}

/// Compose the environment for a script invocation (spec §4.8 step 3,
/// spec §6 environment-variable contract): parent env, reserved
/// `RAYMOND_*` keys, then fork attributes (excluding transition-reserved
/// names).
fn build_env(workflow_id: &str, agent: &Agent) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.insert("RAYMOND_WORKFLOW_ID".to_string(), workflow_id.to_string());
    env.insert("RAYMOND_AGENT_ID".to_string(), agent.id.clone());
    if let Some(result) = &agent.pending_result {
        env.insert("RAYMOND_RESULT".to_string(), result.clone());
    }
    if let Some(attrs) = &agent.fork_attributes {
        for (k, v) in attrs {
            if k == "next" || k == "cd" {
                continue;
            }
            env.insert(k.clone(), v.clone());
        }
    }
    env
}

pub async fn run_step(
    workflow_id: &str,
    scope: &Path,
    agent: &Agent,
    bus: &EventBus,
    config: &ScriptConfig,
    now: impl Fn() -> Timestamp,
) -> Result<ScriptStepOutcome, OrchestratorError> {
    let resolved = resolver::resolve(scope, &agent.current_state)?;
    if resolved.kind != StateKind::Script {
        return Err(OrchestratorError::ResolutionNotFound {
            name: format!("{} resolved to a non-script state", agent.current_state),
        });
    }

    bus.emit(&Event::StateStarted {
        agent_id: agent.id.clone(),
        state: agent.current_state.clone(),
        kind: StateKind::Script,
        session: None,
        at: now(),
    });

    let working_dir = agent.cwd.clone().unwrap_or_else(|| scope.to_path_buf());
    let (program, args) = interpreter_argv(&resolved.path);
    let env = build_env(workflow_id, agent);

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .current_dir(&working_dir)
        .env_clear()
        .envs(&env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = tokio::time::Instant::now();
    let output = tokio::time::timeout(config.wall_timeout, cmd.output())
        .await
        .map_err(|_| OrchestratorError::ScriptFailed {
            state: agent.current_state.clone(),
            reason: format!("timed out after {}s", config.wall_timeout.as_secs()),
        })?
        .map_err(OrchestratorError::SubprocessError)?;
    let duration_ms = started.elapsed().as_millis() as u64;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code();

    bus.emit(&Event::ScriptOutput {
        agent_id: agent.id.clone(),
        stdout: stdout.clone(),
        stderr: stderr.clone(),
        exit_code,
        duration_ms,
        at: now(),
    });

    if exit_code != Some(0) {
        return Err(OrchestratorError::ScriptFailed {
            state: agent.current_state.clone(),
            reason: format!("exited with {exit_code:?}; stderr: {stderr}"),
        });
    }

    let transitions = transition::parse_transitions(&stdout)?;
    let transition = match transitions.len() {
        1 => transitions.into_iter().next().unwrap(),
        n => {
            return Err(OrchestratorError::ScriptFailed {
                state: agent.current_state.clone(),
                reason: format!("expected exactly one transition on stdout, found {n}"),
            });
        }
    };

    if let Some(target) = transition.target() {
        resolver::resolve(scope, target).map_err(|_| OrchestratorError::ScriptFailed {
            state: agent.current_state.clone(),
            reason: format!("transition target {target:?} did not resolve"),
        })?;
    }

    Ok(ScriptStepOutcome { transition })
}
