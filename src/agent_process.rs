//! The external coding-agent subprocess boundary (spec §6, §9 "Subprocess
//! construction").
//!
//! Grounded in `session::runner::SessionRunner`'s use of `tokio::process`
//! with piped stdout read line-by-line, generalized from one long-lived
//! bidirectional session to one-shot-per-step invocations (the core drives
//! the agent to a single `result` per step, per spec §4.7). The trait
//! boundary exists so tests substitute `MockAgentProcess` instead of
//! spawning a real binary (C13, SPEC_FULL §4.13).

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout};

use crate::error::OrchestratorError;

/// Everything needed to build the argument vector for one invocation.
/// Built as a `Vec<String>` and passed directly to `Command::args` — never
/// through a shell — per spec §9's non-negotiable subprocess contract.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub binary: String,
    pub prompt: String,
    pub resume_session: Option<String>,
    pub model: Option<String>,
    pub effort: Option<String>,
    pub working_dir: std::path::PathBuf,
}

impl AgentInvocation {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--input-format".to_string(),
            "stream-json".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
        ];
        if let Some(session) = &self.resume_session {
            args.push("--resume".to_string());
            args.push(session.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(effort) = &self.effort {
            args.push("--effort".to_string());
            args.push(effort.clone());
        }
        args.push(self.prompt.clone());
        args
    }
}

/// One running (or already-exited) external agent invocation.
#[async_trait]
pub trait AgentProcess: Send {
    /// Read the next NDJSON line from the child's stdout. `Ok(None)` at EOF.
    async fn next_line(&mut self) -> std::io::Result<Option<String>>;
    /// Send a termination signal (SIGTERM-equivalent); does not block for exit.
    async fn terminate(&mut self) -> std::io::Result<()>;
    /// Hard-kill the process.
    async fn kill(&mut self) -> std::io::Result<()>;
    /// Wait for the process to exit, returning its status code.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;
}

/// Spawns a real external agent subprocess.
pub struct TokioAgentProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl TokioAgentProcess {
    pub fn spawn(invocation: &AgentInvocation) -> Result<Self, OrchestratorError> {
        let mut cmd = tokio::process::Command::new(&invocation.binary);
        cmd.args(invocation.args())
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(OrchestratorError::SubprocessError)?;
        let stdout = child.stdout.take().expect("stdout is piped");
        let lines = BufReader::new(stdout).lines();
        Ok(TokioAgentProcess { child, lines })
    }
}

#[async_trait]
impl AgentProcess for TokioAgentProcess {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: kill(2) with SIGTERM on a pid we own (our own child).
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }
}

/// A scripted turn returned by a `MockAgentProcess` for one invocation.
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    pub lines: Vec<String>,
    pub exit_code: Option<i32>,
}

/// Test-only double driving a queue of pre-scripted NDJSON lines instead of a
/// real binary (C13).
pub struct MockAgentProcess {
    remaining: std::collections::VecDeque<String>,
    exit_code: Option<i32>,
}

impl MockAgentProcess {
    pub fn new(turn: MockTurn) -> Self {
        MockAgentProcess {
            remaining: turn.lines.into(),
            exit_code: turn.exit_code,
        }
    }
}

#[async_trait]
impl AgentProcess for MockAgentProcess {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.remaining.pop_front())
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.exit_code)
    }
}
