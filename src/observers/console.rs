//! Console reporter (C11, spec §4.11).
//!
//! Translates events into human-readable progress output, styled with the
//! same named-ANSI-color conventions as the teacher's `display::renderer`.
//! Tracks each agent's last tool invocation so a subsequent `ToolError` can
//! be annotated with the offending tool's name.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use crossterm::style::StyledContent;

use super::theme;
use crate::event::{Event, Handler};

pub struct ConsoleObserver<W: Write + Send> {
    out: Mutex<W>,
    quiet: bool,
    last_tool: Mutex<HashMap<String, String>>,
}

impl<W: Write + Send> ConsoleObserver<W> {
    pub fn new(out: W, quiet: bool) -> Self {
        ConsoleObserver {
            out: Mutex::new(out),
            quiet,
            last_tool: Mutex::new(HashMap::new()),
        }
    }

    fn line(&self, styled: StyledContent<String>) {
        let mut out = self.out.lock().expect("console observer mutex poisoned");
        let _ = writeln!(out, "{styled}");
    }
}

impl ConsoleObserver<std::io::Stdout> {
    pub fn stdout(quiet: bool) -> Self {
        ConsoleObserver::new(std::io::stdout(), quiet)
    }
}

impl<W: Write + Send> Handler for ConsoleObserver<W> {
    fn handle(&self, event: &Event) {
        match event {
            Event::StateStarted { agent_id, state, .. } => {
                self.line(StyledContent::new(
                    theme::dim(),
                    format!("[{agent_id}] ▶ {state}"),
                ));
            }
            Event::StateCompleted {
                agent_id,
                state,
                cost_delta,
                cumulative_cost,
                duration_ms,
                ..
            } => {
                self.line(StyledContent::new(
                    theme::dim(),
                    format!(
                        "[{agent_id}] ✓ {state} (+${cost_delta:.4}, total ${cumulative_cost:.4}, {duration_ms}ms)"
                    ),
                ));
            }
            Event::ProgressMessage { agent_id, text, .. } if !self.quiet => {
                self.line(StyledContent::new(theme::dim(), format!("[{agent_id}] {text}")));
            }
            Event::ToolInvocation { agent_id, tool_name, .. } => {
                self.last_tool
                    .lock()
                    .expect("console observer mutex poisoned")
                    .insert(agent_id.clone(), tool_name.clone());
                if !self.quiet {
                    self.line(StyledContent::new(theme::tool_name(), format!("[{agent_id}] → {tool_name}")));
                }
            }
            Event::ToolError { agent_id, message, .. } => {
                let last = self
                    .last_tool
                    .lock()
                    .expect("console observer mutex poisoned")
                    .get(agent_id)
                    .cloned()
                    .unwrap_or_else(|| "<unknown tool>".to_string());
                self.line(StyledContent::new(
                    theme::error(),
                    format!("[{agent_id}] ✗ {last}: {message}"),
                ));
            }
            Event::TransitionOccurred { agent_id, tag, from, to, .. } => {
                let to_desc = to.as_deref().unwrap_or("(terminated)");
                self.line(StyledContent::new(
                    theme::dim(),
                    format!("[{agent_id}] <{tag}> {from} -> {to_desc}"),
                ));
            }
            Event::ErrorOccurred { agent_id, message, .. } => {
                self.line(StyledContent::new(theme::error(), format!("[{agent_id}] error: {message}")));
            }
            Event::WorkflowCompleted { workflow_id, .. } => {
                self.line(StyledContent::new(theme::result_line(), format!("workflow {workflow_id} complete")));
            }
            Event::WorkflowPaused { workflow_id, .. } => {
                self.line(StyledContent::new(theme::result_line(), format!("workflow {workflow_id} paused")));
            }
            _ => {}
        }
    }
}
