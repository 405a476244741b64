//! The persistent data model (spec §3): workflows, agents, and return frames.
//!
//! The workflow document is a value — each scheduler iteration produces a new
//! `Workflow` rather than mutating one shared across tasks, matching the
//! copy-on-write discipline the core design calls for.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A stable `{parent}_{stateAbbrev}{n}` style frame recording how to resume a
/// caller after a `result` transition (spec §3, "Return frame").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnFrame {
    pub session: Option<String>,
    pub state: String,
    pub cwd: Option<PathBuf>,
}

/// A logical thread of execution within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub current_state: String,
    pub session_id: Option<String>,
    pub cwd: Option<PathBuf>,
    pub stack: Vec<ReturnFrame>,
    pub pending_result: Option<String>,
    #[serde(default)]
    pub fork_attributes: Option<HashMap<String, String>>,
    pub paused: bool,
    pub retry_count: u32,
}

impl Agent {
    /// Create the initial agent of a freshly created workflow.
    pub fn entry(id: impl Into<String>, entry_state: impl Into<String>) -> Self {
        Agent {
            id: id.into(),
            current_state: entry_state.into(),
            session_id: None,
            cwd: None,
            stack: Vec::new(),
            pending_result: None,
            fork_attributes: None,
            paused: false,
            retry_count: 0,
        }
    }

    /// An agent spawned by `fork` never inherits a caller's pending payload
    /// (spec §9 Open Questions: seeded as null).
    pub fn spawned(
        id: impl Into<String>,
        initial_state: impl Into<String>,
        cwd: Option<PathBuf>,
        fork_attributes: HashMap<String, String>,
    ) -> Self {
        Agent {
            id: id.into(),
            current_state: initial_state.into(),
            session_id: None,
            cwd,
            stack: Vec::new(),
            pending_result: None,
            fork_attributes: Some(fork_attributes),
            paused: false,
            retry_count: 0,
        }
    }
}

/// A persistent workflow document (spec §3, §6 "Persistent state document").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub scope_dir: PathBuf,
    pub budget: f64,
    pub total_cost_usd: f64,
    #[serde(default)]
    pub fork_counters: HashMap<String, u64>,
    pub agents: Vec<Agent>,
}

impl Workflow {
    /// Create a new workflow with exactly one agent at `entry_state`.
    pub fn new(
        workflow_id: impl Into<String>,
        scope_dir: PathBuf,
        budget: f64,
        entry_state: impl Into<String>,
    ) -> Self {
        let entry_state = entry_state.into();
        Workflow {
            workflow_id: workflow_id.into(),
            scope_dir,
            budget,
            total_cost_usd: 0.0,
            fork_counters: HashMap::new(),
            agents: vec![Agent::entry("main", entry_state)],
        }
    }

    /// A workflow terminates when its agent set is empty (spec §3 Lifecycle).
    pub fn is_terminated(&self) -> bool {
        self.agents.is_empty()
    }

    /// All agents are paused — the scheduler should stop and persist (spec §4.10).
    pub fn all_paused(&self) -> bool {
        !self.agents.is_empty() && self.agents.iter().all(|a| a.paused)
    }

    pub fn agent_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    pub fn remove_agent(&mut self, id: &str) {
        self.agents.retain(|a| a.id != id);
    }

    /// Generate the next fork child id for `parent_id`, incrementing and
    /// persisting the per-parent counter on the workflow document itself so
    /// ids are never reused even after the child terminates (spec §3 Identity).
    pub fn next_fork_id(&mut self, parent_id: &str, state_abbrev: &str) -> String {
        let counter = self.fork_counters.entry(parent_id.to_string()).or_insert(0);
        let n = *counter;
        *counter += 1;
        format!("{parent_id}_{state_abbrev}{n}")
    }
}
