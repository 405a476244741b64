//! Debug observer (C11, spec §4.11, §6).
//!
//! Maintains one append-only JSONL file per `(agentId, stateName, stepNo)`
//! plus a workflow-level `transitions.log`. All writes are best-effort: an
//! I/O failure is logged via `tracing` and otherwise swallowed, matching the
//! observer-isolation contract — a broken debug directory must never stop
//! the scheduler.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::event::{Event, Handler};

pub struct DebugObserver {
    dir: PathBuf,
    /// Per-agent step counter, incremented on every `StateStarted`.
    step_numbers: Mutex<HashMap<String, u32>>,
}

impl DebugObserver {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DebugObserver {
            dir,
            step_numbers: Mutex::new(HashMap::new()),
        })
    }

    fn artifact_stem(&self, agent_id: &str, state: &str, step_no: u32) -> PathBuf {
        self.dir.join(format!("{agent_id}_{state}_{step_no:03}"))
    }

    fn append_best_effort(&self, path: &std::path::Path, line: &str) {
        let result = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{line}")?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "debug observer write failed");
        }
    }

    fn write_best_effort(&self, path: &std::path::Path, contents: &str) {
        if let Err(e) = fs::write(path, contents) {
            tracing::warn!(path = %path.display(), error = %e, "debug observer write failed");
        }
    }
}

impl Handler for DebugObserver {
    fn handle(&self, event: &Event) {
        match event {
            Event::StateStarted { agent_id, state, .. } => {
                let mut steps = self.step_numbers.lock().expect("debug observer mutex poisoned");
                steps.entry(agent_id.clone()).and_modify(|n| *n += 1).or_insert(0);
            }
            Event::LlmStreamChunk { agent_id, raw, .. } => {
                let step_no = self.current_step(agent_id);
                // The state name isn't carried on LlmStreamChunk; the stream
                // file is keyed by agent and step only until StateCompleted
                // tells us the state name for the final rename-free path.
                let path = self.dir.join(format!("{agent_id}_{step_no:03}.jsonl"));
                self.append_best_effort(&path, raw);
            }
            Event::StateCompleted { agent_id, state, .. } => {
                let step_no = self.current_step(agent_id);
                let from = self.dir.join(format!("{agent_id}_{step_no:03}.jsonl"));
                if from.is_file() {
                    let to = self.artifact_stem(agent_id, state, step_no).with_extension("jsonl");
                    let _ = fs::rename(&from, &to);
                }
            }
            Event::ScriptOutput { agent_id, stdout, stderr, exit_code, duration_ms, .. } => {
                let step_no = self.current_step(agent_id);
                let stem = self.artifact_stem(agent_id, "script", step_no);
                self.write_best_effort(&stem.with_extension("stdout"), stdout);
                self.write_best_effort(&stem.with_extension("stderr"), stderr);
                self.write_best_effort(
                    &stem.with_extension("meta"),
                    &format!("exit_code={exit_code:?}\nduration_ms={duration_ms}\n"),
                );
            }
            Event::TransitionOccurred { agent_id, from, to, tag, payload, spawned_child, .. } => {
                let line = format!(
                    "{{\"agent\":{agent_id:?},\"tag\":{tag:?},\"from\":{from:?},\"to\":{to:?},\"payload\":{payload:?},\"spawnedChild\":{spawned_child:?}}}"
                );
                self.append_best_effort(&self.dir.join("transitions.log"), &line);
            }
            _ => {}
        }
    }
}

impl DebugObserver {
    fn current_step(&self, agent_id: &str) -> u32 {
        *self
            .step_numbers
            .lock()
            .expect("debug observer mutex poisoned")
            .get(agent_id)
            .unwrap_or(&0)
    }
}
