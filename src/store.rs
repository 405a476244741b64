//! Persistent store (C5, spec §4.5).
//!
//! Atomic write via a sibling temp file + `fsync` + rename, grounded in the
//! temp-file-then-rename pattern used for state persistence across the
//! example corpus (e.g. a `StateManager::save` writing `state.json.tmp` then
//! `fs::rename`-ing it into place). This implementation additionally
//! `sync_all`s the temp file and its parent directory before the rename, per
//! spec §4.5's explicit durability requirement.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::OrchestratorError;
use crate::model::Workflow;

pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Store { root })
    }

    fn doc_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join(format!("{workflow_id}.json"))
    }

    fn tmp_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join(format!("{workflow_id}.json.tmp"))
    }

    /// Read the latest committed document for `workflow_id`.
    pub fn read(&self, workflow_id: &str) -> Result<Workflow, OrchestratorError> {
        let path = self.doc_path(workflow_id);
        let contents = fs::read_to_string(&path).map_err(|e| OrchestratorError::StateFileError {
            workflow_id: workflow_id.to_string(),
            reason: format!("not found: {e}"),
        })?;
        serde_json::from_str(&contents).map_err(|e| OrchestratorError::StateFileError {
            workflow_id: workflow_id.to_string(),
            reason: format!("corrupt document: {e}"),
        })
    }

    /// Atomically replace the persisted document for this workflow.
    ///
    /// Writes a sibling `.tmp` file, `fsync`s it, renames it over the target,
    /// then `fsync`s the containing directory so the rename itself is durable.
    /// A reader can never observe a half-written file: `fs::rename` within the
    /// same filesystem is atomic, and the old committed bytes remain visible
    /// until the rename completes.
    pub fn write(&self, doc: &Workflow) -> Result<(), OrchestratorError> {
        let tmp = self.tmp_path(&doc.workflow_id);
        let final_path = self.doc_path(&doc.workflow_id);

        let json = serde_json::to_string_pretty(doc).map_err(|e| OrchestratorError::StateFileError {
            workflow_id: doc.workflow_id.clone(),
            reason: format!("failed to serialize: {e}"),
        })?;

        let write_result = (|| -> std::io::Result<()> {
            let file = File::create(&tmp)?;
            {
                use std::io::Write;
                let mut file = &file;
                file.write_all(json.as_bytes())?;
            }
            file.sync_all()?;
            fs::rename(&tmp, &final_path)?;
            if let Ok(dir) = File::open(&self.root) {
                let _ = dir.sync_all();
            }
            Ok(())
        })();

        write_result.map_err(|e| {
            let _ = fs::remove_file(&tmp);
            OrchestratorError::StateFileError {
                workflow_id: doc.workflow_id.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Enumerate the ids of all persisted workflows (used by crash recovery).
    pub fn list(&self) -> Result<Vec<String>, OrchestratorError> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| OrchestratorError::StateFileError {
            workflow_id: String::new(),
            reason: format!("failed to list store: {e}"),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| OrchestratorError::StateFileError {
                workflow_id: String::new(),
                reason: e.to_string(),
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove a workflow's document after successful completion.
    pub fn delete(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        let path = self.doc_path(workflow_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OrchestratorError::StateFileError {
                workflow_id: workflow_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Recovery: list persisted workflows, skipping any whose scope directory
    /// no longer exists, reporting those as structured diagnostics.
    pub fn recover(&self) -> Result<(Vec<Workflow>, Vec<RecoveryDiagnostic>), OrchestratorError> {
        let mut ok = Vec::new();
        let mut diagnostics = Vec::new();
        for id in self.list()? {
            let doc = self.read(&id)?;
            if doc.scope_dir.is_dir() {
                ok.push(doc);
            } else {
                diagnostics.push(RecoveryDiagnostic {
                    workflow_id: id,
                    reason: format!("scope directory {} no longer exists", doc.scope_dir.display()),
                });
            }
        }
        Ok((ok, diagnostics))
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryDiagnostic {
    pub workflow_id: String,
    pub reason: String,
}
