//! Prompt/template layer (C3, spec §4.3).
//!
//! Deliberately simpler than the teacher's Handlebars-based `AgentDef::render`:
//! the spec's Non-goals explicitly exclude "template engines beyond literal
//! placeholder substitution," so this performs a single, non-recursive pass
//! replacing `{{key}}` with each variable's string form. Unreplaced
//! placeholders are left as-is; no escaping is performed.

use std::collections::HashMap;
use std::path::Path;

use crate::error::OrchestratorError;

/// Load a state file's raw UTF-8 contents from the scope directory.
///
/// Refuses any filename containing a path separator, mirroring the teacher's
/// `protocol`/`agents` file-loading helpers which always operate on bare
/// filenames resolved against a known directory.
pub fn load(scope: &Path, filename: &str) -> Result<String, OrchestratorError> {
    if filename.contains('/') || filename.contains('\\') {
        return Err(OrchestratorError::PromptFileError {
            path: scope.join(filename),
            reason: "filename must not contain a path separator".into(),
        });
    }
    let path = scope.join(filename);
    std::fs::read_to_string(&path).map_err(|e| OrchestratorError::PromptFileError {
        path,
        reason: e.to_string(),
    })
}

/// Render `template` by replacing every `{{key}}` placeholder with the
/// corresponding string from `variables`. Single-pass, non-recursive: a
/// replacement value that itself contains `{{...}}` is never re-expanded.
pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let Some(start) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        let Some(end_rel) = rest[start + 2..].find("}}") else {
            out.push_str(rest);
            break;
        };
        let key = rest[start + 2..start + 2 + end_rel].trim();
        out.push_str(&rest[..start]);
        match variables.get(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end_rel + 2]),
        }
        rest = &rest[start + 2 + end_rel + 2..];
    }
    out
}

/// Build the variable bag consumed at the top of every step: the pending
/// `{{result}}` payload plus every fork attribute, each exposed as its own
/// placeholder (spec §4.3).
pub fn build_variables(
    pending_result: Option<&str>,
    fork_attributes: Option<&HashMap<String, String>>,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("result".to_string(), pending_result.unwrap_or_default().to_string());
    if let Some(attrs) = fork_attributes {
        for (k, v) in attrs {
            vars.insert(k.clone(), v.clone());
        }
    }
    vars
}
