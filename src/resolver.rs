//! State resolver (C4, spec §4.4).
//!
//! Maps an abstract state name to a concrete file in the scope directory,
//! applying platform-aware extension search. Grounded in the teacher's
//! `agents::load_agents` directory-scan style, generalized from "glob `*.md`"
//! to "try a short, ordered candidate list and require exactly one hit."

use std::path::{Path, PathBuf};

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Llm,
    Script,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedState {
    pub path: PathBuf,
    pub kind: StateKind,
}

fn native_script_ext() -> &'static str {
    if cfg!(windows) { "bat" } else { "sh" }
}

/// Resolve `name` against `scope`, applying the extension-search rules.
pub fn resolve(scope: &Path, name: &str) -> Result<ResolvedState, OrchestratorError> {
    if let Some(ext) = explicit_extension(name) {
        let kind = match ext {
            "md" => StateKind::Llm,
            "sh" if !cfg!(windows) => StateKind::Script,
            "bat" if cfg!(windows) => StateKind::Script,
            "sh" | "bat" => {
                return Err(OrchestratorError::ResolutionNotFound {
                    name: format!("{name} (foreign-platform script extension)"),
                });
            }
            _ => {
                return Err(OrchestratorError::ResolutionNotFound {
                    name: format!("{name} (unrecognized extension)"),
                });
            }
        };
        let path = scope.join(name);
        if !path.is_file() {
            return Err(OrchestratorError::ResolutionNotFound { name: name.to_string() });
        }
        return Ok(ResolvedState { path, kind });
    }

    let candidates = [
        (format!("{name}.md"), StateKind::Llm),
        (format!("{name}.{}", native_script_ext()), StateKind::Script),
    ];

    let mut found: Vec<ResolvedState> = Vec::new();
    for (filename, kind) in &candidates {
        let path = scope.join(filename);
        if path.is_file() {
            found.push(ResolvedState { path, kind: *kind });
        }
    }

    match found.len() {
        0 => Err(OrchestratorError::ResolutionNotFound { name: name.to_string() }),
        1 => Ok(found.into_iter().next().unwrap()),
        _ => Err(OrchestratorError::ResolutionAmbiguous {
            name: name.to_string(),
            candidates: found.into_iter().map(|r| r.path).collect(),
        }),
    }
}

fn explicit_extension(name: &str) -> Option<&str> {
    let ext = Path::new(name).extension()?.to_str()?;
    if matches!(ext, "md" | "sh" | "bat") {
        Some(ext)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn resolves_md_without_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("A.md"), "body").unwrap();
        let resolved = resolve(dir.path(), "A").unwrap();
        assert_eq!(resolved.kind, StateKind::Llm);
        assert_eq!(resolved.path, dir.path().join("A.md"));
    }

    #[test]
    fn resolves_native_script_without_extension() {
        let dir = TempDir::new().unwrap();
        let ext = native_script_ext();
        fs::write(dir.path().join(format!("build.{ext}")), "echo hi").unwrap();
        let resolved = resolve(dir.path(), "build").unwrap();
        assert_eq!(resolved.kind, StateKind::Script);
    }

    #[test]
    fn not_found_is_error() {
        let dir = TempDir::new().unwrap();
        let err = resolve(dir.path(), "missing").unwrap_err();
        assert!(matches!(err, OrchestratorError::ResolutionNotFound { .. }));
    }

    #[test]
    fn ambiguous_when_both_exist() {
        let dir = TempDir::new().unwrap();
        let ext = native_script_ext();
        fs::write(dir.path().join("A.md"), "body").unwrap();
        fs::write(dir.path().join(format!("A.{ext}")), "echo hi").unwrap();
        let err = resolve(dir.path(), "A").unwrap_err();
        assert!(matches!(err, OrchestratorError::ResolutionAmbiguous { .. }));
    }

    #[test]
    fn explicit_extension_skips_search() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("A.md"), "body").unwrap();
        let resolved = resolve(dir.path(), "A.md").unwrap();
        assert_eq!(resolved.kind, StateKind::Llm);
    }

    #[test]
    fn explicit_extension_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let err = resolve(dir.path(), "A.md").unwrap_err();
        assert!(matches!(err, OrchestratorError::ResolutionNotFound { .. }));
    }

    #[test]
    fn foreign_platform_explicit_extension_errors() {
        let dir = TempDir::new().unwrap();
        let foreign = if cfg!(windows) { "build.sh" } else { "build.bat" };
        fs::write(dir.path().join(foreign), "echo hi").unwrap();
        let err = resolve(dir.path(), foreign).unwrap_err();
        assert!(matches!(err, OrchestratorError::ResolutionNotFound { .. }));
    }

    #[test]
    fn resolve_is_pure_function_of_fileset() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("A.md"), "body").unwrap();
        let first = resolve(dir.path(), "A").unwrap();
        let second = resolve(dir.path(), "A").unwrap();
        assert_eq!(first, second);
    }
}
