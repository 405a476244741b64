//! Policy layer (C2, spec §4.2).
//!
//! State files may begin with a YAML frontmatter block; the core interprets
//! `allowed_transitions`, `model`, and `effort`. Frontmatter parsing follows
//! the same `---`-delimited convention and `serde_yaml` deserialization the
//! teacher uses for agent definitions (`agents::parse_agent_file`), just with
//! a different schema.

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::transition::ParsedTransition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedTransition {
    pub tag: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub r#return: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub allowed_transitions: Vec<AllowedTransition>,
    pub model: Option<String>,
    pub effort: Option<String>,
}

impl Policy {
    /// Whether this state carries no policy at all (no frontmatter).
    pub fn is_empty(&self) -> bool {
        self.allowed_transitions.is_empty() && self.model.is_none() && self.effort.is_none()
    }
}

/// Split a state file's contents into its frontmatter (if any) and body.
pub fn split_frontmatter(contents: &str) -> Result<(Policy, String), OrchestratorError> {
    let trimmed = contents.trim_start();
    if !trimmed.starts_with("---") {
        return Ok((Policy::default(), contents.to_string()));
    }

    let after_first = &trimmed[3..];
    let after_first = after_first.strip_prefix('\n').unwrap_or(after_first);
    let Some(end_idx) = after_first.find("\n---") else {
        return Err(OrchestratorError::PromptFileError {
            path: Default::default(),
            reason: "frontmatter missing closing `---` delimiter".into(),
        });
    };
    let yaml_str = &after_first[..end_idx];
    let rest = &after_first[end_idx + 4..];
    let body = rest.strip_prefix('\n').unwrap_or(rest).to_string();

    let policy: Policy = serde_yaml::from_str(yaml_str).map_err(|e| {
        OrchestratorError::PromptFileError {
            path: Default::default(),
            reason: format!("failed to parse frontmatter YAML: {e}"),
        }
    })?;

    Ok((policy, body))
}

/// Outcome of matching a transition (or lack thereof) against policy.
pub enum PolicyDecision {
    /// A single transition matched an explicit policy entry, or there was no
    /// policy to violate.
    Valid(ParsedTransition),
    /// Zero transitions were emitted and exactly one non-`result` entry with
    /// fully specified attributes exists — use it implicitly.
    Implicit(ParsedTransition),
    /// The emitted transition(s) do not satisfy policy; retryable via reminder
    /// only if a policy exists.
    Violation { reason: String, has_policy: bool },
}

/// Decide how to treat the transitions parsed from one step's output.
pub fn decide(policy: &Policy, transitions: Vec<ParsedTransition>) -> PolicyDecision {
    if policy.is_empty() {
        return match transitions.len() {
            1 => PolicyDecision::Valid(transitions.into_iter().next().unwrap()),
            0 => PolicyDecision::Violation {
                reason: "no transition emitted and no policy declared".into(),
                has_policy: false,
            },
            _ => PolicyDecision::Violation {
                reason: "multiple transitions emitted and no policy declared".into(),
                has_policy: false,
            },
        };
    }

    match transitions.len() {
        0 => {
            let implicit_candidates: Vec<&AllowedTransition> = policy
                .allowed_transitions
                .iter()
                .filter(|entry| {
                    entry.tag != "result"
                        && entry.target.is_some()
                        && match entry.tag.as_str() {
                            "call" | "function" => entry.r#return.is_some(),
                            "fork" => entry.next.is_some(),
                            _ => true,
                        }
                })
                .collect();
            if implicit_candidates.len() == 1 {
                let entry = implicit_candidates[0];
                if let Some(transition) = materialize(entry) {
                    return PolicyDecision::Implicit(transition);
                }
            }
            PolicyDecision::Violation {
                reason: "no transition emitted and no unambiguous implicit transition".into(),
                has_policy: true,
            }
        }
        1 => {
            let transition = transitions.into_iter().next().unwrap();
            if matches_policy(policy, &transition) {
                PolicyDecision::Valid(transition)
            } else {
                PolicyDecision::Violation {
                    reason: format!(
                        "emitted <{}> transition is not in this state's allowed_transitions",
                        transition.tag_name()
                    ),
                    has_policy: true,
                }
            }
        }
        _ => PolicyDecision::Violation {
            reason: format!("{} transitions emitted; exactly one is required", transitions.len()),
            has_policy: true,
        },
    }
}

fn materialize(entry: &AllowedTransition) -> Option<ParsedTransition> {
    let target = entry.target.clone()?;
    match entry.tag.as_str() {
        "goto" => Some(ParsedTransition::Goto { target }),
        "reset" => Some(ParsedTransition::Reset { target, cd: None }),
        "call" => Some(ParsedTransition::Call {
            target,
            return_state: entry.r#return.clone()?,
        }),
        "function" => Some(ParsedTransition::Function {
            target,
            return_state: entry.r#return.clone()?,
        }),
        "fork" => Some(ParsedTransition::Fork {
            target,
            next: entry.next.clone()?,
            cd: None,
            attributes: Default::default(),
        }),
        _ => None,
    }
}

fn matches_policy(policy: &Policy, transition: &ParsedTransition) -> bool {
    policy.allowed_transitions.iter().any(|entry| {
        if entry.tag != transition.tag_name() {
            return false;
        }
        match transition {
            ParsedTransition::Result { .. } => true,
            ParsedTransition::Goto { target } | ParsedTransition::Reset { target, .. } => {
                entry.target.as_deref().is_none_or(|t| t == target)
            }
            ParsedTransition::Call { target, return_state }
            | ParsedTransition::Function { target, return_state } => {
                entry.target.as_deref().is_none_or(|t| t == target)
                    && entry.r#return.as_deref().is_none_or(|r| r == return_state)
            }
            ParsedTransition::Fork { target, next, .. } => {
                entry.target.as_deref().is_none_or(|t| t == target)
                    && entry.next.as_deref().is_none_or(|n| n == next)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_frontmatter_returns_empty_policy() {
        let (policy, body) = split_frontmatter("just a prompt body").unwrap();
        assert!(policy.is_empty());
        assert_eq!(body, "just a prompt body");
    }

    #[test]
    fn parses_allowed_transitions() {
        let contents = "---\nallowed_transitions:\n  - tag: goto\n    target: NEXT.md\n  - tag: result\nmodel: opus\n---\nBody text.";
        let (policy, body) = split_frontmatter(contents).unwrap();
        assert_eq!(policy.allowed_transitions.len(), 2);
        assert_eq!(policy.model.as_deref(), Some("opus"));
        assert_eq!(body, "Body text.");
    }

    #[test]
    fn missing_closing_delimiter_errors() {
        let err = split_frontmatter("---\nmodel: opus\nBody").unwrap_err();
        assert!(matches!(err, OrchestratorError::PromptFileError { .. }));
    }

    #[test]
    fn no_policy_requires_exactly_one_transition() {
        let policy = Policy::default();
        let decision = decide(&policy, vec![]);
        assert!(matches!(decision, PolicyDecision::Violation { has_policy: false, .. }));
    }

    #[test]
    fn no_policy_valid_single_transition() {
        let policy = Policy::default();
        let t = ParsedTransition::Goto { target: "A.md".into() };
        let decision = decide(&policy, vec![t.clone()]);
        assert!(matches!(decision, PolicyDecision::Valid(got) if got == t));
    }

    #[test]
    fn implicit_transition_used_when_unambiguous() {
        let policy = Policy {
            allowed_transitions: vec![
                AllowedTransition {
                    tag: "goto".into(),
                    target: Some("NEXT.md".into()),
                    r#return: None,
                    next: None,
                },
                AllowedTransition {
                    tag: "result".into(),
                    target: None,
                    r#return: None,
                    next: None,
                },
            ],
            model: None,
            effort: None,
        };
        let decision = decide(&policy, vec![]);
        match decision {
            PolicyDecision::Implicit(ParsedTransition::Goto { target }) => {
                assert_eq!(target, "NEXT.md");
            }
            _ => panic!("expected implicit goto"),
        }
    }

    #[test]
    fn ambiguous_zero_emission_is_violation() {
        let policy = Policy {
            allowed_transitions: vec![
                AllowedTransition {
                    tag: "goto".into(),
                    target: Some("A.md".into()),
                    r#return: None,
                    next: None,
                },
                AllowedTransition {
                    tag: "goto".into(),
                    target: Some("B.md".into()),
                    r#return: None,
                    next: None,
                },
            ],
            model: None,
            effort: None,
        };
        let decision = decide(&policy, vec![]);
        assert!(matches!(decision, PolicyDecision::Violation { has_policy: true, .. }));
    }

    #[test]
    fn multiple_emitted_is_ambiguous() {
        let policy = Policy {
            allowed_transitions: vec![AllowedTransition {
                tag: "goto".into(),
                target: None,
                r#return: None,
                next: None,
            }],
            model: None,
            effort: None,
        };
        let decision = decide(
            &policy,
            vec![
                ParsedTransition::Goto { target: "A.md".into() },
                ParsedTransition::Goto { target: "B.md".into() },
            ],
        );
        assert!(matches!(decision, PolicyDecision::Violation { .. }));
    }

    #[test]
    fn transition_not_matching_any_entry_is_violation() {
        let policy = Policy {
            allowed_transitions: vec![AllowedTransition {
                tag: "result".into(),
                target: None,
                r#return: None,
                next: None,
            }],
            model: None,
            effort: None,
        };
        let decision = decide(&policy, vec![ParsedTransition::Goto { target: "A.md".into() }]);
        assert!(matches!(decision, PolicyDecision::Violation { has_policy: true, .. }));
    }

    #[test]
    fn implicit_skips_candidates_missing_required_attributes() {
        let policy = Policy {
            allowed_transitions: vec![
                AllowedTransition {
                    tag: "call".into(),
                    target: Some("CHILD.md".into()),
                    r#return: None,
                    next: None,
                },
                AllowedTransition {
                    tag: "goto".into(),
                    target: Some("NEXT.md".into()),
                    r#return: None,
                    next: None,
                },
                AllowedTransition {
                    tag: "result".into(),
                    target: None,
                    r#return: None,
                    next: None,
                },
            ],
            model: None,
            effort: None,
        };
        let decision = decide(&policy, vec![]);
        match decision {
            PolicyDecision::Implicit(ParsedTransition::Goto { target }) => {
                assert_eq!(target, "NEXT.md");
            }
            _ => panic!("expected the fully-specified goto to be used implicitly, not a violation"),
        }
    }

    #[test]
    fn result_always_matches_result_entry() {
        let policy = Policy {
            allowed_transitions: vec![AllowedTransition {
                tag: "result".into(),
                target: None,
                r#return: None,
                next: None,
            }],
            model: None,
            effort: None,
        };
        let decision = decide(&policy, vec![ParsedTransition::Result { payload: "ok".into() }]);
        assert!(matches!(decision, PolicyDecision::Valid(ParsedTransition::Result { .. })));
    }
}
