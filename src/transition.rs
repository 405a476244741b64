//! Transition parser (C1, spec §4.1).
//!
//! Recognizes the six transition tags and their attributes using the same
//! tolerant "find the tag, slice the inner text" approach as the teacher's
//! `protocol::parse::extract_tag_inner` / `transition::parse_transition`,
//! generalized from a single `<next>` tag to the full six-tag grammar and
//! from line-based `key: value` parsing to `name="value"` XML attributes.

use std::collections::HashMap;

use crate::error::OrchestratorError;

/// One of the six transition tags an agent's output may contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTransition {
    Goto {
        target: String,
    },
    Reset {
        target: String,
        cd: Option<String>,
    },
    Call {
        target: String,
        return_state: String,
    },
    Function {
        target: String,
        return_state: String,
    },
    Fork {
        target: String,
        next: String,
        cd: Option<String>,
        attributes: HashMap<String, String>,
    },
    Result {
        payload: String,
    },
}

impl ParsedTransition {
    pub fn tag_name(&self) -> &'static str {
        match self {
            ParsedTransition::Goto { .. } => "goto",
            ParsedTransition::Reset { .. } => "reset",
            ParsedTransition::Call { .. } => "call",
            ParsedTransition::Function { .. } => "function",
            ParsedTransition::Fork { .. } => "fork",
            ParsedTransition::Result { .. } => "result",
        }
    }

    /// The filename target this transition names, if any (`result` has none).
    pub fn target(&self) -> Option<&str> {
        match self {
            ParsedTransition::Goto { target }
            | ParsedTransition::Reset { target, .. }
            | ParsedTransition::Call { target, .. }
            | ParsedTransition::Function { target, .. }
            | ParsedTransition::Fork { target, .. } => Some(target),
            ParsedTransition::Result { .. } => None,
        }
    }
}

const TAGS: [&str; 6] = ["goto", "reset", "call", "function", "fork", "result"];

/// Parse every transition tag occurrence in `text`, in document order.
///
/// Tags may appear anywhere in the text; surrounding reasoning is ignored.
/// Callers decide whether the returned count is acceptable (spec: usually
/// exactly one).
pub fn parse_transitions(text: &str) -> Result<Vec<ParsedTransition>, OrchestratorError> {
    let mut occurrences: Vec<(usize, &str)> = Vec::new();
    for tag in TAGS {
        let open = format!("<{tag}");
        let mut search_from = 0;
        while let Some(rel) = text[search_from..].find(&open) {
            let idx = search_from + rel;
            // Ensure this is a genuine tag start (`<goto` followed by `>` or whitespace),
            // not a prefix match like `<gotox>`.
            let after = &text[idx + open.len()..];
            if after.starts_with('>') || after.starts_with(' ') || after.starts_with('\t') {
                occurrences.push((idx, tag));
            }
            search_from = idx + open.len();
        }
    }
    occurrences.sort_by_key(|(idx, _)| *idx);

    let mut transitions = Vec::with_capacity(occurrences.len());
    for (idx, tag) in occurrences {
        transitions.push(parse_one(text, idx, tag)?);
    }
    Ok(transitions)
}

fn parse_one(
    text: &str,
    start: usize,
    tag: &str,
) -> Result<ParsedTransition, OrchestratorError> {
    let rest = &text[start..];
    let open_end = rest.find('>').ok_or_else(|| OrchestratorError::TransitionParseError {
        reason: format!("unclosed opening tag for <{tag}>"),
    })?;
    let attr_text = &rest[1 + tag.len()..open_end];
    let attrs = parse_attributes(attr_text);

    let close = format!("</{tag}>");
    let body_start = start + open_end + 1;
    let after_open = &text[body_start..];
    let close_rel = after_open.find(&close).ok_or_else(|| {
        OrchestratorError::TransitionParseError {
            reason: format!("no closing </{tag}> found"),
        }
    })?;
    let raw_inner = &after_open[..close_rel];

    if tag == "result" {
        return Ok(ParsedTransition::Result {
            payload: raw_inner.to_string(),
        });
    }

    let inner = raw_inner.trim().to_string();
    check_target_safety(&inner)?;

    match tag {
        "goto" => Ok(ParsedTransition::Goto { target: inner }),
        "reset" => Ok(ParsedTransition::Reset {
            target: inner,
            cd: attrs.get("cd").cloned(),
        }),
        "call" => {
            let return_state = attrs
                .get("return")
                .ok_or_else(|| OrchestratorError::TransitionParseError {
                    reason: "<call> is missing required `return` attribute".into(),
                })?
                .clone();
            Ok(ParsedTransition::Call {
                target: inner,
                return_state,
            })
        }
        "function" => {
            let return_state = attrs
                .get("return")
                .ok_or_else(|| OrchestratorError::TransitionParseError {
                    reason: "<function> is missing required `return` attribute".into(),
                })?
                .clone();
            Ok(ParsedTransition::Function {
                target: inner,
                return_state,
            })
        }
        "fork" => {
            let next = attrs
                .get("next")
                .ok_or_else(|| OrchestratorError::TransitionParseError {
                    reason: "<fork> is missing required `next` attribute".into(),
                })?
                .clone();
            check_target_safety(&next)?;
            let cd = attrs.get("cd").cloned();
            let mut attributes = attrs;
            attributes.remove("next");
            attributes.remove("cd");
            Ok(ParsedTransition::Fork {
                target: inner,
                next,
                cd,
                attributes,
            })
        }
        _ => unreachable!("TAGS is exhaustive"),
    }
}

/// Path-safety rule (spec §4.1): no `/`, no `\`, no `..` in a state-naming target.
fn check_target_safety(target: &str) -> Result<(), OrchestratorError> {
    if target.contains('/') || target.contains('\\') || target.contains("..") {
        return Err(OrchestratorError::TransitionTargetUnsafe {
            target: target.to_string(),
        });
    }
    Ok(())
}

/// Parse a tolerant `name="value"` attribute list from opening-tag text.
fn parse_attributes(text: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut rest = text;
    loop {
        let Some(eq_rel) = rest.find('=') else { break };
        let name = rest[..eq_rel].trim();
        if name.is_empty() {
            break;
        }
        let after_eq = rest[eq_rel + 1..].trim_start();
        let Some(value_str) = after_eq.strip_prefix('"') else {
            break;
        };
        let Some(end_quote) = value_str.find('"') else {
            break;
        };
        attrs.insert(name.to_string(), value_str[..end_quote].to_string());
        rest = &value_str[end_quote + 1..];
    }
    attrs
}
