//! Transition applicator (C9, spec §4.9).
//!
//! Mutates the workflow document according to a validated, resolved
//! transition. Every mutation produces new owned values — no aliasing
//! through the return stack or agent list — matching the copy-on-write
//! discipline spec §5 calls for and the teacher's preference for cloning a
//! `SessionState` over sharing it through `Rc`/`Arc`.

use std::path::PathBuf;

use crate::event::{Event, EventBus, Timestamp};
use crate::model::{Agent, ReturnFrame, Workflow};
use crate::transition::ParsedTransition;

/// Derive a short, stable abbreviation for a fork child id from its initial
/// state's filename stem (e.g. `WORKER.md` → `wor`).
fn state_abbrev(state: &str) -> String {
    let stem = std::path::Path::new(state)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(state);
    stem.chars().take(3).collect::<String>().to_lowercase()
}

/// Apply `transition` (already resolved and policy-validated) to the agent
/// identified by `agent_id`, mutating `workflow` in place.
pub fn apply(
    workflow: &mut Workflow,
    agent_id: &str,
    transition: ParsedTransition,
    new_session: Option<String>,
    bus: &EventBus,
    now: impl Fn() -> Timestamp,
) {
    let from_state = workflow
        .agent_mut(agent_id)
        .map(|a| a.current_state.clone())
        .unwrap_or_default();

    let mut spawned_child = None;
    let mut to_state = None;
    let mut payload = None;
    let tag = transition.tag_name().to_string();

    match transition {
        ParsedTransition::Goto { target } => {
            if let Some(agent) = workflow.agent_mut(agent_id) {
                agent.current_state = target.clone();
                agent.session_id = new_session;
            }
            to_state = Some(target);
        }
        ParsedTransition::Reset { target, cd } => {
            if let Some(agent) = workflow.agent_mut(agent_id) {
                if !agent.stack.is_empty() {
                    tracing::warn!(agent_id, "reset with a non-empty return stack; discarding it");
                }
                agent.stack.clear();
                agent.current_state = target.clone();
                agent.session_id = None;
                agent.retry_count = 0;
                if let Some(cd) = cd {
                    agent.cwd = Some(PathBuf::from(cd));
                }
            }
            to_state = Some(target);
        }
        ParsedTransition::Call { target, return_state } => {
            if let Some(agent) = workflow.agent_mut(agent_id) {
                agent.stack.push(ReturnFrame {
                    session: new_session.clone(),
                    state: return_state,
                    cwd: agent.cwd.clone(),
                });
                agent.current_state = target.clone();
                agent.session_id = new_session;
            }
            to_state = Some(target);
        }
        ParsedTransition::Function { target, return_state } => {
            if let Some(agent) = workflow.agent_mut(agent_id) {
                agent.stack.push(ReturnFrame {
                    session: new_session,
                    state: return_state,
                    cwd: agent.cwd.clone(),
                });
                agent.current_state = target.clone();
                agent.session_id = None;
            }
            to_state = Some(target);
        }
        ParsedTransition::Fork { target, next, cd, attributes } => {
            let parent_cwd = workflow.agent_mut(agent_id).and_then(|a| a.cwd.clone());
            let child_cwd = cd.map(PathBuf::from).or(parent_cwd);
            let abbrev = state_abbrev(&target);
            let child_id = workflow.next_fork_id(agent_id, &abbrev);
            let child = Agent::spawned(child_id.clone(), target.clone(), child_cwd, attributes);
            workflow.agents.push(child);

            if let Some(agent) = workflow.agent_mut(agent_id) {
                agent.current_state = next.clone();
                agent.session_id = new_session;
            }
            to_state = Some(next);
            spawned_child = Some(child_id.clone());
            bus.emit(&Event::AgentSpawned {
                parent: agent_id.to_string(),
                child: child_id,
                initial_state: target,
                at: now(),
            });
        }
        ParsedTransition::Result { payload: result_payload } => {
            let popped = workflow.agent_mut(agent_id).and_then(|a| a.stack.pop());
            match popped {
                None => {
                    workflow.remove_agent(agent_id);
                    bus.emit(&Event::AgentTerminated {
                        agent_id: agent_id.to_string(),
                        at: now(),
                    });
                }
                Some(frame) => {
                    if let Some(agent) = workflow.agent_mut(agent_id) {
                        agent.current_state = frame.state.clone();
                        agent.pending_result = Some(result_payload.clone());
                        agent.session_id = frame.session;
                        agent.cwd = frame.cwd;
                    }
                    to_state = Some(frame.state);
                }
            }
            payload = Some(result_payload);
        }
    }

    bus.emit(&Event::TransitionOccurred {
        agent_id: agent_id.to_string(),
        from: from_state,
        to: to_state,
        tag,
        payload,
        spawned_child,
        at: now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf as StdPathBuf;

    fn wf() -> Workflow {
        Workflow::new("wf1", StdPathBuf::from("/scope"), 10.0, "A.md")
    }

    #[test]
    fn goto_updates_state_and_session() {
        let mut w = wf();
        apply(&mut w, "main", ParsedTransition::Goto { target: "B.md".into() }, Some("s1".into()), &EventBus::new(), || 0);
        let agent = w.agent_mut("main").unwrap();
        assert_eq!(agent.current_state, "B.md");
        assert_eq!(agent.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn reset_clears_stack_and_session() {
        let mut w = wf();
        w.agent_mut("main").unwrap().stack.push(ReturnFrame {
            session: Some("old".into()),
            state: "X.md".into(),
            cwd: None,
        });
        apply(
            &mut w,
            "main",
            ParsedTransition::Reset { target: "A.md".into(), cd: Some("/work".into()) },
            Some("ignored".into()),
            &EventBus::new(),
            || 0,
        );
        let agent = w.agent_mut("main").unwrap();
        assert!(agent.stack.is_empty());
        assert!(agent.session_id.is_none());
        assert_eq!(agent.cwd, Some(StdPathBuf::from("/work")));
    }

    #[test]
    fn call_pushes_return_frame() {
        let mut w = wf();
        apply(
            &mut w,
            "main",
            ParsedTransition::Call { target: "CHILD.md".into(), return_state: "SUM.md".into() },
            Some("s1".into()),
            &EventBus::new(),
            || 0,
        );
        let agent = w.agent_mut("main").unwrap();
        assert_eq!(agent.current_state, "CHILD.md");
        assert_eq!(agent.stack.len(), 1);
        assert_eq!(agent.stack[0].state, "SUM.md");
        assert_eq!(agent.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn function_starts_fresh_session() {
        let mut w = wf();
        apply(
            &mut w,
            "main",
            ParsedTransition::Function { target: "CHILD.md".into(), return_state: "SUM.md".into() },
            Some("s1".into()),
            &EventBus::new(),
            || 0,
        );
        let agent = w.agent_mut("main").unwrap();
        assert!(agent.session_id.is_none());
        assert_eq!(agent.stack[0].session.as_deref(), Some("s1"));
    }

    #[test]
    fn fork_spawns_child_and_parent_continues() {
        let mut w = wf();
        let mut attrs = HashMap::new();
        attrs.insert("item".to_string(), "alpha".to_string());
        apply(
            &mut w,
            "main",
            ParsedTransition::Fork {
                target: "WORKER.md".into(),
                next: "DISPATCH.md".into(),
                cd: None,
                attributes: attrs,
            },
            Some("s1".into()),
            &EventBus::new(),
            || 0,
        );
        assert_eq!(w.agents.len(), 2);
        let parent = w.agent_mut("main").unwrap();
        assert_eq!(parent.current_state, "DISPATCH.md");
        let child = w.agents.iter().find(|a| a.id != "main").unwrap();
        assert_eq!(child.current_state, "WORKER.md");
        assert_eq!(child.fork_attributes.as_ref().unwrap().get("item"), Some(&"alpha".to_string()));
    }

    #[test]
    fn result_with_empty_stack_terminates_agent() {
        let mut w = wf();
        apply(&mut w, "main", ParsedTransition::Result { payload: "done".into() }, None, &EventBus::new(), || 0);
        assert!(w.is_terminated());
    }

    #[test]
    fn result_with_nonempty_stack_returns_to_caller() {
        let mut w = wf();
        w.agent_mut("main").unwrap().stack.push(ReturnFrame {
            session: Some("caller-sess".into()),
            state: "CALLER.md".into(),
            cwd: Some(StdPathBuf::from("/caller")),
        });
        apply(&mut w, "main", ParsedTransition::Result { payload: "42".into() }, Some("child-sess".into()), &EventBus::new(), || 0);
        let agent = w.agent_mut("main").unwrap();
        assert_eq!(agent.current_state, "CALLER.md");
        assert_eq!(agent.pending_result.as_deref(), Some("42"));
        assert_eq!(agent.session_id.as_deref(), Some("caller-sess"));
        assert_eq!(agent.cwd, Some(StdPathBuf::from("/caller")));
        assert!(!w.is_terminated());
    }

    #[test]
    fn fork_ids_use_state_abbreviation() {
        let mut w = wf();
        apply(
            &mut w,
            "main",
            ParsedTransition::Fork {
                target: "WORKER.md".into(),
                next: "DISPATCH.md".into(),
                cd: None,
                attributes: HashMap::new(),
            },
            None,
            &EventBus::new(),
            || 0,
        );
        let child = w.agents.iter().find(|a| a.id != "main").unwrap();
        assert_eq!(child.id, "main_wor0");
    }
}
