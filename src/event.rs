//! Event bus (C6, spec §4.6).
//!
//! A typed, synchronous publish/subscribe structure. Grounded in the
//! teacher's single `AppEvent` enum (`event::AppEvent`) consumed by one
//! renderer; generalized here to a closed sum of workflow-lifecycle variants
//! with multiple independent subscribers (debug/console/title observers),
//! each isolated from the others' failures per spec §4.6 and §4.10.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::resolver::StateKind;

/// A point in (logical) time. The core never calls `Instant::now()` inside
/// deterministic logic; callers stamp events with whatever clock they use.
pub type Timestamp = u64;

#[derive(Debug, Clone)]
pub enum Event {
    WorkflowStarted { workflow_id: String, at: Timestamp },
    WorkflowCompleted { workflow_id: String, at: Timestamp },
    WorkflowPaused { workflow_id: String, at: Timestamp },

    StateStarted {
        agent_id: String,
        state: String,
        kind: StateKind,
        session: Option<String>,
        at: Timestamp,
    },
    StateCompleted {
        agent_id: String,
        state: String,
        kind: StateKind,
        session: Option<String>,
        cost_delta: f64,
        cumulative_cost: f64,
        duration_ms: u64,
        at: Timestamp,
    },

    TransitionOccurred {
        agent_id: String,
        from: String,
        to: Option<String>,
        tag: String,
        payload: Option<String>,
        spawned_child: Option<String>,
        at: Timestamp,
    },

    AgentSpawned { parent: String, child: String, initial_state: String, at: Timestamp },
    AgentTerminated { agent_id: String, at: Timestamp },

    LlmStreamChunk { agent_id: String, raw: String, at: Timestamp },
    LlmInvocationStarted {
        agent_id: String,
        session: Option<String>,
        is_reminder_retry: bool,
        attempt: u32,
        at: Timestamp,
    },

    ScriptOutput {
        agent_id: String,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        duration_ms: u64,
        at: Timestamp,
    },

    ToolInvocation { agent_id: String, tool_name: String, at: Timestamp },
    ToolError { agent_id: String, tool_name: String, message: String, at: Timestamp },
    ProgressMessage { agent_id: String, text: String, at: Timestamp },

    ErrorOccurred {
        agent_id: String,
        kind: String,
        retryable: bool,
        attempt: u32,
        message: String,
        at: Timestamp,
    },
}

/// An event handler. Boxed so the bus can hold a heterogeneous list of
/// closures and struct-backed observers behind one trait object.
pub trait Handler: Send + Sync {
    fn handle(&self, event: &Event);
}

impl<F: Fn(&Event) + Send + Sync> Handler for F {
    fn handle(&self, event: &Event) {
        self(event);
    }
}

/// A token returned by `subscribe`, used to detach a handler later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Synchronous pub/sub bus. `emit` calls every registered handler in
/// registration order; a handler that panics is caught so it can never take
/// down the publisher (spec §4.6, testable property #6).
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<Vec<(HandlerId, Arc<dyn Handler>)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Attach `handler`; returns a `HandlerId` that `unsubscribe` accepts.
    pub fn subscribe(&self, handler: Arc<dyn Handler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().expect("event bus mutex poisoned").push((id, handler));
        id
    }

    /// Detach the handler previously returned by `subscribe`. No-op if the
    /// id is unknown or was already removed.
    pub fn unsubscribe(&self, id: HandlerId) {
        self.handlers.lock().expect("event bus mutex poisoned").retain(|(h, _)| *h != id);
    }

    pub fn emit(&self, event: &Event) {
        let handlers = self.handlers.lock().expect("event bus mutex poisoned").clone();
        for (_, handler) in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler.handle(event);
            }));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "observer panicked".to_string());
                tracing::warn!(observer_error = %message, "event bus handler failed; isolating");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_calls_all_handlers_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.subscribe(Arc::new(move |_: &Event| o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        bus.subscribe(Arc::new(move |_: &Event| o2.lock().unwrap().push(2)));

        bus.emit(&Event::WorkflowStarted { workflow_id: "wf".into(), at: 0 });

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(|_: &Event| panic!("boom")));
        let c = calls.clone();
        bus.subscribe(Arc::new(move |_: &Event| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&Event::WorkflowStarted { workflow_id: "wf".into(), at: 0 });
        bus.emit(&Event::WorkflowCompleted { workflow_id: "wf".into(), at: 1 });

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_handlers_is_fine() {
        let bus = EventBus::new();
        bus.emit(&Event::WorkflowStarted { workflow_id: "wf".into(), at: 0 });
    }

    #[test]
    fn unsubscribe_detaches_handler() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = bus.subscribe(Arc::new(move |_: &Event| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&Event::WorkflowStarted { workflow_id: "wf".into(), at: 0 });
        bus.unsubscribe(id);
        bus.emit(&Event::WorkflowStarted { workflow_id: "wf".into(), at: 1 });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
