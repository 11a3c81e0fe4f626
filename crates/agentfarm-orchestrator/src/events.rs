use crate::aggregator::AggregatedResults;
use crate::types::{FarmResult, TaskType};
use agentfarm_core::AgentfarmResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Lifecycle events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// A task entered the pending queue.
    TaskQueued { task_id: String },
    /// A task was dispatched and handed to the executor.
    TaskStarted { task_id: String, agent_id: String },
    /// Execution finished successfully.
    TaskCompleted(FarmResult),
    /// Execution failed or timed out, or the task was unknown or already running.
    TaskFailed { task_id: String, message: String },
    /// No agent had capacity for the task.
    TaskBlocked { task_id: String, task_type: TaskType },
    /// Every window of a batch has settled.
    BatchCompleted(AggregatedResults),
}

/// Receives orchestration events.
///
/// Handlers run synchronously on the emitting task. Errors and panics are
/// logged and never reach the orchestrator.
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &OrchestrationEvent) -> AgentfarmResult<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&OrchestrationEvent) -> AgentfarmResult<()> + Send + Sync,
{
    fn on_event(&self, event: &OrchestrationEvent) -> AgentfarmResult<()> {
        self(event)
    }
}

/// Opaque token returned by [`EventEmitter::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Fan-out of events to subscribers in registration order.
pub struct EventEmitter {
    handlers: RwLock<Vec<(HandlerId, Arc<dyn EventHandler>)>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    /// Create an emitter with no subscribers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a closure.
    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&OrchestrationEvent) -> AgentfarmResult<()> + Send + Sync + 'static,
    {
        self.on_handler(Arc::new(handler))
    }

    /// Subscribe a shared [`EventHandler`] implementation.
    pub fn on_handler(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    /// Unsubscribe. Returns false if the handler was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Number of current subscribers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Deliver `event` to every current subscriber.
    pub fn emit(&self, event: &OrchestrationEvent) {
        // Handlers may subscribe or unsubscribe from inside a callback.
        let handlers: Vec<_> = self.handlers.read().clone();

        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(handler = id.0, error = %e, "Event handler returned an error");
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(handler = id.0, reason = %reason, "Event handler panicked");
                }
            }
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentfarm_core::AgentfarmError;
    use parking_lot::Mutex;

    fn queued(id: &str) -> OrchestrationEvent {
        OrchestrationEvent::TaskQueued {
            task_id: id.to_string(),
        }
    }

    #[test]
    fn test_delivers_in_registration_order() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = log.clone();
            emitter.on(move |_: &OrchestrationEvent| {
                log.lock().push(name);
                Ok(())
            });
        }

        emitter.emit(&queued("t1"));
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_off_removes_handler() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = emitter.on(move |_: &OrchestrationEvent| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        emitter.emit(&queued("t1"));
        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        emitter.emit(&queued("t2"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.handler_count(), 0);
    }

    #[test]
    fn test_failing_handlers_do_not_stop_delivery() {
        let emitter = EventEmitter::new();
        emitter.on(|_: &OrchestrationEvent| -> AgentfarmResult<()> {
            panic!("handler exploded")
        });
        emitter.on(|_: &OrchestrationEvent| Err(AgentfarmError::Handler("refused".into())));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        emitter.on(move |event: &OrchestrationEvent| {
            s.lock().push(event.clone());
            Ok(())
        });

        emitter.emit(&queued("t1"));
        assert_eq!(*seen.lock(), vec![queued("t1")]);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = OrchestrationEvent::TaskStarted {
            task_id: "t1".into(),
            agent_id: "coder".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_started");
        assert_eq!(json["agent_id"], "coder");
    }
}
