use crate::aggregator::{AggregatedResults, ResultAggregator};
use crate::config::{BatchOptions, OrchestratorConfig};
use crate::dispatcher::{AgentDispatcher, SlotGuard};
use crate::events::{EventEmitter, HandlerId, OrchestrationEvent};
use crate::executor::TaskExecutor;
use crate::registry::AgentRegistry;
use crate::state::{OrchestrationState, StateStore};
use crate::task_queue::TaskQueue;
use crate::types::{
    Agent, AgentConfig, AgentState, AgentStatus, Assignment, FarmResult, ResultStatus, Task,
};
use agentfarm_core::{AgentfarmError, AgentfarmResult};
use chrono::Utc;
use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// The task orchestration engine.
///
/// Owns the pending queue, the assignment registry and the accumulated
/// results; borrows capacity from the [`AgentDispatcher`] and hands work to
/// the injected [`TaskExecutor`]. Per-task problems never surface as errors
/// from [`execute_task`](Self::execute_task) or
/// [`execute_batch`](Self::execute_batch); they become [`FarmResult`]s.
///
/// Locks are always taken in the order results, queue, registry.
pub struct Orchestrator {
    config: OrchestratorConfig,
    dispatcher: Arc<AgentDispatcher>,
    registry: AgentRegistry,
    queue: RwLock<TaskQueue>,
    results: RwLock<Vec<FarmResult>>,
    /// Ids of pending tasks that currently have an execution in flight.
    claimed: Mutex<HashSet<String>>,
    /// Bumped whenever queue, registry and results are replaced wholesale.
    generation: AtomicU64,
    events: EventEmitter,
    executor: Arc<dyn TaskExecutor>,
}

/// Why a pending task could not be checked out for execution.
enum Unavailable {
    Missing,
    InFlight,
}

/// A checked-out task holding its agent slot.
///
/// Dropping it before [`settle`](Self::settle) means the execution was
/// abandoned: the slot goes back, a running status becomes failed and the
/// task stays pending.
struct Flight<'a> {
    orchestrator: &'a Orchestrator,
    task_id: String,
    assignment: Assignment,
    slot: Option<SlotGuard>,
    generation: u64,
    settled: bool,
}

impl Flight<'_> {
    fn release_slot(&mut self) {
        self.slot.take();
    }

    fn settle(&mut self) {
        self.settled = true;
    }

    fn is_current(&self) -> bool {
        self.orchestrator.generation.load(Ordering::SeqCst) == self.generation
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(task_id = %self.task_id, "Execution abandoned before it settled");
            if self.is_current() {
                self.orchestrator.registry.abandon(&self.task_id);
            }
        }
        self.slot.take();
        self.orchestrator.claimed.lock().remove(&self.task_id);
    }
}

impl Orchestrator {
    /// Create an orchestrator whose fleet comes from `config.agents`.
    pub fn new(
        config: OrchestratorConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> AgentfarmResult<Self> {
        config.validate()?;
        let dispatcher =
            AgentDispatcher::with_agents(config.output_dir.clone(), config.agents.clone())?;

        info!(
            agents = config.agents.len(),
            parallel = config.parallel,
            "Orchestrator initialized"
        );

        Ok(Self {
            config,
            dispatcher: Arc::new(dispatcher),
            registry: AgentRegistry::new(),
            queue: RwLock::new(TaskQueue::new()),
            results: RwLock::new(Vec::new()),
            claimed: Mutex::new(HashSet::new()),
            generation: AtomicU64::new(0),
            events: EventEmitter::new(),
            executor,
        })
    }

    /// Create an orchestrator with the default configuration and fleet.
    pub fn with_executor(executor: Arc<dyn TaskExecutor>) -> AgentfarmResult<Self> {
        Self::new(OrchestratorConfig::default(), executor)
    }

    /// The configuration this engine was built from.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get a reference to the dispatcher.
    pub fn dispatcher(&self) -> &Arc<AgentDispatcher> {
        &self.dispatcher
    }

    /// Get a reference to the event emitter.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Add an agent to the fleet at zero load.
    pub fn register_agent(&self, config: AgentConfig) -> AgentfarmResult<()> {
        self.dispatcher.register_agent(config)
    }

    /// Remove an agent from the fleet.
    pub fn unregister_agent(&self, agent_id: &str) -> AgentfarmResult<Agent> {
        self.dispatcher.unregister_agent(agent_id)
    }

    // --- Enqueue ---

    /// Add a task to the pending queue.
    pub async fn queue_task(&self, task: Task) -> AgentfarmResult<String> {
        let task_id = self.queue.write().await.add(task)?;
        info!(task_id = %task_id, "Task queued");
        self.events.emit(&OrchestrationEvent::TaskQueued {
            task_id: task_id.clone(),
        });
        Ok(task_id)
    }

    /// Add several tasks. Nothing is queued if any id collides.
    pub async fn queue_batch(&self, tasks: Vec<Task>) -> AgentfarmResult<Vec<String>> {
        let ids = self.queue.write().await.add_all(tasks)?;
        info!(count = ids.len(), "Task batch queued");
        for task_id in &ids {
            self.events.emit(&OrchestrationEvent::TaskQueued {
                task_id: task_id.clone(),
            });
        }
        Ok(ids)
    }

    // --- Execution ---

    /// Execute one pending task with no deadline.
    ///
    /// A task that is already executing is not started again; the second
    /// caller gets a failure result.
    pub async fn execute_task(&self, task_id: &str) -> FarmResult {
        let task = match self.checkout(task_id).await {
            Ok(task) => task,
            Err(reason) => return self.unavailable(task_id, reason),
        };

        match self.take_flight(&task) {
            Some(flight) => self.run_dispatched(task, flight, None).await,
            None => self.record_blocked(&task).await,
        }
    }

    /// Execute a set of pending tasks in windows of `options.parallel`.
    ///
    /// Tasks run highest priority first. Every task in a window is dispatched
    /// before any of them is awaited, and the next window starts only after
    /// all of the current one has settled.
    pub async fn execute_batch(
        &self,
        task_ids: &[String],
        options: BatchOptions,
    ) -> AggregatedResults {
        let window_size = options.window_size();

        let mut seen = HashSet::new();
        let mut ordered: Vec<(String, Option<Task>)> = {
            let queue = self.queue.read().await;
            task_ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .map(|id| (id.clone(), queue.get(id).cloned()))
                .collect()
        };
        ordered.sort_by_key(|(_, task)| Reverse(task.as_ref().map(|t| t.priority)));

        info!(
            tasks = ordered.len(),
            parallel = window_size,
            fail_fast = options.fail_fast,
            "Batch started"
        );

        let mut aggregator = ResultAggregator::new();
        let mut halted = false;

        for (window_idx, window) in ordered.chunks(window_size).enumerate() {
            if halted {
                break;
            }

            let mut in_flight = Vec::with_capacity(window.len());
            for (task_id, _) in window {
                // Re-read so tasks finished since the batch began are not run twice.
                let task = match self.checkout(task_id).await {
                    Ok(task) => task,
                    Err(reason) => {
                        aggregator.add(self.unavailable(task_id, reason));
                        if options.fail_fast {
                            halted = true;
                            break;
                        }
                        continue;
                    }
                };

                match self.take_flight(&task) {
                    Some(flight) => {
                        in_flight.push(self.run_dispatched(task, flight, options.timeout));
                    }
                    None => aggregator.add(self.record_blocked(&task).await),
                }
            }

            let settled = join_all(in_flight).await;
            if options.fail_fast && settled.iter().any(|r| r.status == ResultStatus::Failure) {
                warn!(window = window_idx, "Batch halted after failure");
                halted = true;
            }
            aggregator.extend(settled);
        }

        let aggregated = aggregator.aggregate();
        info!(
            total = aggregated.total,
            succeeded = aggregated.succeeded,
            failed = aggregated.failed,
            blocked = aggregated.blocked,
            "Batch completed"
        );
        self.events
            .emit(&OrchestrationEvent::BatchCompleted(aggregated.clone()));
        aggregated
    }

    /// Copy a pending task out of the queue and mark it as in flight.
    async fn checkout(&self, task_id: &str) -> Result<Task, Unavailable> {
        let queue = self.queue.read().await;
        let task = queue.get(task_id).ok_or(Unavailable::Missing)?;
        if !self.claimed.lock().insert(task_id.to_string()) {
            return Err(Unavailable::InFlight);
        }
        Ok(task.clone())
    }

    /// Reserve a slot for a checked-out task. On `None` the checkout is
    /// undone and the caller reports the task as blocked.
    fn take_flight(&self, task: &Task) -> Option<Flight<'_>> {
        let generation = self.generation.load(Ordering::SeqCst);
        match self.dispatcher.claim(task) {
            Some(slot) => Some(Flight {
                orchestrator: self,
                task_id: task.task_id.clone(),
                assignment: slot.assignment().clone(),
                slot: Some(slot),
                generation,
                settled: false,
            }),
            None => {
                self.claimed.lock().remove(&task.task_id);
                None
            }
        }
    }

    /// Run a task that already holds a slot. The slot is released on every
    /// path, including when this future is dropped early.
    async fn run_dispatched(
        &self,
        task: Task,
        mut flight: Flight<'_>,
        timeout: Option<Duration>,
    ) -> FarmResult {
        let task_id = task.task_id.clone();
        let agent_id = flight.assignment.agent_id.clone();

        {
            let _results = self.results.write().await;
            if flight.is_current() {
                self.registry.start(&task_id, &flight.assignment).await;
            }
        }
        info!(task_id = %task_id, agent_id = %agent_id, task_type = %task.task_type, "Executing task");
        self.events.emit(&OrchestrationEvent::TaskStarted {
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
        });

        let start = Instant::now();
        let outcome = self.invoke_executor(&task, timeout).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        flight.release_slot();

        let result = match outcome {
            Ok(output) => {
                info!(task_id = %task_id, agent_id = %agent_id, duration_ms, "Task completed");
                FarmResult::success(&task_id, &agent_id, output, duration_ms)
            }
            Err(e) => {
                error!(task_id = %task_id, agent_id = %agent_id, error = %e, "Task failed");
                FarmResult::failure(&task_id, &agent_id, e.to_string(), duration_ms)
            }
        };

        self.record_outcome(&result, &flight).await;
        flight.settle();

        let event = match result.status {
            ResultStatus::Success => OrchestrationEvent::TaskCompleted(result.clone()),
            _ => OrchestrationEvent::TaskFailed {
                task_id,
                message: result.output.clone(),
            },
        };
        self.events.emit(&event);

        result
    }

    /// Write a settled outcome into the registry, queue and result list,
    /// unless the state it belongs to was replaced while it ran.
    async fn record_outcome(&self, result: &FarmResult, flight: &Flight<'_>) {
        let mut results = self.results.write().await;
        if !flight.is_current() {
            info!(
                task_id = %result.task_id,
                "Outcome discarded, state was replaced while the task ran"
            );
            return;
        }
        self.queue.write().await.remove(&result.task_id);
        if result.is_success() {
            self.registry.complete(&result.task_id).await;
        } else {
            self.registry.fail(&result.task_id).await;
        }
        results.push(result.clone());
    }

    async fn invoke_executor(
        &self,
        task: &Task,
        timeout: Option<Duration>,
    ) -> AgentfarmResult<String> {
        // A panicking executor must not leak the agent slot.
        let execution = AssertUnwindSafe(self.executor.execute(task))
            .catch_unwind()
            .map(|r| {
                r.unwrap_or_else(|_| {
                    Err(AgentfarmError::Execution("executor panicked".to_string()))
                })
            });

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let timeout_ms = limit.as_millis() as u64;
                    warn!(task_id = %task.task_id, timeout_ms, "Task timed out");
                    Err(AgentfarmError::Timeout { timeout_ms })
                }
            },
            None => execution.await,
        }
    }

    fn unavailable(&self, task_id: &str, reason: Unavailable) -> FarmResult {
        let error = match reason {
            Unavailable::Missing => {
                warn!(task_id = %task_id, "Task not found");
                AgentfarmError::TaskNotFound(task_id.to_string())
            }
            Unavailable::InFlight => {
                warn!(task_id = %task_id, "Task is already executing");
                AgentfarmError::Orchestrator(format!("task {task_id} is already executing"))
            }
        };
        self.events.emit(&OrchestrationEvent::TaskFailed {
            task_id: task_id.to_string(),
            message: error.to_string(),
        });
        FarmResult::failure(task_id, "", error.to_string(), 0)
    }

    async fn record_blocked(&self, task: &Task) -> FarmResult {
        let result = FarmResult::blocked(&task.task_id, task.task_type);
        warn!(task_id = %task.task_id, task_type = %task.task_type, "No agent available, task blocked");
        self.results.write().await.push(result.clone());
        self.events.emit(&OrchestrationEvent::TaskBlocked {
            task_id: task.task_id.clone(),
            task_type: task.task_type,
        });
        result
    }

    // --- Queries ---

    /// Status of the most recent assignment for `task_id`.
    pub async fn get_status(&self, task_id: &str) -> Option<AgentStatus> {
        self.registry.get(task_id).await
    }

    /// Every recorded assignment status, keyed by task id.
    pub async fn get_all_status(&self) -> HashMap<String, AgentStatus> {
        self.registry.snapshot().await
    }

    /// Pending tasks in enqueue order, including ones currently executing.
    pub async fn get_pending_tasks(&self) -> Vec<Task> {
        self.queue.read().await.all_tasks()
    }

    /// Every recorded result in completion order.
    pub async fn get_results(&self) -> Vec<FarmResult> {
        self.results.read().await.clone()
    }

    // --- Subscriptions ---

    /// Subscribe a handler to every lifecycle event.
    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&OrchestrationEvent) -> AgentfarmResult<()> + Send + Sync + 'static,
    {
        self.events.on(handler)
    }

    /// Unsubscribe a handler. Returns false if it was not subscribed.
    pub fn off(&self, id: HandlerId) -> bool {
        self.events.off(id)
    }

    // --- Reset ---

    /// Drop pending tasks, statuses and results.
    ///
    /// Agent loads are untouched so in-flight executions still return their
    /// slots; their outcomes are not recorded.
    pub async fn clear(&self) {
        let mut results = self.results.write().await;
        self.queue.write().await.clear();
        self.registry.clear().await;
        results.clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("Orchestrator state cleared");
    }

    /// Drop every recorded status, keeping tasks and results.
    pub async fn clear_statuses(&self) {
        self.registry.clear().await;
    }

    // --- Snapshot / restore ---

    /// Capture an owned copy of pending tasks, statuses and results.
    pub async fn get_state(&self) -> OrchestrationState {
        let results = self.results.read().await;
        let queue = self.queue.read().await;
        OrchestrationState {
            pending_tasks: queue.all_tasks(),
            agent_statuses: self.registry.snapshot().await,
            results: results.clone(),
            captured_at: Utc::now(),
        }
    }

    /// Replace pending tasks, statuses and results with `state`.
    ///
    /// Nothing is merged. Any status still marked running is rewritten to
    /// failed because no execution survives a restore; its task stays
    /// pending and can run again. Agent loads drop every reservation except
    /// those of executions still in flight, which keep their slots until
    /// they finish but no longer write into the restored state.
    pub async fn restore_state(&self, state: OrchestrationState) {
        let mut statuses = state.agent_statuses;
        let mut interrupted = 0usize;
        for status in statuses.values_mut() {
            if status.state == AgentState::Running {
                status.state = AgentState::Failed;
                interrupted += 1;
            }
        }

        let pending = state.pending_tasks.len();
        let mut results = self.results.write().await;
        self.queue.write().await.replace(state.pending_tasks);
        self.registry.replace(statuses).await;
        *results = state.results;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.dispatcher.reset_loads();
        drop(results);

        info!(
            pending,
            interrupted,
            captured_at = %state.captured_at,
            "Orchestrator state restored"
        );
    }

    /// Snapshot the engine into `store` under `name`.
    pub async fn save_state(&self, store: &dyn StateStore, name: &str) -> AgentfarmResult<()> {
        let state = self.get_state().await;
        store.save(name, &state).await?;
        info!(snapshot = %name, "State saved");
        Ok(())
    }

    /// Restore from `store`. Returns false if no snapshot named `name` exists.
    pub async fn load_state(&self, store: &dyn StateStore, name: &str) -> AgentfarmResult<bool> {
        match store.load(name).await? {
            Some(state) => {
                self.restore_state(state).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
