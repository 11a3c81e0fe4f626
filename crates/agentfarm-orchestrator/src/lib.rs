//! Multi-agent task orchestration engine.
//!
//! Queues tasks, assigns them to capacity-limited agents, runs batches in
//! bounded-concurrency windows, aggregates outcomes, emits lifecycle events,
//! and snapshots/restores its own state.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Top-level engine owning the queue, single-task and batch execution, snapshots.
//! - [`AgentDispatcher`]: Owns the agent fleet and hands out capacity, least-loaded first.
//! - [`AgentRegistry`]: Status of every agent/task assignment.
//! - [`ResultAggregator`]: Folds [`FarmResult`]s into [`AggregatedResults`].
//! - [`EventEmitter`]: Fan-out of [`OrchestrationEvent`]s to subscribers.
//! - [`TaskExecutor`]: The host-supplied execution backend.
//! - [`StateStore`]: Durable storage for [`OrchestrationState`] snapshots.

/// Outcome accumulation and summaries.
pub mod aggregator;
/// Engine configuration and batch options.
pub mod config;
/// Agent fleet and capacity dispatch.
pub mod dispatcher;
/// Orchestration engine and batch execution.
pub mod engine;
/// Lifecycle events and subscriber fan-out.
pub mod events;
/// Execution backend seam.
pub mod executor;
/// Default agent fleet.
pub mod profiles;
/// Assignment status tracking.
pub mod registry;
/// Snapshots and snapshot stores.
pub mod state;
/// Pending task queue.
pub mod task_queue;
/// Shared orchestration types (Task, Agent, FarmResult, etc.).
pub mod types;

pub use aggregator::{AggregatedResults, ResultAggregator};
pub use config::{BatchOptions, OrchestratorConfig};
pub use dispatcher::{AgentDispatcher, SlotGuard};
pub use engine::Orchestrator;
pub use events::{EventEmitter, EventHandler, HandlerId, OrchestrationEvent};
pub use executor::{FnExecutor, TaskExecutor};
pub use profiles::default_agents;
pub use registry::AgentRegistry;
pub use state::{FileStateStore, OrchestrationState, StateStore};
pub use task_queue::TaskQueue;
pub use types::{
    Agent, AgentConfig, AgentState, AgentStatus, Assignment, Capacity, FarmResult, ResultStatus,
    Task, TaskPriority, TaskType,
};
