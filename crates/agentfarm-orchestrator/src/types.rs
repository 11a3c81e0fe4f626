use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Kind of work a task represents. Agents declare which kinds they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Write new code.
    Implementation,
    /// Write or run tests.
    Test,
    /// Review existing changes.
    Review,
    /// Investigate and report findings.
    Research,
    /// Write user or developer docs.
    Documentation,
    /// Restructure code without changing behavior.
    Refactor,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Implementation => write!(f, "implementation"),
            TaskType::Test => write!(f, "test"),
            TaskType::Review => write!(f, "review"),
            TaskType::Research => write!(f, "research"),
            TaskType::Documentation => write!(f, "documentation"),
            TaskType::Refactor => write!(f, "refactor"),
        }
    }
}

/// Scheduling priority. Batches run higher priorities first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Runs last.
    Low,
    /// The default.
    #[default]
    Medium,
    /// Runs before medium and low.
    High,
    /// Runs first.
    Critical,
}

/// An immutable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id; a UUID v4 unless set with [`Task::with_id`].
    pub task_id: String,
    /// Kind of work, serialized as `type`.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Free-form instructions handed to the executor.
    pub description: String,
    /// References the executor may need (file paths, URLs, ...).
    #[serde(default)]
    pub context: Vec<String>,
    /// Batch ordering weight.
    #[serde(default)]
    pub priority: TaskPriority,
    /// What a reviewer should check the output against.
    #[serde(default)]
    pub success_criteria: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a medium-priority task with a fresh id.
    pub fn new(task_type: TaskType, description: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_type,
            description: description.into(),
            context: Vec::new(),
            priority: TaskPriority::default(),
            success_criteria: None,
            created_at: Utc::now(),
        }
    }

    /// Replace the generated id.
    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the context references.
    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    /// Set the success criteria.
    pub fn with_success_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.success_criteria = Some(criteria.into());
        self
    }
}

/// A capacity-bounded worker descriptor.
///
/// `current_load` is owned by the dispatcher; it is always within
/// `0..=max_concurrent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Task kinds this agent accepts.
    pub capabilities: Vec<TaskType>,
    /// Concurrency ceiling.
    pub max_concurrent: u32,
    /// Slots currently taken.
    pub current_load: u32,
}

impl Agent {
    /// Whether `task_type` is among the agent's capabilities.
    pub fn can_handle(&self, task_type: TaskType) -> bool {
        self.capabilities.contains(&task_type)
    }

    /// Whether at least one slot is free.
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrent
    }

    /// Capable of `task_type` and not at its ceiling.
    pub fn is_available_for(&self, task_type: TaskType) -> bool {
        self.can_handle(task_type) && self.has_capacity()
    }
}

/// Declarative agent definition, as found in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Task kinds this agent accepts.
    pub capabilities: Vec<TaskType>,
    /// Concurrency ceiling; must be at least one.
    pub max_concurrent: u32,
    /// Accepted for compatibility with exported fleets; registration always
    /// starts an agent at zero load.
    #[serde(default)]
    pub current_load: Option<u32>,
}

impl AgentConfig {
    /// Build a config with no supplied load.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: Vec<TaskType>,
        max_concurrent: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities,
            max_concurrent,
            current_load: None,
        }
    }
}

impl From<AgentConfig> for Agent {
    fn from(config: AgentConfig) -> Self {
        Self {
            id: config.id,
            name: config.name,
            capabilities: config.capabilities,
            max_concurrent: config.max_concurrent,
            current_load: 0,
        }
    }
}

/// A successful reservation of agent capacity for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Agent holding the slot.
    pub agent_id: String,
    /// Where the executor may write the task's output.
    pub output_file: PathBuf,
}

/// Fleet-wide capacity figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Sum of every agent's ceiling.
    pub total: u32,
    /// Sum of every agent's load.
    pub in_use: u32,
    /// `total - in_use`.
    pub available: u32,
}

/// Lifecycle state of a single agent/task assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Assigned but not started.
    Idle,
    /// The executor is working on the task.
    Running,
    /// Finished successfully.
    Complete,
    /// Failed, timed out, or was interrupted.
    Failed,
}

/// Per-assignment record kept by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Agent the task was assigned to.
    pub agent_id: String,
    /// The assigned task.
    pub task_id: String,
    /// Output location from the assignment.
    pub output_file: PathBuf,
    /// Current lifecycle state.
    pub state: AgentState,
}

/// Outcome of one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// The executor returned output.
    Success,
    /// The executor failed, timed out, or the task could not be run.
    Failure,
    /// No agent had capacity; execution was never attempted.
    Blocked,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultStatus::Success => write!(f, "success"),
            ResultStatus::Failure => write!(f, "failure"),
            ResultStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Immutable outcome record, created exactly once per task attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmResult {
    /// The task this outcome belongs to.
    pub task_id: String,
    /// Empty when no agent was involved (blocked or unknown task).
    pub agent_id: String,
    /// Outcome kind.
    pub status: ResultStatus,
    /// Executor output, or the error text on failure.
    pub output: String,
    /// Wall-clock execution time.
    pub duration_ms: u64,
    /// Problems reported alongside a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<String>>,
}

impl FarmResult {
    /// A successful outcome.
    pub fn success(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        output: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            status: ResultStatus::Success,
            output: output.into(),
            duration_ms,
            issues: None,
        }
    }

    /// A failed outcome; `error` becomes both the output and the only issue.
    pub fn failure(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let error = error.into();
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            status: ResultStatus::Failure,
            output: error.clone(),
            duration_ms,
            issues: Some(vec![error]),
        }
    }

    /// An outcome for a task no agent could take.
    pub fn blocked(task_id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: String::new(),
            status: ResultStatus::Blocked,
            output: format!("No agent available for task type: {task_type}"),
            duration_ms: 0,
            issues: None,
        }
    }

    /// Whether the status is [`ResultStatus::Success`].
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}
