use thiserror::Error;

/// A convenience `Result` alias using [`AgentfarmError`].
pub type AgentfarmResult<T> = Result<T, AgentfarmError>;

/// Top-level error type for the Agentfarm engine.
///
/// Each variant corresponds to a failure family that can surface from an
/// administrative operation or from the task execution backend.
#[derive(Error, Debug)]
pub enum AgentfarmError {
    /// No pending task with the given id.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A task with the given id is already pending.
    #[error("Task already queued: {0}")]
    DuplicateTask(String),

    /// No registered agent with the given id.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// An agent with the given id is already registered.
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    /// The execution backend reported a failure.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Execution did not settle before the configured deadline.
    #[error("Task timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that was exceeded.
        timeout_ms: u64,
    },

    /// An error from the orchestration engine itself.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error while saving or loading a state snapshot.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An event handler reported a failure.
    #[error("Handler error: {0}")]
    Handler(String),

    /// A JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
