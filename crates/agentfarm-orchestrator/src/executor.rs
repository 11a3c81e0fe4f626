use crate::types::Task;
use agentfarm_core::AgentfarmResult;
use async_trait::async_trait;
use futures_util::future::BoxFuture;

/// The host-supplied capability that actually performs a task.
///
/// Implementations report failure as an error; the orchestrator turns it
/// into a failure result and always returns the agent's capacity.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run `task`, returning its output.
    async fn execute(&self, task: &Task) -> AgentfarmResult<String>;
}

/// Adapts a closure returning a boxed future into a [`TaskExecutor`].
pub struct FnExecutor<F> {
    func: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(Task) -> BoxFuture<'static, AgentfarmResult<String>> + Send + Sync,
{
    /// Wrap `func`.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> TaskExecutor for FnExecutor<F>
where
    F: Fn(Task) -> BoxFuture<'static, AgentfarmResult<String>> + Send + Sync,
{
    async fn execute(&self, task: &Task) -> AgentfarmResult<String> {
        (self.func)(task.clone()).await
    }
}
