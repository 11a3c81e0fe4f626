use crate::types::{AgentState, AgentStatus, Assignment};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tracks the status of every agent/task assignment, keyed by task id.
///
/// Entries are never removed automatically; callers clear them explicitly.
pub struct AgentRegistry {
    statuses: Arc<RwLock<HashMap<String, AgentStatus>>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a freshly dispatched assignment as running.
    pub async fn start(&self, task_id: &str, assignment: &Assignment) {
        let status = AgentStatus {
            agent_id: assignment.agent_id.clone(),
            task_id: task_id.to_string(),
            output_file: assignment.output_file.clone(),
            state: AgentState::Running,
        };
        self.statuses
            .write()
            .await
            .insert(task_id.to_string(), status);
    }

    /// Mark an assignment as completed.
    pub async fn complete(&self, task_id: &str) -> bool {
        self.set_state(task_id, AgentState::Complete).await
    }

    /// Mark an assignment as failed.
    pub async fn fail(&self, task_id: &str) -> bool {
        self.set_state(task_id, AgentState::Failed).await
    }

    async fn set_state(&self, task_id: &str, state: AgentState) -> bool {
        let mut statuses = self.statuses.write().await;
        if let Some(status) = statuses.get_mut(task_id) {
            status.state = state;
            true
        } else {
            false
        }
    }

    /// Mark a still-running assignment as failed without awaiting.
    ///
    /// Callable from `Drop`. If the lock is contended the update is handed to
    /// the current tokio runtime; outside a runtime it is skipped.
    pub fn abandon(&self, task_id: &str) {
        if let Ok(mut statuses) = self.statuses.try_write() {
            fail_running(&mut statuses, task_id);
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let statuses = Arc::clone(&self.statuses);
        let task_id = task_id.to_string();
        handle.spawn(async move {
            fail_running(&mut *statuses.write().await, &task_id);
        });
    }

    /// Get the status recorded for a task.
    pub async fn get(&self, task_id: &str) -> Option<AgentStatus> {
        self.statuses.read().await.get(task_id).cloned()
    }

    /// Get every recorded status.
    pub async fn snapshot(&self) -> HashMap<String, AgentStatus> {
        self.statuses.read().await.clone()
    }

    /// Statuses of all assignments handled by one agent.
    pub async fn by_agent(&self, agent_id: &str) -> Vec<AgentStatus> {
        self.statuses
            .read()
            .await
            .values()
            .filter(|s| s.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Replace the whole registry with `statuses`.
    pub async fn replace(&self, statuses: HashMap<String, AgentStatus>) {
        *self.statuses.write().await = statuses;
    }

    /// Drop every recorded status.
    pub async fn clear(&self) {
        self.statuses.write().await.clear();
    }

    /// Number of recorded statuses.
    pub async fn len(&self) -> usize {
        self.statuses.read().await.len()
    }

    /// Whether no status is recorded.
    pub async fn is_empty(&self) -> bool {
        self.statuses.read().await.is_empty()
    }
}

fn fail_running(statuses: &mut HashMap<String, AgentStatus>, task_id: &str) {
    if let Some(status) = statuses.get_mut(task_id) {
        if status.state == AgentState::Running {
            status.state = AgentState::Failed;
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn assignment(agent_id: &str) -> Assignment {
        Assignment {
            agent_id: agent_id.to_string(),
            output_file: PathBuf::from(format!("/tmp/{agent_id}.output")),
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty().await);
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_start_and_complete() {
        let registry = AgentRegistry::new();
        registry.start("t1", &assignment("coder")).await;

        let status = registry.get("t1").await.unwrap();
        assert_eq!(status.state, AgentState::Running);
        assert_eq!(status.agent_id, "coder");
        assert_eq!(status.output_file, PathBuf::from("/tmp/coder.output"));

        assert!(registry.complete("t1").await);
        assert_eq!(registry.get("t1").await.unwrap().state, AgentState::Complete);
    }

    #[tokio::test]
    async fn test_fail_unknown_task() {
        let registry = AgentRegistry::new();
        assert!(!registry.fail("nope").await);
        registry.start("t1", &assignment("tester")).await;
        assert!(registry.fail("t1").await);
        assert_eq!(registry.get("t1").await.unwrap().state, AgentState::Failed);
    }

    #[tokio::test]
    async fn test_by_agent() {
        let registry = AgentRegistry::new();
        registry.start("t1", &assignment("coder")).await;
        registry.start("t2", &assignment("coder")).await;
        registry.start("t3", &assignment("tester")).await;
        assert_eq!(registry.by_agent("coder").await.len(), 2);
        assert_eq!(registry.by_agent("tester").await.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_and_clear() {
        let registry = AgentRegistry::new();
        registry.start("t1", &assignment("coder")).await;
        let saved = registry.snapshot().await;

        registry.start("t2", &assignment("coder")).await;
        assert_eq!(registry.len().await, 2);

        registry.replace(saved).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("t2").await.is_none());

        registry.clear().await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_abandon_only_fails_running_entries() {
        let registry = AgentRegistry::new();
        registry.start("t1", &assignment("coder")).await;
        registry.start("t2", &assignment("coder")).await;
        registry.complete("t2").await;

        registry.abandon("t1");
        registry.abandon("t2");
        registry.abandon("missing");

        assert_eq!(registry.get("t1").await.unwrap().state, AgentState::Failed);
        assert_eq!(registry.get("t2").await.unwrap().state, AgentState::Complete);
        assert!(registry.get("missing").await.is_none());
    }
}
