use crate::types::{AgentStatus, FarmResult, Task};
use agentfarm_core::{AgentfarmError, AgentfarmResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Owned snapshot of the engine's observable state.
///
/// Agent load counters are not part of the snapshot; restoring resets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationState {
    /// Pending tasks in enqueue order.
    pub pending_tasks: Vec<Task>,
    /// Registry contents keyed by task id.
    pub agent_statuses: HashMap<String, AgentStatus>,
    /// Recorded outcomes.
    pub results: Vec<FarmResult>,
    /// When the snapshot was taken.
    pub captured_at: DateTime<Utc>,
}

/// Durable storage for named snapshots.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `state` under `name`, overwriting any previous snapshot.
    async fn save(&self, name: &str, state: &OrchestrationState) -> AgentfarmResult<()>;
    /// Load the snapshot named `name`, if any.
    async fn load(&self, name: &str) -> AgentfarmResult<Option<OrchestrationState>>;
    /// Remove a snapshot. Removing a missing one is not an error.
    async fn delete(&self, name: &str) -> AgentfarmResult<()>;
    /// Names of stored snapshots, sorted.
    async fn list(&self) -> AgentfarmResult<Vec<String>>;
}

/// One pretty-printed JSON file per snapshot.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn new(dir: PathBuf) -> AgentfarmResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn state_path(&self, name: &str) -> AgentfarmResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(AgentfarmError::Persistence(format!(
                "invalid snapshot name: {name:?}"
            )));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, name: &str, state: &OrchestrationState) -> AgentfarmResult<()> {
        let path = self.state_path(name)?;
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    async fn load(&self, name: &str) -> AgentfarmResult<Option<OrchestrationState>> {
        let path = self.state_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let state: OrchestrationState = serde_json::from_str(&data).map_err(|e| {
            AgentfarmError::Persistence(format!("Failed to parse snapshot {name}: {e}"))
        })?;
        Ok(Some(state))
    }

    async fn delete(&self, name: &str) -> AgentfarmResult<()> {
        let path = self.state_path(name)?;
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self) -> AgentfarmResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
