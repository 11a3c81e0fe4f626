use crate::profiles::default_agents;
use crate::types::AgentConfig;
use agentfarm_core::{AgentfarmError, AgentfarmResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration, typically loaded from a TOML file.
///
/// ```toml
/// parallel = 4
/// fail_fast = true
/// task_timeout_ms = 60000
/// output_dir = "./data/agent-output"
///
/// [[agents]]
/// id = "engineer"
/// name = "Engineer"
/// capabilities = ["implementation", "refactor"]
/// max_concurrent = 3
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Default batch window size.
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    /// Default fail-fast setting for batches.
    #[serde(default)]
    pub fail_fast: bool,
    /// Default per-task deadline for batches.
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
    /// Directory for per-task output files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// The agent fleet registered at startup.
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentConfig>,
}

fn default_parallel() -> usize {
    3
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./data/agent-output")
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            fail_fast: false,
            task_timeout_ms: None,
            output_dir: default_output_dir(),
            agents: default_agents(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> AgentfarmResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| AgentfarmError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> AgentfarmResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            AgentfarmError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject a zero window and malformed or duplicate agents.
    pub fn validate(&self) -> AgentfarmResult<()> {
        if self.parallel == 0 {
            return Err(AgentfarmError::Config("parallel must be at least 1".into()));
        }
        let mut ids = HashSet::new();
        for agent in &self.agents {
            if !ids.insert(agent.id.as_str()) {
                return Err(AgentfarmError::Config(format!(
                    "duplicate agent id: {}",
                    agent.id
                )));
            }
            if agent.max_concurrent == 0 {
                return Err(AgentfarmError::Config(format!(
                    "agent {} must allow at least one concurrent task",
                    agent.id
                )));
            }
            if agent.capabilities.is_empty() {
                return Err(AgentfarmError::Config(format!(
                    "agent {} declares no capabilities",
                    agent.id
                )));
            }
        }
        Ok(())
    }

    /// Batch defaults derived from this config.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            parallel: self.parallel,
            fail_fast: self.fail_fast,
            timeout: self.task_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Per-call options for [`crate::Orchestrator::execute_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Window size. Zero is treated as one.
    pub parallel: usize,
    /// Stop issuing work after the first failure.
    pub fail_fast: bool,
    /// Deadline applied to each task's execution.
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            fail_fast: false,
            timeout: None,
        }
    }
}

impl BatchOptions {
    /// Set the window size.
    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set fail-fast.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set the per-task deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn window_size(&self) -> usize {
        self.parallel.max(1)
    }
}
