use crate::types::{AgentConfig, TaskType};

/// The fleet registered when no agents are configured explicitly.
pub fn default_agents() -> Vec<AgentConfig> {
    vec![engineer_agent(), qa_agent(), researcher_agent()]
}

fn engineer_agent() -> AgentConfig {
    AgentConfig::new(
        "engineer",
        "Engineer",
        vec![TaskType::Implementation, TaskType::Refactor],
        3,
    )
}

fn qa_agent() -> AgentConfig {
    AgentConfig::new("qa", "QA", vec![TaskType::Test, TaskType::Review], 2)
}

fn researcher_agent() -> AgentConfig {
    AgentConfig::new(
        "researcher",
        "Researcher",
        vec![TaskType::Research, TaskType::Documentation],
        2,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_fleet_covers_every_task_type() {
        let agents = default_agents();
        let covered: HashSet<TaskType> = agents
            .iter()
            .flat_map(|a| a.capabilities.iter().copied())
            .collect();
        for task_type in [
            TaskType::Implementation,
            TaskType::Test,
            TaskType::Review,
            TaskType::Research,
            TaskType::Documentation,
            TaskType::Refactor,
        ] {
            assert!(covered.contains(&task_type), "{task_type} not covered");
        }
    }

    #[test]
    fn test_default_fleet_ids_unique() {
        let agents = default_agents();
        let ids: HashSet<&str> = agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids.len(), agents.len());
        assert!(agents.iter().all(|a| a.max_concurrent > 0));
    }
}
