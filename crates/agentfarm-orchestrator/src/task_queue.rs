use crate::types::Task;
use agentfarm_core::{AgentfarmError, AgentfarmResult};
use std::collections::HashMap;

/// Pending tasks keyed by id, listed in enqueue order.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    tasks: HashMap<String, (u64, Task)>,
    next_seq: u64,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Fails if a task with the same id is already pending.
    pub fn add(&mut self, task: Task) -> AgentfarmResult<String> {
        if self.tasks.contains_key(&task.task_id) {
            return Err(AgentfarmError::DuplicateTask(task.task_id));
        }
        let id = task.task_id.clone();
        self.tasks.insert(id.clone(), (self.next_seq, task));
        self.next_seq += 1;
        Ok(id)
    }

    /// Add several tasks; nothing is inserted unless every id is new and unique.
    pub fn add_all(&mut self, tasks: Vec<Task>) -> AgentfarmResult<Vec<String>> {
        let mut seen = std::collections::HashSet::new();
        for task in &tasks {
            if self.tasks.contains_key(&task.task_id) || !seen.insert(task.task_id.as_str()) {
                return Err(AgentfarmError::DuplicateTask(task.task_id.clone()));
            }
        }
        tasks.into_iter().map(|t| self.add(t)).collect()
    }

    /// Look up a pending task.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id).map(|(_, t)| t)
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Remove and return a pending task.
    pub fn remove(&mut self, id: &str) -> Option<Task> {
        self.tasks.remove(id).map(|(_, t)| t)
    }

    /// All pending tasks in enqueue order.
    pub fn all_tasks(&self) -> Vec<Task> {
        let mut entries: Vec<&(u64, Task)> = self.tasks.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, t)| t.clone()).collect()
    }

    /// Replace the queue contents, keeping the given order.
    pub fn replace(&mut self, tasks: Vec<Task>) {
        self.clear();
        for task in tasks {
            let id = task.task_id.clone();
            self.tasks.insert(id, (self.next_seq, task));
            self.next_seq += 1;
        }
    }

    /// Remove every task.
    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
