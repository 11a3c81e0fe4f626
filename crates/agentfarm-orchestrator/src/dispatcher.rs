use crate::types::{Agent, AgentConfig, Assignment, Capacity, Task, TaskType};
use agentfarm_core::{AgentfarmError, AgentfarmResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the agent fleet and hands out capacity.
///
/// All load changes happen under one lock, so select-and-increment is atomic
/// with respect to concurrent `release` calls and no agent ever exceeds its
/// ceiling.
pub struct AgentDispatcher {
    fleet: Mutex<Fleet>,
    output_dir: PathBuf,
}

#[derive(Default)]
struct Fleet {
    /// Agents in registration order; order breaks ties in selection.
    agents: Vec<Agent>,
    /// Slots currently owned by a live [`SlotGuard`], per agent id.
    held: HashMap<String, u32>,
}

impl Fleet {
    fn held_by(&self, agent_id: &str) -> u32 {
        self.held.get(agent_id).copied().unwrap_or(0)
    }
}

impl AgentDispatcher {
    /// Create a dispatcher with an empty fleet.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fleet: Mutex::new(Fleet::default()),
            output_dir: output_dir.into(),
        }
    }

    /// Create a dispatcher pre-populated with the given fleet.
    pub fn with_agents(
        output_dir: impl Into<PathBuf>,
        agents: Vec<AgentConfig>,
    ) -> AgentfarmResult<Self> {
        let dispatcher = Self::new(output_dir);
        for config in agents {
            dispatcher.register_agent(config)?;
        }
        Ok(dispatcher)
    }

    /// Directory under which per-task output files are placed.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Least-loaded agent that accepts `task_type` and has a free slot.
    /// Ties go to the earliest registered agent.
    pub fn select_agent(&self, task_type: TaskType) -> Option<Agent> {
        let fleet = self.fleet.lock();
        Self::select_index(&fleet.agents, task_type)
            .and_then(|idx| fleet.agents.get(idx).cloned())
    }

    fn select_index(agents: &[Agent], task_type: TaskType) -> Option<usize> {
        // min_by_key keeps the first minimum, which preserves registration order on ties.
        agents
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_available_for(task_type))
            .min_by_key(|(_, a)| a.current_load)
            .map(|(idx, _)| idx)
    }

    /// Reserve one slot on the best agent for `task`.
    ///
    /// Returns `None` when no agent can take it; callers treat that as a
    /// blocked task rather than an error. The slot stays taken until
    /// [`release`](Self::release) is called for the agent.
    pub fn dispatch(&self, task: &Task) -> Option<Assignment> {
        let mut fleet = self.fleet.lock();
        self.reserve(&mut fleet, task)
    }

    /// Reserve one slot like [`dispatch`](Self::dispatch), but tie it to a
    /// guard that returns the slot when dropped.
    pub fn claim(self: &Arc<Self>, task: &Task) -> Option<SlotGuard> {
        let mut fleet = self.fleet.lock();
        let assignment = self.reserve(&mut fleet, task)?;
        *fleet.held.entry(assignment.agent_id.clone()).or_insert(0) += 1;
        Some(SlotGuard {
            dispatcher: Arc::clone(self),
            assignment,
        })
    }

    fn reserve(&self, fleet: &mut Fleet, task: &Task) -> Option<Assignment> {
        let idx = Self::select_index(&fleet.agents, task.task_type)?;
        let agent = fleet.agents.get_mut(idx)?;
        agent.current_load += 1;

        debug!(
            task_id = %task.task_id,
            agent_id = %agent.id,
            load = agent.current_load,
            max = agent.max_concurrent,
            "Dispatched task"
        );

        Some(Assignment {
            agent_id: agent.id.clone(),
            output_file: self.output_file_for(&task.task_id),
        })
    }

    /// Deterministic side-channel location for a task's output.
    pub fn output_file_for(&self, task_id: &str) -> PathBuf {
        self.output_dir.join(format!("{task_id}.output"))
    }

    /// Return one slot to the agent. Releasing at zero load, or releasing an
    /// unknown agent, is a no-op.
    ///
    /// Slots owned by a live [`SlotGuard`] are never returned this way; they
    /// come back only when the guard drops.
    pub fn release(&self, agent_id: &str) {
        let mut fleet = self.fleet.lock();
        let floor = fleet.held_by(agent_id);
        if let Some(agent) = fleet.agents.iter_mut().find(|a| a.id == agent_id) {
            if agent.current_load > floor {
                agent.current_load -= 1;
            }
            debug!(agent_id = %agent_id, load = agent.current_load, "Released agent slot");
        }
    }

    fn release_held(&self, agent_id: &str) {
        let mut fleet = self.fleet.lock();
        let Some(held) = fleet.held.get_mut(agent_id) else {
            return;
        };
        *held -= 1;
        if *held == 0 {
            fleet.held.remove(agent_id);
        }
        if let Some(agent) = fleet.agents.iter_mut().find(|a| a.id == agent_id) {
            agent.current_load = agent.current_load.saturating_sub(1);
            debug!(agent_id = %agent_id, load = agent.current_load, "Released guarded slot");
        }
    }

    /// Agents that currently have at least one free slot.
    pub fn get_available_agents(&self) -> Vec<Agent> {
        self.fleet
            .lock()
            .agents
            .iter()
            .filter(|a| a.has_capacity())
            .cloned()
            .collect()
    }

    /// Whether `agent_id` is registered and has a free slot.
    pub fn is_agent_available(&self, agent_id: &str) -> bool {
        self.fleet
            .lock()
            .agents
            .iter()
            .any(|a| a.id == agent_id && a.has_capacity())
    }

    /// Sum of ceilings, sum of loads, and the difference.
    pub fn get_total_capacity(&self) -> Capacity {
        let fleet = self.fleet.lock();
        let total: u32 = fleet.agents.iter().map(|a| a.max_concurrent).sum();
        let in_use: u32 = fleet.agents.iter().map(|a| a.current_load).sum();
        Capacity {
            total,
            in_use,
            available: total.saturating_sub(in_use),
        }
    }

    /// Add an agent to the fleet. The agent always starts at zero load.
    pub fn register_agent(&self, config: AgentConfig) -> AgentfarmResult<()> {
        if config.max_concurrent == 0 {
            return Err(AgentfarmError::Config(format!(
                "agent {} must allow at least one concurrent task",
                config.id
            )));
        }
        let mut fleet = self.fleet.lock();
        if fleet.agents.iter().any(|a| a.id == config.id) {
            return Err(AgentfarmError::DuplicateAgent(config.id));
        }
        let agent = Agent::from(config);
        info!(
            agent_id = %agent.id,
            capabilities = ?agent.capabilities,
            max_concurrent = agent.max_concurrent,
            "Agent registered"
        );
        fleet.agents.push(agent);
        Ok(())
    }

    /// Remove an agent from the fleet, returning its last known descriptor.
    ///
    /// Guards still held for the agent become no-ops when they drop.
    pub fn unregister_agent(&self, agent_id: &str) -> AgentfarmResult<Agent> {
        let mut fleet = self.fleet.lock();
        let idx = fleet
            .agents
            .iter()
            .position(|a| a.id == agent_id)
            .ok_or_else(|| AgentfarmError::AgentNotFound(agent_id.to_string()))?;
        let agent = fleet.agents.remove(idx);
        fleet.held.remove(agent_id);
        info!(agent_id = %agent_id, in_flight = agent.current_load, "Agent unregistered");
        Ok(agent)
    }

    /// Snapshot of the fleet in registration order.
    pub fn agents(&self) -> Vec<Agent> {
        self.fleet.lock().agents.clone()
    }

    /// Descriptor of one agent, if registered.
    pub fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        self.fleet
            .lock()
            .agents
            .iter()
            .find(|a| a.id == agent_id)
            .cloned()
    }

    /// Drop every reservation not owned by a live [`SlotGuard`].
    ///
    /// With no guards outstanding this zeroes every load.
    pub fn reset_loads(&self) {
        let mut fleet = self.fleet.lock();
        let Fleet { agents, held } = &mut *fleet;
        for agent in agents.iter_mut() {
            agent.current_load = held.get(&agent.id).copied().unwrap_or(0);
        }
    }
}

/// One reserved agent slot, returned to the dispatcher when dropped.
///
/// Dropping is the only way to give the slot back, so a cancelled or
/// panicking execution cannot leak capacity.
pub struct SlotGuard {
    dispatcher: Arc<AgentDispatcher>,
    assignment: Assignment,
}

impl SlotGuard {
    /// The agent and output location this slot was reserved with.
    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("assignment", &self.assignment)
            .finish()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.dispatcher.release_held(&self.assignment.agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str, caps: Vec<TaskType>, max: u32) -> AgentConfig {
        AgentConfig::new(id, id.to_uppercase(), caps, max)
    }

    fn dispatcher(agents: Vec<AgentConfig>) -> AgentDispatcher {
        AgentDispatcher::with_agents("/tmp/agentfarm-test", agents).unwrap()
    }

    #[test]
    fn test_select_filters_by_capability() {
        let d = dispatcher(vec![
            agent("coder", vec![TaskType::Implementation], 2),
            agent("tester", vec![TaskType::Test], 2),
        ]);
        assert_eq!(d.select_agent(TaskType::Test).unwrap().id, "tester");
        assert!(d.select_agent(TaskType::Review).is_none());
    }

    #[test]
    fn test_select_prefers_least_loaded() {
        let d = dispatcher(vec![
            agent("a", vec![TaskType::Implementation], 3),
            agent("b", vec![TaskType::Implementation], 3),
        ]);
        let t = Task::new(TaskType::Implementation, "x");
        assert_eq!(d.dispatch(&t).unwrap().agent_id, "a");
        // a now has load 1, b has 0
        assert_eq!(d.dispatch(&t).unwrap().agent_id, "b");
        // tie again at 1/1: registration order wins
        assert_eq!(d.dispatch(&t).unwrap().agent_id, "a");
    }

    #[test]
    fn test_dispatch_respects_ceiling() {
        let d = dispatcher(vec![agent("solo", vec![TaskType::Implementation], 1)]);
        let t = Task::new(TaskType::Implementation, "x");
        assert!(d.dispatch(&t).is_some());
        assert!(d.dispatch(&t).is_none());
        assert!(!d.is_agent_available("solo"));
    }

    #[test]
    fn test_dispatch_output_file_is_deterministic() {
        let d = dispatcher(vec![agent("a", vec![TaskType::Research], 2)]);
        let t = Task::new(TaskType::Research, "x").with_id("task-9");
        let assignment = d.dispatch(&t).unwrap();
        assert_eq!(
            assignment.output_file,
            PathBuf::from("/tmp/agentfarm-test/task-9.output")
        );
        assert_eq!(assignment.output_file, d.output_file_for("task-9"));
    }

    #[test]
    fn test_release_restores_load_and_floors_at_zero() {
        let d = dispatcher(vec![agent("a", vec![TaskType::Test], 2)]);
        let t = Task::new(TaskType::Test, "x");
        d.dispatch(&t).unwrap();
        assert_eq!(d.get_agent("a").unwrap().current_load, 1);

        d.release("a");
        assert_eq!(d.get_agent("a").unwrap().current_load, 0);

        d.release("a");
        d.release("unknown");
        assert_eq!(d.get_agent("a").unwrap().current_load, 0);
    }

    #[test]
    fn test_capacity_totals() {
        let d = dispatcher(vec![
            agent("a", vec![TaskType::Test], 2),
            agent("b", vec![TaskType::Review], 3),
        ]);
        d.dispatch(&Task::new(TaskType::Review, "x")).unwrap();
        let cap = d.get_total_capacity();
        assert_eq!(cap.total, 5);
        assert_eq!(cap.in_use, 1);
        assert_eq!(cap.available, 4);
        assert_eq!(d.get_available_agents().len(), 2);
    }

    #[test]
    fn test_register_and_unregister() {
        let d = AgentDispatcher::new("/tmp/out");
        let mut config = agent("late", vec![TaskType::Documentation], 1);
        config.current_load = Some(1);
        d.register_agent(config).unwrap();
        assert_eq!(d.get_agent("late").unwrap().current_load, 0);

        assert!(matches!(
            d.register_agent(agent("late", vec![TaskType::Test], 1)),
            Err(AgentfarmError::DuplicateAgent(_))
        ));
        assert!(matches!(
            d.register_agent(agent("zero", vec![TaskType::Test], 0)),
            Err(AgentfarmError::Config(_))
        ));

        let removed = d.unregister_agent("late").unwrap();
        assert_eq!(removed.id, "late");
        assert!(d.agents().is_empty());
        assert!(matches!(
            d.unregister_agent("late"),
            Err(AgentfarmError::AgentNotFound(_))
        ));
    }

    #[test]
    fn test_reset_loads() {
        let d = dispatcher(vec![agent("a", vec![TaskType::Test], 2)]);
        let t = Task::new(TaskType::Test, "x");
        d.dispatch(&t).unwrap();
        d.dispatch(&t).unwrap();
        d.reset_loads();
        assert_eq!(d.get_total_capacity().in_use, 0);
    }

    #[test]
    fn test_concurrent_dispatch_never_exceeds_ceiling() {
        let d = Arc::new(dispatcher(vec![
            agent("a", vec![TaskType::Implementation], 3),
            agent("b", vec![TaskType::Implementation], 2),
        ]));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let d = d.clone();
                std::thread::spawn(move || {
                    let t = Task::new(TaskType::Implementation, "x");
                    for _ in 0..200 {
                        if let Some(a) = d.dispatch(&t) {
                            for agent in d.agents() {
                                assert!(agent.current_load <= agent.max_concurrent);
                            }
                            d.release(&a.agent_id);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(d.get_total_capacity().in_use, 0);
    }

    #[test]
    fn test_slot_guard_releases_on_drop() {
        let d = Arc::new(dispatcher(vec![agent("solo", vec![TaskType::Test], 1)]));
        let t = Task::new(TaskType::Test, "x");
        let guard = d.claim(&t).unwrap();
        assert_eq!(guard.assignment().agent_id, "solo");
        assert!(d.claim(&t).is_none());

        drop(guard);
        assert_eq!(d.get_total_capacity().in_use, 0);
        assert!(d.claim(&t).is_some());
    }

    #[test]
    fn test_plain_release_cannot_free_a_guarded_slot() {
        let d = Arc::new(dispatcher(vec![agent("a", vec![TaskType::Test], 2)]));
        let t = Task::new(TaskType::Test, "x");
        let guard = d.claim(&t).unwrap();
        d.dispatch(&t).unwrap();

        d.release("a");
        d.release("a");
        assert_eq!(d.get_agent("a").unwrap().current_load, 1);

        drop(guard);
        assert_eq!(d.get_agent("a").unwrap().current_load, 0);
    }

    #[test]
    fn test_reset_loads_keeps_guarded_slots() {
        let d = Arc::new(dispatcher(vec![agent("a", vec![TaskType::Test], 3)]));
        let t = Task::new(TaskType::Test, "x");
        let guard = d.claim(&t).unwrap();
        d.dispatch(&t).unwrap();
        d.dispatch(&t).unwrap();

        d.reset_loads();
        assert_eq!(d.get_agent("a").unwrap().current_load, 1);

        drop(guard);
        assert_eq!(d.get_agent("a").unwrap().current_load, 0);
    }

    #[test]
    fn test_guard_for_unregistered_agent_is_noop() {
        let d = Arc::new(dispatcher(vec![agent("gone", vec![TaskType::Test], 1)]));
        let guard = d.claim(&Task::new(TaskType::Test, "x")).unwrap();
        d.unregister_agent("gone").unwrap();
        d.register_agent(agent("gone", vec![TaskType::Test], 1))
            .unwrap();
        drop(guard);
        assert_eq!(d.get_agent("gone").unwrap().current_load, 0);
    }
}
