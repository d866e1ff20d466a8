#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Shared per-tick search budget and the rethink queue.
//!
//! The scheduler is an explicit object threaded by reference through every
//! controller tick; there is no global state. It owns two concerns: the
//! process-wide cap on search-step work per tick, and the set-backed FIFO
//! queue of agents whose cached paths were invalidated by a map edit.

use std::collections::{HashSet, VecDeque};

use horde_nav_core::AgentId;
use tracing::debug;

/// Shared tick budget and rethink queue.
#[derive(Debug, Default)]
pub struct Scheduler {
    budget: StepBudget,
    rethink: RethinkQueue,
}

impl Scheduler {
    /// Creates a scheduler with an empty rethink queue and a spent budget.
    ///
    /// The budget only becomes available after the first
    /// [`Scheduler::begin_tick`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the shared search-step budget for a new tick.
    ///
    /// Must be called exactly once per tick, before the first controller
    /// consumes budget.
    pub fn begin_tick(&mut self, global_steps: u32) {
        self.budget.remaining = global_steps;
        self.budget.consumed = 0;
    }

    /// Attempts to consume one search step from the shared budget.
    #[must_use]
    pub fn try_consume_step(&mut self) -> bool {
        if self.budget.remaining == 0 {
            return false;
        }
        self.budget.remaining -= 1;
        self.budget.consumed += 1;
        true
    }

    /// Search steps consumed since the last budget reset.
    #[must_use]
    pub const fn steps_consumed(&self) -> u32 {
        self.budget.consumed
    }

    /// Search steps still available this tick.
    #[must_use]
    pub const fn steps_remaining(&self) -> u32 {
        self.budget.remaining
    }

    /// Enqueues an agent for a forced re-plan.
    ///
    /// Returns whether the agent was newly enqueued; an agent appears in
    /// the queue at most once.
    pub fn queue_rethink(&mut self, agent: AgentId) -> bool {
        if !self.rethink.members.insert(agent) {
            return false;
        }
        self.rethink.order.push_back(agent);
        debug!(agent = agent.get(), queued = self.rethink.order.len(), "rethink queued");
        true
    }

    /// Agent at the head of the rethink queue, if any.
    #[must_use]
    pub fn peek_rethink(&self) -> Option<AgentId> {
        self.rethink.order.front().copied()
    }

    /// Removes and returns the head of the rethink queue.
    pub fn promote_rethink(&mut self) -> Option<AgentId> {
        let agent = self.rethink.order.pop_front()?;
        let _ = self.rethink.members.remove(&agent);
        Some(agent)
    }

    /// Drops an agent from the rethink queue wherever it sits.
    ///
    /// Called when the agent is removed from the simulation.
    pub fn cancel_rethink(&mut self, agent: AgentId) {
        if self.rethink.members.remove(&agent) {
            self.rethink.order.retain(|queued| *queued != agent);
        }
    }

    /// Reports whether the agent is awaiting a forced re-plan.
    #[must_use]
    pub fn is_rethink_queued(&self, agent: AgentId) -> bool {
        self.rethink.members.contains(&agent)
    }

    /// Number of agents awaiting a forced re-plan.
    #[must_use]
    pub fn rethink_len(&self) -> usize {
        self.rethink.order.len()
    }
}

#[derive(Debug, Default)]
struct StepBudget {
    remaining: u32,
    consumed: u32,
}

/// Ordered queue plus membership set so an agent is enqueued at most once.
#[derive(Debug, Default)]
struct RethinkQueue {
    order: VecDeque<AgentId>,
    members: HashSet<AgentId>,
}

#[cfg(test)]
mod tests {
    use super::Scheduler;
    use horde_nav_core::AgentId;

    #[test]
    fn budget_is_spent_until_reset() {
        let mut scheduler = Scheduler::new();
        assert!(!scheduler.try_consume_step());

        scheduler.begin_tick(3);
        assert!(scheduler.try_consume_step());
        assert!(scheduler.try_consume_step());
        assert!(scheduler.try_consume_step());
        assert!(!scheduler.try_consume_step());
        assert_eq!(scheduler.steps_consumed(), 3);

        scheduler.begin_tick(1);
        assert_eq!(scheduler.steps_consumed(), 0);
        assert!(scheduler.try_consume_step());
        assert!(!scheduler.try_consume_step());
    }

    #[test]
    fn rethink_queue_is_fifo_with_dedup() {
        let mut scheduler = Scheduler::new();
        let first = AgentId::new(1);
        let second = AgentId::new(2);

        assert!(scheduler.queue_rethink(first));
        assert!(scheduler.queue_rethink(second));
        assert!(!scheduler.queue_rethink(first), "duplicate must be rejected");
        assert_eq!(scheduler.rethink_len(), 2);

        assert_eq!(scheduler.peek_rethink(), Some(first));
        assert_eq!(scheduler.promote_rethink(), Some(first));
        assert_eq!(scheduler.promote_rethink(), Some(second));
        assert_eq!(scheduler.promote_rethink(), None);
    }

    #[test]
    fn promoted_agents_can_be_enqueued_again() {
        let mut scheduler = Scheduler::new();
        let agent = AgentId::new(7);

        assert!(scheduler.queue_rethink(agent));
        assert_eq!(scheduler.promote_rethink(), Some(agent));
        assert!(scheduler.queue_rethink(agent));
    }

    #[test]
    fn cancel_removes_queued_agent() {
        let mut scheduler = Scheduler::new();
        let first = AgentId::new(1);
        let second = AgentId::new(2);

        assert!(scheduler.queue_rethink(first));
        assert!(scheduler.queue_rethink(second));
        scheduler.cancel_rethink(first);
        assert!(!scheduler.is_rethink_queued(first));
        assert_eq!(scheduler.promote_rethink(), Some(second));
        assert_eq!(scheduler.promote_rethink(), None);
    }
}
