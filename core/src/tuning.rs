//! Tuning surface for the pathfinding and movement core.
//!
//! Every gameplay-balance constant lives here as configurable data. Defaults
//! are the canonical values; none of them is a correctness invariant.

use serde::{Deserialize, Serialize};

/// Aggregated tuning knobs covering cost shaping, budgets, and pacing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavTuning {
    /// Shapes the per-step cost blend used by the hostile topology.
    pub cost: CostTuning,
    /// Bounds per-tick search work and failure handling.
    pub budget: BudgetTuning,
    /// Governs bursts, dwells, and the speed model.
    pub pacing: PacingTuning,
}

/// Parameters of the per-step cost blend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostTuning {
    /// Scales the danger field's contribution; raising this makes agents detour wider around lethal ground.
    pub danger_weight: u32,
    /// Flat penalty added when a nearby destination cell is hemmed in by occupied neighbours.
    pub clump_penalty: u32,
    /// Chebyshev radius around the agent within which the clumping penalty applies.
    pub clump_radius: u32,
    /// Number of occupied neighbours (out of 8) that triggers the clumping penalty.
    pub clump_neighbor_threshold: u32,
    /// Flat penalty for routing through a cell another agent is attacking.
    pub attack_penalty: u32,
    /// Multiplier applied to straight steps for diagonal-preferring agents.
    pub straight_penalty_factor: u32,
    /// Flat per-step terrain cost paid by wraith-class agents, in fixed-point units.
    pub ghost_cost: u32,
}

impl Default for CostTuning {
    fn default() -> Self {
        Self {
            danger_weight: 2,
            clump_penalty: 250,
            clump_radius: 3,
            clump_neighbor_threshold: 4,
            attack_penalty: 400,
            straight_penalty_factor: 5,
            ghost_cost: 100,
        }
    }
}

/// Bounds on per-tick search work and failure handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetTuning {
    /// Maximum frontier expansions a single controller may perform per tick.
    pub per_agent_steps: u32,
    /// Maximum frontier expansions shared by every controller per tick.
    pub global_steps: u32,
    /// Consecutive search failures after which an agent is reported stuck.
    pub fail_ceiling: u32,
    /// Shortest randomized backoff after a failed search, in ticks.
    pub backoff_min_ticks: u32,
    /// Longest randomized backoff after a failed search, in ticks.
    pub backoff_max_ticks: u32,
}

impl Default for BudgetTuning {
    fn default() -> Self {
        Self {
            per_agent_steps: 32,
            global_steps: 256,
            fail_ceiling: 100,
            backoff_min_ticks: 4,
            backoff_max_ticks: 24,
        }
    }
}

/// Burst, dwell, and speed-model parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingTuning {
    /// Fewest consecutive tile moves in a burst before a full dwell.
    pub burst_min: u32,
    /// Most consecutive tile moves in a burst before a full dwell.
    pub burst_max: u32,
    /// Shortest full dwell between bursts, in ticks.
    pub dwell_min_ticks: u32,
    /// Longest full dwell between bursts, in ticks.
    pub dwell_max_ticks: u32,
    /// Hard floor on ticks spent crossing one tile, preventing teleport-like jitter.
    pub min_ticks_per_tile: u32,
    /// Speed multiplier at the easiest difficulty setting.
    pub speed_min: f32,
    /// Speed multiplier at the hardest difficulty setting.
    pub speed_max: f32,
    /// Ticks of wave time over which the ramp-up bonus reaches full strength.
    pub ramp_full_ticks: u32,
    /// Speed bonus fraction granted once the wave ramp completes.
    pub ramp_bonus: f32,
    /// Chebyshev radius around a rush target inside which agents speed up.
    pub rush_radius: u32,
    /// Speed multiplier applied near a rush target.
    pub rush_bonus: f32,
    /// Divisor applied to speed while an agent is tangled.
    pub tangle_divisor: f32,
    /// Maximum speed bonus fraction granted by standing on max-danger ground.
    pub danger_speedup_max: f32,
}

impl Default for PacingTuning {
    fn default() -> Self {
        Self {
            burst_min: 2,
            burst_max: 6,
            dwell_min_ticks: 6,
            dwell_max_ticks: 20,
            min_ticks_per_tile: 3,
            speed_min: 0.6,
            speed_max: 1.4,
            ramp_full_ticks: 5_400,
            ramp_bonus: 0.5,
            rush_radius: 6,
            rush_bonus: 1.3,
            tangle_divisor: 4.0,
            danger_speedup_max: 0.4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NavTuning;

    #[test]
    fn defaults_keep_budgets_and_ranges_coherent() {
        let tuning = NavTuning::default();
        assert!(tuning.budget.per_agent_steps <= tuning.budget.global_steps);
        assert!(tuning.budget.backoff_min_ticks <= tuning.budget.backoff_max_ticks);
        assert!(tuning.pacing.burst_min <= tuning.pacing.burst_max);
        assert!(tuning.pacing.dwell_min_ticks <= tuning.pacing.dwell_max_ticks);
        assert!(tuning.pacing.speed_min <= tuning.pacing.speed_max);
        assert!(tuning.pacing.min_ticks_per_tile >= 1);
    }

    #[test]
    fn tuning_round_trips_through_bincode() {
        let tuning = NavTuning::default();
        let bytes = bincode::serialize(&tuning).expect("serialize");
        let restored: NavTuning = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(restored, tuning);
    }
}
