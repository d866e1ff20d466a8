#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Per-agent-class topology and the resumable incremental A* engine.
//!
//! The topology is a pure cost/adjacency function over packed cell
//! coordinates; the engine advances one frontier expansion per call so
//! callers can interleave arbitrarily expensive searches with the
//! surrounding simulation tick.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use horde_nav_core::{
    tuning::CostTuning, AgentId, AgentProfile, CellIndex, Cost, COST_SCALE, DIAG_DEN, DIAG_NUM,
};
use horde_nav_grid::Grid;

/// Fixed clockwise neighbour enumeration order starting north.
///
/// The order is part of the engine's determinism contract: identical inputs
/// must expand identical frontiers.
const NEIGHBOUR_OFFSETS: [(i32, i32); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Read-only view of the searching agent supplied to every topology query.
#[derive(Clone, Copy, Debug)]
pub struct AgentContext<'a> {
    /// Agent the query is evaluated for.
    pub agent: AgentId,
    /// Tile the agent currently stands on.
    pub origin: CellIndex,
    /// Archetype description of the agent.
    pub profile: &'a AgentProfile,
}

/// Cost/adjacency function over packed coordinates, one per agent class.
///
/// Both variants share the packing scheme and 8-neighbour adjacency; they
/// differ in which dynamic signals feed the per-step cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// Hostile creatures: terrain blended with danger, clumping, and
    /// attacking signals.
    Hostile,
    /// Friendly units: terrain only.
    Friendly,
}

impl Topology {
    /// Reports whether the agent may move from `from` onto `to`.
    ///
    /// A cell is closed when it lies outside the grid or a stacked terrain
    /// layer blocks movement. For non-wraith agents it is also closed when
    /// a different agent is attacking through it, or holds its reservation
    /// within the 3x3 neighbourhood of the agent's current tile.
    #[must_use]
    pub fn can_enter(&self, grid: &Grid, ctx: &AgentContext<'_>, to: CellIndex) -> bool {
        if !grid.in_bounds(to) {
            return false;
        }
        if grid.is_impassable_terrain(to) {
            return false;
        }
        if ctx.profile.wraith {
            return true;
        }
        if matches!(grid.attacker(to), Some(attacker) if attacker != ctx.agent) {
            return false;
        }
        if ctx.origin.chebyshev_distance(to) <= 1 {
            if matches!(grid.occupant(to), Some(holder) if holder != ctx.agent) {
                return false;
            }
        }
        true
    }

    /// Cost of one step between adjacent cells, in fixed-point units.
    #[must_use]
    pub fn cost(
        &self,
        grid: &Grid,
        tuning: &CostTuning,
        ctx: &AgentContext<'_>,
        from: CellIndex,
        to: CellIndex,
    ) -> Cost {
        let mut blended = self.base_cost(grid, tuning, ctx, to);

        if matches!(self, Self::Hostile) && !ctx.profile.wraith {
            blended = blended
                .saturating_add(danger_bias(grid, tuning, ctx, to))
                .saturating_add(clump_penalty(grid, tuning, ctx, to))
                .saturating_add(attack_penalty(grid, tuning, ctx, to));
        }

        if from.is_diagonal_to(to) {
            blended.scale(DIAG_NUM, DIAG_DEN)
        } else if ctx.profile.diagonal_preferred {
            blended.scale(tuning.straight_penalty_factor.max(1), 1)
        } else {
            blended
        }
    }

    fn base_cost(
        &self,
        grid: &Grid,
        tuning: &CostTuning,
        ctx: &AgentContext<'_>,
        to: CellIndex,
    ) -> Cost {
        if ctx.profile.wraith {
            Cost::from_units(tuning.ghost_cost)
        } else {
            Cost::from_terrain(grid.terrain_cost(to))
        }
    }

    /// Admissible straight-line estimate between two cells.
    ///
    /// Octile distance scaled by the smallest achievable per-step cost, in
    /// the same fixed-point units as [`Topology::cost`].
    #[must_use]
    pub fn heuristic(
        &self,
        tuning: &CostTuning,
        ctx: &AgentContext<'_>,
        from: CellIndex,
        to: CellIndex,
    ) -> Cost {
        let dx = (from.x() - to.x()).unsigned_abs();
        let dy = (from.y() - to.y()).unsigned_abs();
        let diagonal = dx.min(dy);
        let straight = dx.max(dy) - diagonal;

        let step_units = if ctx.profile.wraith {
            tuning.ghost_cost.min(COST_SCALE)
        } else {
            COST_SCALE
        };

        let diagonal_units = step_units as u64 * diagonal as u64 * DIAG_NUM as u64 / DIAG_DEN as u64;
        let straight_units = step_units as u64 * straight as u64;
        let total = diagonal_units.saturating_add(straight_units);
        Cost::from_units(u32::try_from(total).unwrap_or(u32::MAX))
    }

    /// Enumerates enterable neighbours of `node`, excluding its parent.
    ///
    /// Excluding the parent prevents trivial 2-cycles from re-entering the
    /// frontier. The buffer is cleared before use.
    pub fn neighbours(
        &self,
        grid: &Grid,
        ctx: &AgentContext<'_>,
        node: CellIndex,
        parent: Option<CellIndex>,
        out: &mut Vec<CellIndex>,
    ) {
        out.clear();
        for (dx, dy) in NEIGHBOUR_OFFSETS {
            if dx != 0 && dy != 0 && !ctx.profile.diagonal_allowed {
                continue;
            }
            let Some(next) = node.step(dx, dy) else {
                continue;
            };
            if Some(next) == parent {
                continue;
            }
            if self.can_enter(grid, ctx, next) {
                out.push(next);
            }
        }
    }
}

fn danger_bias(grid: &Grid, tuning: &CostTuning, ctx: &AgentContext<'_>, to: CellIndex) -> Cost {
    let danger = grid.danger(to) as u64;
    if danger == 0 {
        return Cost::ZERO;
    }
    let exposure = danger * tuning.danger_weight as u64 * ctx.profile.avoidance as u64
        / (100 * (ctx.profile.armor as u64 + 1));
    Cost::from_units(u32::try_from(exposure).unwrap_or(u32::MAX))
}

fn clump_penalty(grid: &Grid, tuning: &CostTuning, ctx: &AgentContext<'_>, to: CellIndex) -> Cost {
    if ctx.origin.chebyshev_distance(to) > tuning.clump_radius {
        return Cost::ZERO;
    }
    if grid.occupied_neighbour_count(to) < tuning.clump_neighbor_threshold {
        return Cost::ZERO;
    }
    Cost::from_units(tuning.clump_penalty)
}

fn attack_penalty(grid: &Grid, tuning: &CostTuning, ctx: &AgentContext<'_>, to: CellIndex) -> Cost {
    match grid.attacker(to) {
        Some(attacker) if attacker != ctx.agent => Cost::from_units(tuning.attack_penalty),
        _ => Cost::ZERO,
    }
}

/// Outcome of advancing a search by one frontier expansion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchStatus {
    /// The frontier still holds candidates; call again to continue.
    Searching,
    /// The goal was reached; the path awaits [`PathSearch::take_path`].
    Succeeded,
    /// The open set emptied without reaching the goal.
    Failed,
}

/// Resumable best-first search over a topology.
///
/// Owns no more state than one in-flight search. Suspension is structural:
/// a caller that stops invoking [`PathSearch::step`] leaves the frontier
/// intact and resumes later, so a tick's worst-case search cost is bounded
/// by the caller's step budget rather than the map size.
#[derive(Debug, Default)]
pub struct PathSearch {
    state: SearchState,
}

#[derive(Debug, Default)]
enum SearchState {
    #[default]
    Idle,
    Searching(Frontier),
    Succeeded(Vec<CellIndex>),
    Failed,
}

#[derive(Debug)]
struct Frontier {
    goal: CellIndex,
    open: BinaryHeap<OpenEntry>,
    records: HashMap<CellIndex, NodeRecord>,
    scratch: Vec<CellIndex>,
    seq: u64,
}

#[derive(Clone, Copy, Debug)]
struct NodeRecord {
    g: Cost,
    parent: Option<CellIndex>,
    closed: bool,
}

#[derive(Clone, Copy, Debug)]
struct OpenEntry {
    f: Cost,
    seq: u64,
    cell: CellIndex,
    g: Cost,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.seq == other.seq
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behaviour; insertion order breaks f ties.
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PathSearch {
    /// Creates an idle search engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new search, discarding any in-flight one.
    pub fn begin(&mut self, start: CellIndex, goal: CellIndex) {
        let mut open = BinaryHeap::new();
        let mut records = HashMap::new();
        open.push(OpenEntry {
            f: Cost::ZERO,
            seq: 0,
            cell: start,
            g: Cost::ZERO,
        });
        let _ = records.insert(
            start,
            NodeRecord {
                g: Cost::ZERO,
                parent: None,
                closed: false,
            },
        );
        self.state = SearchState::Searching(Frontier {
            goal,
            open,
            records,
            scratch: Vec::with_capacity(8),
            seq: 0,
        });
    }

    /// Abandons all search state.
    pub fn reset(&mut self) {
        self.state = SearchState::Idle;
    }

    /// Reports whether no search is in flight or pending consumption.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, SearchState::Idle)
    }

    /// Advances the search by exactly one frontier expansion.
    ///
    /// Calling after a terminal result re-reports that result; calling with
    /// no search begun reports [`SearchStatus::Failed`].
    pub fn step(
        &mut self,
        topology: Topology,
        grid: &Grid,
        tuning: &CostTuning,
        ctx: &AgentContext<'_>,
    ) -> SearchStatus {
        let advance = match &mut self.state {
            SearchState::Searching(frontier) => expand_once(frontier, topology, grid, tuning, ctx),
            SearchState::Succeeded(_) => return SearchStatus::Succeeded,
            SearchState::Idle | SearchState::Failed => return SearchStatus::Failed,
        };

        match advance {
            Advance::Expanded => SearchStatus::Searching,
            Advance::Exhausted => {
                self.state = SearchState::Failed;
                SearchStatus::Failed
            }
            Advance::Reached(path) => {
                self.state = SearchState::Succeeded(path);
                SearchStatus::Succeeded
            }
        }
    }

    /// Consumes a successful result, returning the path in root-to-goal
    /// order with the start cell excluded.
    pub fn take_path(&mut self) -> Option<Vec<CellIndex>> {
        match std::mem::take(&mut self.state) {
            SearchState::Succeeded(path) => Some(path),
            other => {
                self.state = other;
                None
            }
        }
    }
}

enum Advance {
    Expanded,
    Exhausted,
    Reached(Vec<CellIndex>),
}

fn expand_once(
    frontier: &mut Frontier,
    topology: Topology,
    grid: &Grid,
    tuning: &CostTuning,
    ctx: &AgentContext<'_>,
) -> Advance {
    loop {
        let Some(entry) = frontier.open.pop() else {
            return Advance::Exhausted;
        };

        let record = match frontier.records.get_mut(&entry.cell) {
            Some(record) => record,
            None => continue,
        };
        // Superseded heap entries are skipped without counting as an
        // expansion.
        if record.closed || record.g != entry.g {
            continue;
        }
        record.closed = true;
        let parent = record.parent;

        if entry.cell == frontier.goal {
            return Advance::Reached(reconstruct(&frontier.records, frontier.goal));
        }

        let mut scratch = std::mem::take(&mut frontier.scratch);
        topology.neighbours(grid, ctx, entry.cell, parent, &mut scratch);
        for &next in &scratch {
            let step_cost = topology.cost(grid, tuning, ctx, entry.cell, next);
            let g = entry.g.saturating_add(step_cost);
            let improved = match frontier.records.get(&next) {
                Some(existing) => !existing.closed && g < existing.g,
                None => true,
            };
            if !improved {
                continue;
            }
            let _ = frontier.records.insert(
                next,
                NodeRecord {
                    g,
                    parent: Some(entry.cell),
                    closed: false,
                },
            );
            frontier.seq += 1;
            frontier.open.push(OpenEntry {
                f: g.saturating_add(topology.heuristic(tuning, ctx, next, frontier.goal)),
                seq: frontier.seq,
                cell: next,
                g,
            });
        }
        frontier.scratch = scratch;

        return Advance::Expanded;
    }
}

fn reconstruct(records: &HashMap<CellIndex, NodeRecord>, goal: CellIndex) -> Vec<CellIndex> {
    let mut path = Vec::new();
    let mut cursor = Some(goal);
    while let Some(cell) = cursor {
        let Some(record) = records.get(&cell) else {
            break;
        };
        // The start cell has no parent and is not part of the path.
        if record.parent.is_some() {
            path.push(cell);
        }
        cursor = record.parent;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::{AgentContext, Topology};
    use horde_nav_core::{tuning::CostTuning, AgentId, AgentProfile, CellIndex, Cost};
    use horde_nav_grid::Grid;

    fn cell(x: i32, y: i32) -> CellIndex {
        CellIndex::pack(x, y)
    }

    fn context<'a>(profile: &'a AgentProfile, origin: CellIndex) -> AgentContext<'a> {
        AgentContext {
            agent: AgentId::new(0),
            origin,
            profile,
        }
    }

    #[test]
    fn occupied_cells_block_only_within_adjacency() {
        let mut grid = Grid::new(10, 10).expect("grid");
        assert!(grid.reserve(AgentId::new(9), cell(1, 1)));
        assert!(grid.reserve(AgentId::new(8), cell(5, 5)));

        let profile = AgentProfile::hostile(0.1);
        let ctx = context(&profile, cell(0, 0));
        let topology = Topology::Hostile;

        assert!(!topology.can_enter(&grid, &ctx, cell(1, 1)));
        // A reservation outside the 3x3 neighbourhood does not close cells.
        assert!(topology.can_enter(&grid, &ctx, cell(5, 5)));
    }

    #[test]
    fn wraiths_ignore_occupancy_and_attacking() {
        let mut grid = Grid::new(6, 6).expect("grid");
        assert!(grid.reserve(AgentId::new(9), cell(1, 0)));
        grid.set_attacking(AgentId::new(9), cell(0, 1));

        let mut profile = AgentProfile::hostile(0.1);
        profile.wraith = true;
        let ctx = context(&profile, cell(0, 0));
        let topology = Topology::Hostile;

        assert!(topology.can_enter(&grid, &ctx, cell(1, 0)));
        assert!(topology.can_enter(&grid, &ctx, cell(0, 1)));
        // Static terrain still closes cells for wraiths.
        let _ = grid.place_structure(cell(1, 1), 1, 1);
        assert!(!topology.can_enter(&grid, &ctx, cell(1, 1)));
    }

    #[test]
    fn attacking_cells_are_closed_for_other_agents() {
        let mut grid = Grid::new(6, 6).expect("grid");
        grid.set_attacking(AgentId::new(3), cell(1, 0));

        let profile = AgentProfile::hostile(0.1);
        let ctx = context(&profile, cell(0, 0));
        assert!(!Topology::Hostile.can_enter(&grid, &ctx, cell(1, 0)));

        let own = AgentContext {
            agent: AgentId::new(3),
            ..ctx
        };
        assert!(Topology::Hostile.can_enter(&grid, &own, cell(1, 0)));
    }

    #[test]
    fn hostile_cost_adds_danger_and_attack_terms() {
        let mut grid = Grid::new(8, 8).expect("grid");
        let tuning = CostTuning::default();
        let profile = AgentProfile::hostile(0.1);
        let ctx = context(&profile, cell(0, 0));
        let topology = Topology::Hostile;

        let plain = topology.cost(&grid, &tuning, &ctx, cell(0, 0), cell(1, 0));
        assert_eq!(plain, Cost::from_units(100));

        grid.raise_danger(cell(1, 0), 100);
        let dangerous = topology.cost(&grid, &tuning, &ctx, cell(0, 0), cell(1, 0));
        assert!(dangerous > plain);

        grid.set_attacking(AgentId::new(5), cell(1, 0));
        let contested = topology.cost(&grid, &tuning, &ctx, cell(0, 0), cell(1, 0));
        assert_eq!(
            contested.units(),
            dangerous.units() + tuning.attack_penalty
        );
    }

    #[test]
    fn friendly_cost_ignores_danger() {
        let mut grid = Grid::new(8, 8).expect("grid");
        grid.raise_danger(cell(1, 0), 500);

        let tuning = CostTuning::default();
        let profile = AgentProfile::gidlet(0.1);
        let ctx = context(&profile, cell(0, 0));

        let cost = Topology::Friendly.cost(&grid, &tuning, &ctx, cell(0, 0), cell(1, 0));
        assert_eq!(cost, Cost::from_units(100));
    }

    #[test]
    fn clump_penalty_requires_proximity_and_crowding() {
        let mut grid = Grid::new(10, 10).expect("grid");
        let tuning = CostTuning::default();
        let profile = AgentProfile::hostile(0.1);
        let topology = Topology::Hostile;

        // Crowd four of the eight neighbours of (2, 2).
        for (index, (dx, dy)) in [(1, 0), (0, 1), (1, 1), (-1, 0)].iter().enumerate() {
            assert!(grid.reserve(AgentId::new(10 + index as u32), cell(2 + dx, 2 + dy)));
        }

        let near = context(&profile, cell(1, 1));
        let crowded = topology.cost(&grid, &tuning, &near, cell(1, 2), cell(2, 2));
        let far = context(&profile, cell(8, 8));
        let distant = topology.cost(&grid, &tuning, &far, cell(1, 2), cell(2, 2));
        assert_eq!(crowded.units(), distant.units() + tuning.clump_penalty);
    }

    #[test]
    fn diagonal_steps_scale_by_sqrt_two() {
        let grid = Grid::new(8, 8).expect("grid");
        let tuning = CostTuning::default();
        let profile = AgentProfile::hostile(0.1);
        let ctx = context(&profile, cell(0, 0));
        let topology = Topology::Hostile;

        let straight = topology.cost(&grid, &tuning, &ctx, cell(0, 0), cell(1, 0));
        let diagonal = topology.cost(&grid, &tuning, &ctx, cell(0, 0), cell(1, 1));
        assert_eq!(diagonal.units(), straight.units() * 141 / 100);
    }

    #[test]
    fn diagonal_preference_penalises_straight_steps() {
        let grid = Grid::new(8, 8).expect("grid");
        let tuning = CostTuning::default();
        let mut profile = AgentProfile::hostile(0.1);
        profile.diagonal_preferred = true;
        let ctx = context(&profile, cell(0, 0));

        let straight = Topology::Hostile.cost(&grid, &tuning, &ctx, cell(0, 0), cell(1, 0));
        assert_eq!(
            straight.units(),
            100 * tuning.straight_penalty_factor
        );
    }

    #[test]
    fn neighbours_exclude_parent_and_blocked_cells() {
        let mut grid = Grid::new(5, 5).expect("grid");
        let _ = grid.place_structure(cell(2, 1), 1, 1);

        let profile = AgentProfile::hostile(0.1);
        let ctx = context(&profile, cell(1, 1));
        let mut out = Vec::new();
        Topology::Hostile.neighbours(&grid, &ctx, cell(1, 1), Some(cell(0, 1)), &mut out);

        assert!(!out.contains(&cell(0, 1)), "parent must be excluded");
        assert!(!out.contains(&cell(2, 1)), "blocked cell must be excluded");
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn cardinal_only_agents_skip_diagonals() {
        let grid = Grid::new(5, 5).expect("grid");
        let mut profile = AgentProfile::hostile(0.1);
        profile.diagonal_allowed = false;
        let ctx = context(&profile, cell(2, 2));

        let mut out = Vec::new();
        Topology::Hostile.neighbours(&grid, &ctx, cell(2, 2), None, &mut out);
        assert_eq!(
            out,
            vec![cell(2, 1), cell(3, 2), cell(2, 3), cell(1, 2)]
        );
    }
}
