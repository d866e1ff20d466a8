#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Per-agent movement controllers driven by a shared tick budget.
//!
//! Each registered agent owns one controller: a small state machine that
//! decides when to invoke the search engine, consumes the resulting path one
//! tile at a time, interpolates sub-tile positions between tile centers, and
//! swaps occupancy reservations as it goes. The system ticks every
//! controller in registration order, which together with the deterministic
//! search engine and the seeded per-agent RNGs makes whole runs replayable.

use std::collections::{HashMap, VecDeque};

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, warn};

use horde_nav_core::{
    tuning::{NavTuning, PacingTuning},
    AgentId, AgentProfile, CellIndex, CellRect, Faction, NavEvent, MAX_DANGER,
};
use horde_nav_grid::Grid;
use horde_nav_system_scheduler::Scheduler;
use horde_nav_system_search::{AgentContext, PathSearch, SearchStatus, Topology};

/// Per-tick simulation inputs shared by every controller.
#[derive(Clone, Copy, Debug)]
pub struct TickContext<'a> {
    /// Difficulty setting in `[0, 1]` interpolating the speed range.
    pub difficulty: f32,
    /// Ticks elapsed since the current wave began.
    pub wave_ticks: u32,
    /// High-value cells agents rush when close by.
    pub rush_targets: &'a [CellIndex],
}

/// Errors raised when registering an agent with the movement system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The agent already owns a controller.
    #[error("agent is already registered")]
    Duplicate,
    /// The spawn cell lies outside the grid or inside blocking terrain.
    #[error("spawn cell is not traversable")]
    Blocked,
    /// Another agent holds the spawn cell's occupancy reservation.
    #[error("spawn cell is already reserved")]
    Reserved,
}

/// Owns every movement controller and drives them once per tick.
#[derive(Debug)]
pub struct MovementSystem {
    controllers: Vec<MovementController>,
    world_seed: u64,
}

impl MovementSystem {
    /// Creates an empty system; the seed fixes every controller's RNG.
    #[must_use]
    pub fn new(world_seed: u64) -> Self {
        Self {
            controllers: Vec::new(),
            world_seed,
        }
    }

    /// Registers a controller for a freshly spawned agent.
    ///
    /// Reserving agents claim their spawn cell immediately; the claim is
    /// the one reservation the controller holds from here on.
    pub fn register(
        &mut self,
        agent: AgentId,
        profile: AgentProfile,
        spawn_cell: CellIndex,
        grid: &mut Grid,
    ) -> Result<(), SpawnError> {
        if self.find(agent).is_some() {
            return Err(SpawnError::Duplicate);
        }
        if grid.is_impassable_terrain(spawn_cell) {
            return Err(SpawnError::Blocked);
        }
        if profile.reserves_occupancy() && !grid.reserve(agent, spawn_cell) {
            return Err(SpawnError::Reserved);
        }

        let seed = self
            .world_seed
            .wrapping_add((agent.get() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        self.controllers.push(MovementController {
            agent,
            profile,
            topology: match profile.faction {
                Faction::Hostile => Topology::Hostile,
                Faction::Friendly => Topology::Friendly,
            },
            cell: spawn_cell,
            position: tile_center(spawn_cell),
            goal: None,
            planned_goal: None,
            path: VecDeque::new(),
            path_bounds: None,
            search: PathSearch::new(),
            motion: Motion::Paused { dwell: 0 },
            burst_remaining: 0,
            fail_count: 0,
            stuck_reported: false,
            tangled: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
        });
        Ok(())
    }

    /// Removes an agent, releasing its reservation exactly once.
    ///
    /// Also clears any attacking flags the agent held and drops it from the
    /// rethink queue. Returns whether a controller existed.
    pub fn remove(&mut self, agent: AgentId, grid: &mut Grid, scheduler: &mut Scheduler) -> bool {
        let Some(index) = self.find(agent) else {
            return false;
        };
        let controller = self.controllers.remove(index);
        if controller.profile.reserves_occupancy() {
            grid.release(agent, controller.cell);
        }
        grid.clear_all_attacking(agent);
        scheduler.cancel_rethink(agent);
        true
    }

    /// Sets or replaces the agent's pursuit goal.
    ///
    /// A change is detected by comparison on the next idle tick and forces
    /// a re-plan; re-sending the same goal is a no-op.
    pub fn set_goal(&mut self, agent: AgentId, goal: CellIndex) {
        if let Some(controller) = self.find_mut(agent) {
            controller.goal = Some(goal);
        }
    }

    /// Clears the agent's pursuit goal; the controller idles in place.
    pub fn clear_goal(&mut self, agent: AgentId) {
        if let Some(controller) = self.find_mut(agent) {
            controller.goal = None;
        }
    }

    /// Applies or lifts the tangled slow status.
    pub fn set_tangled(&mut self, agent: AgentId, tangled: bool) {
        if let Some(controller) = self.find_mut(agent) {
            controller.tangled = tangled;
        }
    }

    /// Displaces the agent to an arbitrary position, from which it is
    /// interpolated back to its reserved cell before resuming.
    pub fn knock_back(&mut self, agent: AgentId, from: Vec2, tuning: &NavTuning) {
        let Some(controller) = self.find_mut(agent) else {
            return;
        };
        let target = tile_center(controller.cell);
        let distance = (target - from).length();
        let ticks = ((distance.max(0.1)) * tuning.pacing.min_ticks_per_tile as f32)
            .ceil()
            .max(1.0) as u32;
        controller.position = from;
        controller.motion = Motion::KnockedBack {
            from,
            remaining: ticks,
            total: ticks,
        };
    }

    /// Sub-tile position of the agent in tile units, if registered.
    #[must_use]
    pub fn position(&self, agent: AgentId) -> Option<Vec2> {
        self.find(agent).map(|index| self.controllers[index].position)
    }

    /// Tile the agent currently claims, if registered.
    #[must_use]
    pub fn current_cell(&self, agent: AgentId) -> Option<CellIndex> {
        self.find(agent).map(|index| self.controllers[index].cell)
    }

    /// Reports whether the agent still holds a cached path.
    #[must_use]
    pub fn has_cached_path(&self, agent: AgentId) -> bool {
        self.find(agent)
            .map_or(false, |index| !self.controllers[index].path.is_empty())
    }

    /// Number of registered controllers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Reports whether no controllers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Advances every controller once, in registration order.
    ///
    /// Resets the scheduler's shared budget first, so the reset happens
    /// exactly once per tick and always before the first controller
    /// consumes budget.
    pub fn tick(
        &mut self,
        grid: &mut Grid,
        scheduler: &mut Scheduler,
        tuning: &NavTuning,
        ctx: &TickContext<'_>,
        out_events: &mut Vec<NavEvent>,
    ) {
        scheduler.begin_tick(tuning.budget.global_steps);

        let mut board = GidletBoard::default();
        board.rebuild(&self.controllers);

        for controller in &mut self.controllers {
            controller.tick(grid, scheduler, tuning, ctx, &mut board, out_events);
        }
    }

    /// Enqueues every controller whose cached path crosses the edited region.
    ///
    /// Bounding-box fast path first, then per-waypoint containment. The
    /// queue is the only state this touches; each affected controller
    /// discards its stale path when its queue entry is promoted.
    pub fn invalidate_region(
        &self,
        region: CellRect,
        scheduler: &mut Scheduler,
        out_events: &mut Vec<NavEvent>,
    ) {
        let mut enqueued = 0_usize;
        for controller in &self.controllers {
            let Some(bounds) = controller.path_bounds else {
                continue;
            };
            if !bounds.intersects(&region) {
                continue;
            }
            if !controller.path.iter().any(|cell| region.contains(*cell)) {
                continue;
            }
            if scheduler.queue_rethink(controller.agent) {
                enqueued += 1;
                out_events.push(NavEvent::RethinkQueued {
                    agent: controller.agent,
                });
            }
        }
        debug!(enqueued, "region invalidation scanned cached paths");
    }

    fn find(&self, agent: AgentId) -> Option<usize> {
        self.controllers
            .iter()
            .position(|controller| controller.agent == agent)
    }

    fn find_mut(&mut self, agent: AgentId) -> Option<&mut MovementController> {
        self.controllers
            .iter_mut()
            .find(|controller| controller.agent == agent)
    }
}

/// Interpolation and planning state of one agent.
#[derive(Debug)]
struct MovementController {
    agent: AgentId,
    profile: AgentProfile,
    topology: Topology,
    /// Tile the agent claims: the reserved cell for reserving agents, the
    /// settled cell for everyone else.
    cell: CellIndex,
    position: Vec2,
    goal: Option<CellIndex>,
    /// Goal the current plan was computed against, for retarget detection.
    planned_goal: Option<CellIndex>,
    path: VecDeque<CellIndex>,
    path_bounds: Option<CellRect>,
    search: PathSearch,
    motion: Motion,
    burst_remaining: u32,
    fail_count: u32,
    stuck_reported: bool,
    tangled: bool,
    rng: ChaCha8Rng,
}

#[derive(Clone, Copy, Debug)]
enum Motion {
    /// Dwelling at a tile, counting down before acting again.
    Paused { dwell: u32 },
    /// Search in flight; no position change.
    Thinking,
    /// Interpolating between tile centers.
    Moving {
        from: Vec2,
        to: Vec2,
        remaining: u32,
        total: u32,
        dest: CellIndex,
        from_cell: CellIndex,
    },
    /// External displacement returning to the claimed cell.
    KnockedBack {
        from: Vec2,
        remaining: u32,
        total: u32,
    },
}

impl MovementController {
    fn tick(
        &mut self,
        grid: &mut Grid,
        scheduler: &mut Scheduler,
        tuning: &NavTuning,
        ctx: &TickContext<'_>,
        board: &mut GidletBoard,
        out_events: &mut Vec<NavEvent>,
    ) {
        if !self.is_displacing() {
            if scheduler.peek_rethink() == Some(self.agent) {
                let _ = scheduler.promote_rethink();
                self.discard_plan();
            }
            if self.planned_goal.is_some() && self.goal != self.planned_goal {
                self.discard_plan();
            }
        }

        match self.motion {
            Motion::Paused { dwell } => {
                if dwell > 0 {
                    self.motion = Motion::Paused { dwell: dwell - 1 };
                    return;
                }
                let Some(goal) = self.goal else {
                    return;
                };
                if self.cell == goal {
                    return;
                }
                if !self.advance_path(grid, tuning, ctx, board) {
                    self.discard_plan();
                    self.think(grid, scheduler, tuning, ctx, board, out_events);
                }
            }
            Motion::Thinking => self.think(grid, scheduler, tuning, ctx, board, out_events),
            Motion::Moving { .. } => self.advance_move(grid, tuning, ctx, board, out_events),
            Motion::KnockedBack {
                from,
                remaining,
                total,
            } => {
                let remaining = remaining.saturating_sub(1);
                let target = tile_center(self.cell);
                let progress = (total - remaining) as f32 / total as f32;
                self.position = from.lerp(target, progress.min(1.0));
                if remaining > 0 {
                    self.motion = Motion::KnockedBack {
                        from,
                        remaining,
                        total,
                    };
                } else {
                    self.position = target;
                    self.motion = Motion::Paused {
                        dwell: draw_range(
                            &mut self.rng,
                            tuning.pacing.dwell_min_ticks,
                            tuning.pacing.dwell_max_ticks,
                        ),
                    };
                }
            }
        }
    }

    /// Drives the in-flight search within the local and global budgets.
    fn think(
        &mut self,
        grid: &mut Grid,
        scheduler: &mut Scheduler,
        tuning: &NavTuning,
        ctx: &TickContext<'_>,
        board: &mut GidletBoard,
        out_events: &mut Vec<NavEvent>,
    ) {
        self.motion = Motion::Thinking;
        let Some(goal) = self.goal else {
            self.motion = Motion::Paused { dwell: 0 };
            return;
        };

        if self.search.is_idle() {
            self.search.begin(self.cell, goal);
            self.planned_goal = Some(goal);
        }

        let mut local_steps = 0;
        while local_steps < tuning.budget.per_agent_steps {
            if !scheduler.try_consume_step() {
                // Global budget exhausted: stay SEARCHING, resume next tick.
                return;
            }
            local_steps += 1;

            let actx = AgentContext {
                agent: self.agent,
                origin: self.cell,
                profile: &self.profile,
            };
            match self.search.step(self.topology, grid, &tuning.cost, &actx) {
                SearchStatus::Searching => continue,
                SearchStatus::Succeeded => {
                    let hops = self.search.take_path().unwrap_or_default();
                    self.install_path(hops);
                    self.fail_count = 0;
                    self.stuck_reported = false;
                    if self.path.is_empty() {
                        out_events.push(NavEvent::ArrivedAtGoal {
                            agent: self.agent,
                            goal,
                        });
                        self.pause_after_burst(tuning);
                    } else if !self.advance_path(grid, tuning, ctx, board) {
                        // The world moved under the fresh plan; replan.
                        self.discard_plan();
                        self.motion = Motion::Thinking;
                    }
                    return;
                }
                SearchStatus::Failed => {
                    self.note_search_failure(tuning, out_events);
                    return;
                }
            }
        }
    }

    /// Advances the current interpolation and handles tile arrival.
    fn advance_move(
        &mut self,
        grid: &mut Grid,
        tuning: &NavTuning,
        ctx: &TickContext<'_>,
        board: &mut GidletBoard,
        out_events: &mut Vec<NavEvent>,
    ) {
        let Motion::Moving {
            from,
            to,
            remaining,
            total,
            dest,
            from_cell,
        } = self.motion
        else {
            return;
        };

        let remaining = remaining.saturating_sub(1);
        let progress = (total - remaining) as f32 / total as f32;
        self.position = from.lerp(to, progress.min(1.0));

        if remaining > 0 {
            self.motion = Motion::Moving {
                from,
                to,
                remaining,
                total,
                dest,
                from_cell,
            };
            return;
        }

        if self.profile.gidlet {
            if board.settled_conflict(self.agent, dest) {
                // A sibling already holds the cell; fall back and replan.
                self.position = from;
                self.discard_plan();
                self.motion = Motion::Thinking;
                return;
            }
            if board.inbound_conflict(self.agent, dest) {
                // Yield to the senior sibling and retry the final step next
                // tick.
                self.position = from;
                self.motion = Motion::Moving {
                    from,
                    to,
                    remaining: 1,
                    total,
                    dest,
                    from_cell,
                };
                return;
            }
            board.settle(self.agent, from_cell, dest);
        }

        if !self.profile.reserves_occupancy() {
            self.cell = dest;
        }
        self.position = to;
        out_events.push(NavEvent::Stepped {
            agent: self.agent,
            from: from_cell,
            to: dest,
        });

        if self.goal == Some(dest) {
            out_events.push(NavEvent::ArrivedAtGoal {
                agent: self.agent,
                goal: dest,
            });
            self.discard_plan();
            self.pause_after_burst(tuning);
            return;
        }

        if self.planned_goal.is_some() && self.goal != self.planned_goal {
            self.discard_plan();
            self.motion = Motion::Thinking;
            return;
        }

        self.burst_remaining = self.burst_remaining.saturating_sub(1);
        if self.burst_remaining == 0 {
            self.pause_after_burst(tuning);
            return;
        }

        if !self.advance_path(grid, tuning, ctx, board) {
            self.discard_plan();
            self.motion = Motion::Thinking;
        }
    }

    /// Consumes the head of the cached path, re-validating it against the
    /// current world and swapping the occupancy reservation.
    ///
    /// Returns false when the hop is stale so the caller re-plans from
    /// scratch; the world may have changed since the path was computed.
    fn advance_path(
        &mut self,
        grid: &mut Grid,
        tuning: &NavTuning,
        ctx: &TickContext<'_>,
        board: &mut GidletBoard,
    ) -> bool {
        let Some(&next_cell) = self.path.front() else {
            return false;
        };
        if !self.cell.is_adjacent_8(next_cell) {
            return false;
        }
        let actx = AgentContext {
            agent: self.agent,
            origin: self.cell,
            profile: &self.profile,
        };
        if !self.topology.can_enter(grid, &actx, next_cell) {
            return false;
        }

        if self.profile.reserves_occupancy() {
            let held = self.cell;
            grid.release(self.agent, held);
            if !grid.reserve(self.agent, next_cell) {
                // Never hold zero reservations outside this swap.
                let _ = grid.reserve(self.agent, held);
                return false;
            }
        }

        let _ = self.path.pop_front();
        let from_cell = self.cell;
        let diagonal = from_cell.is_diagonal_to(next_cell);
        let ticks = travel_ticks(
            &self.profile,
            &tuning.pacing,
            ctx,
            grid,
            from_cell,
            next_cell,
            diagonal,
            self.tangled,
        );

        if self.profile.reserves_occupancy() {
            self.cell = next_cell;
        }
        if self.profile.gidlet {
            board.depart(self.agent, from_cell, next_cell);
        }
        self.motion = Motion::Moving {
            from: self.position,
            to: tile_center(next_cell),
            remaining: ticks,
            total: ticks,
            dest: next_cell,
            from_cell,
        };
        true
    }

    fn note_search_failure(&mut self, tuning: &NavTuning, out_events: &mut Vec<NavEvent>) {
        self.search.reset();
        self.fail_count = self.fail_count.saturating_add(1);
        out_events.push(NavEvent::SearchFailed { agent: self.agent });

        if self.fail_count >= tuning.budget.fail_ceiling && !self.stuck_reported {
            self.stuck_reported = true;
            warn!(
                agent = self.agent.get(),
                failures = self.fail_count,
                "agent exceeded the failure ceiling"
            );
            out_events.push(NavEvent::AgentStuck {
                agent: self.agent,
                failures: self.fail_count,
            });
        }

        self.motion = Motion::Paused {
            dwell: draw_range(
                &mut self.rng,
                tuning.budget.backoff_min_ticks,
                tuning.budget.backoff_max_ticks,
            ),
        };
    }

    /// Starts a fresh burst and takes a full dwell.
    fn pause_after_burst(&mut self, tuning: &NavTuning) {
        self.burst_remaining = draw_range(
            &mut self.rng,
            tuning.pacing.burst_min,
            tuning.pacing.burst_max,
        );
        self.motion = Motion::Paused {
            dwell: draw_range(
                &mut self.rng,
                tuning.pacing.dwell_min_ticks,
                tuning.pacing.dwell_max_ticks,
            ),
        };
    }

    fn discard_plan(&mut self) {
        self.path.clear();
        self.path_bounds = None;
        self.planned_goal = None;
        self.search.reset();
    }

    fn install_path(&mut self, hops: Vec<CellIndex>) {
        self.path_bounds = path_bounds(&hops);
        self.path = hops.into();
    }

    fn is_displacing(&self) -> bool {
        matches!(
            self.motion,
            Motion::Moving { .. } | Motion::KnockedBack { .. }
        )
    }
}

/// Shared view of gidlet claims used for the sub-tile overlap rollback.
///
/// Rebuilt at the start of every tick and updated as gidlets move, so two
/// gidlets arriving at one cell in the same tick resolve deterministically:
/// the lower agent id keeps the cell.
#[derive(Debug, Default)]
struct GidletBoard {
    settled: HashMap<CellIndex, AgentId>,
    inbound: HashMap<CellIndex, AgentId>,
}

impl GidletBoard {
    fn rebuild(&mut self, controllers: &[MovementController]) {
        self.settled.clear();
        self.inbound.clear();
        for controller in controllers {
            if !controller.profile.gidlet {
                continue;
            }
            match controller.motion {
                Motion::Moving { dest, .. } => self.claim_inbound(controller.agent, dest),
                _ => {
                    let _ = self.settled.insert(controller.cell, controller.agent);
                }
            }
        }
    }

    fn claim_inbound(&mut self, agent: AgentId, dest: CellIndex) {
        let entry = self.inbound.entry(dest).or_insert(agent);
        if agent < *entry {
            *entry = agent;
        }
    }

    fn depart(&mut self, agent: AgentId, from: CellIndex, dest: CellIndex) {
        if self.settled.get(&from) == Some(&agent) {
            let _ = self.settled.remove(&from);
        }
        self.claim_inbound(agent, dest);
    }

    fn settled_conflict(&self, agent: AgentId, dest: CellIndex) -> bool {
        matches!(self.settled.get(&dest), Some(holder) if *holder != agent)
    }

    fn inbound_conflict(&self, agent: AgentId, dest: CellIndex) -> bool {
        matches!(self.inbound.get(&dest), Some(senior) if *senior < agent)
    }

    fn settle(&mut self, agent: AgentId, from: CellIndex, dest: CellIndex) {
        if self.settled.get(&from) == Some(&agent) {
            let _ = self.settled.remove(&from);
        }
        if self.inbound.get(&dest) == Some(&agent) {
            let _ = self.inbound.remove(&dest);
        }
        let _ = self.settled.insert(dest, agent);
    }
}

/// Center of a tile in tile units.
fn tile_center(cell: CellIndex) -> Vec2 {
    Vec2::new(cell.x() as f32 + 0.5, cell.y() as f32 + 0.5)
}

fn path_bounds(hops: &[CellIndex]) -> Option<CellRect> {
    let first = hops.first()?;
    let mut min_x = first.x();
    let mut min_y = first.y();
    let mut max_x = min_x;
    let mut max_y = min_y;
    for hop in hops {
        min_x = min_x.min(hop.x());
        min_y = min_y.min(hop.y());
        max_x = max_x.max(hop.x());
        max_y = max_y.max(hop.y());
    }
    Some(CellRect::from_bounds(min_x, min_y, max_x, max_y))
}

fn draw_range(rng: &mut ChaCha8Rng, min: u32, max: u32) -> u32 {
    if min >= max {
        return min;
    }
    rng.gen_range(min..=max)
}

/// Converts the speed model into a tile-traversal tick count.
///
/// Base speed lerps across the difficulty range, ramps up with wave time,
/// rushes near high-value targets, quarters while tangled, and rises with
/// ambient danger unless the agent is boss-class. The result is floored so
/// extreme multipliers never produce teleport-like hops.
#[allow(clippy::too_many_arguments)]
fn travel_ticks(
    profile: &AgentProfile,
    pacing: &PacingTuning,
    ctx: &TickContext<'_>,
    grid: &Grid,
    current: CellIndex,
    dest: CellIndex,
    diagonal: bool,
    tangled: bool,
) -> u32 {
    let difficulty = ctx.difficulty.clamp(0.0, 1.0);
    let mut speed =
        profile.base_speed * (pacing.speed_min + (pacing.speed_max - pacing.speed_min) * difficulty);

    if pacing.ramp_full_ticks > 0 {
        let ramp = (ctx.wave_ticks as f32 / pacing.ramp_full_ticks as f32).min(1.0);
        speed *= 1.0 + pacing.ramp_bonus * ramp;
    }

    if ctx
        .rush_targets
        .iter()
        .any(|target| target.chebyshev_distance(dest) <= pacing.rush_radius)
    {
        speed *= pacing.rush_bonus;
    }

    if tangled {
        speed /= pacing.tangle_divisor.max(1.0);
    }

    if !profile.boss {
        let exposure = grid.danger(current) as f32 / MAX_DANGER as f32;
        speed *= 1.0 + pacing.danger_speedup_max * exposure;
    }

    let step_length = if diagonal {
        std::f32::consts::SQRT_2
    } else {
        1.0
    };
    let surface = grid.footing(dest).time_multiplier();

    let floor = pacing.min_ticks_per_tile.max(1);
    if speed <= f32::EPSILON {
        return u32::MAX;
    }
    let ticks = (step_length * surface / speed).ceil();
    if !ticks.is_finite() || ticks >= u32::MAX as f32 {
        return u32::MAX;
    }
    (ticks as u32).max(floor)
}
