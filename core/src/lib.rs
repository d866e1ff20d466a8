#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the horde-nav engine.
//!
//! This crate defines the value types that connect the authoritative grid,
//! the search and movement systems, and the scheduler: packed cell
//! coordinates, agent identifiers and profiles, fixed-point path costs,
//! terrain descriptions, and the event surface broadcast by the movement
//! tick. All tuned gameplay constants live in [`tuning`] as configurable
//! data rather than hard-coded invariants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod tuning;

/// Upper bound of the per-cell danger field.
pub const MAX_DANGER: u16 = 1_000;

/// Fixed-point units that represent crossing one tile of terrain cost 1.
pub const COST_SCALE: u32 = 100;

/// Numerator of the fixed-point √2 approximation applied to diagonal steps.
pub const DIAG_NUM: u32 = 141;

/// Denominator of the fixed-point √2 approximation applied to diagonal steps.
pub const DIAG_DEN: u32 = 100;

/// Smallest tile coordinate representable by [`CellIndex`].
///
/// Coordinates occupy signed 15-bit space so that the packed form survives
/// sign extension in both axes without ambiguity.
pub const COORD_MIN: i32 = -(1 << 14);

/// Largest tile coordinate representable by [`CellIndex`].
pub const COORD_MAX: i32 = (1 << 14) - 1;

/// Error raised when a tile coordinate falls outside the packable range.
///
/// This indicates a map that is too large for the engine, which is a
/// configuration error surfaced at load time rather than a runtime
/// condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("tile coordinate ({x}, {y}) outside packable range {COORD_MIN}..={COORD_MAX}")]
pub struct CoordRangeError {
    /// X coordinate that was requested.
    pub x: i32,
    /// Y coordinate that was requested.
    pub y: i32,
}

/// Packed grid cell coordinate used as the sole vertex identifier.
///
/// Two signed 16-bit tile coordinates share one `i32`: x in the low bits,
/// y in the high bits. Packing keeps the search frontier's working set
/// compact and makes hashing and equality cheap. Pack and unpack are exact
/// inverses for every coordinate in `COORD_MIN..=COORD_MAX`, including
/// negative values; the unpack masks and sign-extends explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellIndex(i32);

impl CellIndex {
    /// Packs two tile coordinates, panicking when either is out of range.
    ///
    /// Out-of-range coordinates mean the map exceeds the supported size,
    /// which must fail fast at load time instead of corrupting packed
    /// values during simulation.
    #[must_use]
    pub fn pack(x: i32, y: i32) -> Self {
        match Self::try_pack(x, y) {
            Ok(cell) => cell,
            Err(error) => panic!("{error}"),
        }
    }

    /// Packs two tile coordinates, reporting out-of-range inputs.
    pub fn try_pack(x: i32, y: i32) -> Result<Self, CoordRangeError> {
        if x < COORD_MIN || x > COORD_MAX || y < COORD_MIN || y > COORD_MAX {
            return Err(CoordRangeError { x, y });
        }
        let low = (x as u32) & 0xFFFF;
        let high = (y as u32) << 16;
        Ok(Self((high | low) as i32))
    }

    /// X tile coordinate, sign-extended from the low 16 bits.
    #[must_use]
    pub const fn x(&self) -> i32 {
        (self.0 as u32 & 0xFFFF) as u16 as i16 as i32
    }

    /// Y tile coordinate, sign-extended from the high 16 bits.
    #[must_use]
    pub const fn y(&self) -> i32 {
        (self.0 >> 16) as i16 as i32
    }

    /// Raw packed representation.
    #[must_use]
    pub const fn raw(&self) -> i32 {
        self.0
    }

    /// Cell displaced by the provided deltas, if it stays in range.
    #[must_use]
    pub fn step(&self, dx: i32, dy: i32) -> Option<Self> {
        Self::try_pack(self.x() + dx, self.y() + dy).ok()
    }

    /// Reports whether `other` is one of this cell's eight neighbours.
    #[must_use]
    pub fn is_adjacent_8(&self, other: CellIndex) -> bool {
        *self != other && self.chebyshev_distance(other) == 1
    }

    /// Reports whether a move from this cell to `other` is diagonal.
    #[must_use]
    pub fn is_diagonal_to(&self, other: CellIndex) -> bool {
        (self.x() - other.x()).abs() == 1 && (self.y() - other.y()).abs() == 1
    }

    /// Chebyshev (king-move) distance between two cells.
    #[must_use]
    pub fn chebyshev_distance(&self, other: CellIndex) -> u32 {
        let dx = (self.x() - other.x()).unsigned_abs();
        let dy = (self.y() - other.y()).unsigned_abs();
        dx.max(dy)
    }

    /// Manhattan distance between two cells.
    #[must_use]
    pub fn manhattan_distance(&self, other: CellIndex) -> u32 {
        (self.x() - other.x()).unsigned_abs() + (self.y() - other.y()).unsigned_abs()
    }
}

/// Unique identifier assigned to an agent by the owning game logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(u32);

impl AgentId {
    /// Creates a new agent identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Fixed-point path cost measured in [`COST_SCALE`] units per unit terrain.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Cost(u32);

impl Cost {
    /// Zero cost.
    pub const ZERO: Cost = Cost(0);

    /// Creates a cost from raw fixed-point units.
    #[must_use]
    pub const fn from_units(units: u32) -> Self {
        Self(units)
    }

    /// Cost of crossing terrain with the provided cost multiplier.
    #[must_use]
    pub const fn from_terrain(multiplier: u32) -> Self {
        Self(multiplier.saturating_mul(COST_SCALE))
    }

    /// Raw fixed-point units.
    #[must_use]
    pub const fn units(&self) -> u32 {
        self.0
    }

    /// Saturating addition preserving the fixed-point scale.
    #[must_use]
    pub const fn saturating_add(self, other: Cost) -> Cost {
        Cost(self.0.saturating_add(other.0))
    }

    /// Scales the cost by `num / den` using a widened intermediate.
    #[must_use]
    pub const fn scale(self, num: u32, den: u32) -> Cost {
        let widened = self.0 as u64 * num as u64 / den as u64;
        if widened > u32::MAX as u64 {
            Cost(u32::MAX)
        } else {
            Cost(widened as u32)
        }
    }
}

/// Broad allegiance of an agent, selecting its topology and controller rules.
///
/// The set is closed: hostile creatures and friendly player units are the
/// only variants the movement core distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Faction {
    /// Hostile creature advancing on player structures.
    Hostile,
    /// Player-controlled unit.
    Friendly,
}

/// Static description of an agent consumed by the movement core.
///
/// Profiles are plain data supplied by the owning game logic at spawn time;
/// the movement core never mutates them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Allegiance that selects topology and reservation rules.
    pub faction: Faction,
    /// Boss-class agents ignore danger-based speedups.
    pub boss: bool,
    /// Wraith-class agents pay a flat ghost cost and ignore collisions.
    pub wraith: bool,
    /// Gidlet-class swarm agents never reserve occupancy.
    pub gidlet: bool,
    /// Permits diagonal steps during search and movement.
    pub diagonal_allowed: bool,
    /// Biases the search toward smoother diagonal paths.
    pub diagonal_preferred: bool,
    /// Armor rating; reduces effective danger exposure.
    pub armor: u32,
    /// Per-archetype danger avoidance factor, in percent.
    pub avoidance: u32,
    /// Base movement speed in tiles per tick before modulation.
    pub base_speed: f32,
}

impl AgentProfile {
    /// Profile for a standard hostile creature.
    #[must_use]
    pub const fn hostile(base_speed: f32) -> Self {
        Self {
            faction: Faction::Hostile,
            boss: false,
            wraith: false,
            gidlet: false,
            diagonal_allowed: true,
            diagonal_preferred: false,
            armor: 0,
            avoidance: 100,
            base_speed,
        }
    }

    /// Profile for a friendly gidlet swarm unit.
    #[must_use]
    pub const fn gidlet(base_speed: f32) -> Self {
        Self {
            faction: Faction::Friendly,
            boss: false,
            wraith: false,
            gidlet: true,
            diagonal_allowed: true,
            diagonal_preferred: false,
            armor: 0,
            avoidance: 100,
            base_speed,
        }
    }

    /// Reports whether this agent participates in occupancy reservation.
    ///
    /// Gidlets are exempt by design; wraiths pass through other agents and
    /// therefore cannot hold exclusive cell claims either.
    #[must_use]
    pub const fn reserves_occupancy(&self) -> bool {
        matches!(self.faction, Faction::Hostile) && !self.gidlet && !self.wraith
    }
}

/// Speed classification of a tile surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Footing {
    /// Paved surface; agents cross faster than open ground.
    Road,
    /// Plain traversable ground.
    Open,
    /// Soft ground; agents cross slower than open ground.
    Bog,
}

impl Footing {
    /// Traversal-time multiplier applied to a step onto this surface.
    #[must_use]
    pub const fn time_multiplier(&self) -> f32 {
        match self {
            Self::Road => 0.75,
            Self::Open => 1.0,
            Self::Bog => 1.6,
        }
    }
}

/// Static per-cell terrain attributes.
///
/// Immutable after map load; mutated only through explicit structure edits
/// on the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerrainTile {
    /// Agents may never enter this tile.
    pub impassable: bool,
    /// Tile is filled by a solid volume (walls, placed structures).
    pub solid: bool,
    /// Projectiles pass through even when the tile blocks movement.
    pub bullet_through: bool,
    /// Base movement cost multiplier, at least 1.
    pub cost: u8,
    /// Surface classification affecting traversal speed.
    pub footing: Footing,
}

impl TerrainTile {
    /// Plain open ground.
    #[must_use]
    pub const fn open() -> Self {
        Self {
            impassable: false,
            solid: false,
            bullet_through: true,
            cost: 1,
            footing: Footing::Open,
        }
    }

    /// Paved road surface.
    #[must_use]
    pub const fn road() -> Self {
        Self {
            impassable: false,
            solid: false,
            bullet_through: true,
            cost: 1,
            footing: Footing::Road,
        }
    }

    /// Soft bog that slows traversal.
    #[must_use]
    pub const fn bog() -> Self {
        Self {
            impassable: false,
            solid: false,
            bullet_through: true,
            cost: 3,
            footing: Footing::Bog,
        }
    }

    /// Solid wall segment.
    #[must_use]
    pub const fn wall() -> Self {
        Self {
            impassable: true,
            solid: true,
            bullet_through: false,
            cost: 1,
            footing: Footing::Open,
        }
    }

    /// Placed structure footprint tile.
    #[must_use]
    pub const fn structure() -> Self {
        Self {
            impassable: true,
            solid: true,
            bullet_through: false,
            cost: 1,
            footing: Footing::Open,
        }
    }

    /// Reports whether the tile blocks movement.
    #[must_use]
    pub const fn blocks_movement(&self) -> bool {
        self.impassable || self.solid
    }
}

/// Axis-aligned rectangle of cells with inclusive signed bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRect {
    min_x: i32,
    min_y: i32,
    max_x: i32,
    max_y: i32,
}

impl CellRect {
    /// Constructs a rectangle from inclusive bounds, normalising order.
    #[must_use]
    pub fn from_bounds(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    /// Constructs a rectangle from an origin cell and size in whole cells.
    #[must_use]
    pub fn from_origin_size(origin: CellIndex, width: u32, height: u32) -> Self {
        let width = width.max(1) as i32;
        let height = height.max(1) as i32;
        Self::from_bounds(
            origin.x(),
            origin.y(),
            origin.x() + width - 1,
            origin.y() + height - 1,
        )
    }

    /// Smallest X coordinate contained in the rectangle.
    #[must_use]
    pub const fn min_x(&self) -> i32 {
        self.min_x
    }

    /// Smallest Y coordinate contained in the rectangle.
    #[must_use]
    pub const fn min_y(&self) -> i32 {
        self.min_y
    }

    /// Largest X coordinate contained in the rectangle.
    #[must_use]
    pub const fn max_x(&self) -> i32 {
        self.max_x
    }

    /// Largest Y coordinate contained in the rectangle.
    #[must_use]
    pub const fn max_y(&self) -> i32 {
        self.max_y
    }

    /// Reports whether the rectangle contains the provided cell.
    #[must_use]
    pub fn contains(&self, cell: CellIndex) -> bool {
        let x = cell.x();
        let y = cell.y();
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Reports whether two rectangles share at least one cell.
    #[must_use]
    pub const fn intersects(&self, other: &CellRect) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Iterates every packable cell in the rectangle in row-major order.
    ///
    /// Bounds are clamped to the representable coordinate range so that a
    /// rectangle touching the map edge never faults mid-simulation.
    pub fn cells(&self) -> impl Iterator<Item = CellIndex> + '_ {
        let min_x = self.min_x.max(COORD_MIN);
        let max_x = self.max_x.min(COORD_MAX);
        let min_y = self.min_y.max(COORD_MIN);
        let max_y = self.max_y.min(COORD_MAX);
        (min_y..=max_y).flat_map(move |y| (min_x..=max_x).map(move |x| CellIndex::pack(x, y)))
    }
}

/// Events broadcast by the movement tick for the owning game logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavEvent {
    /// An agent completed a tile-to-tile step.
    Stepped {
        /// Agent that advanced.
        agent: AgentId,
        /// Cell the agent departed.
        from: CellIndex,
        /// Cell the agent now occupies.
        to: CellIndex,
    },
    /// An agent reached its current goal cell.
    ArrivedAtGoal {
        /// Agent that arrived.
        agent: AgentId,
        /// Goal cell that was reached.
        goal: CellIndex,
    },
    /// A search concluded without reaching the goal; the agent backs off.
    SearchFailed {
        /// Agent whose search was exhausted.
        agent: AgentId,
    },
    /// An agent crossed the consecutive-failure ceiling.
    ///
    /// Terminal notification only: the movement core performs no
    /// destructive action, the owning game logic decides removal.
    AgentStuck {
        /// Agent that is persistently stuck.
        agent: AgentId,
        /// Consecutive failures accumulated when the ceiling was crossed.
        failures: u32,
    },
    /// A map edit invalidated the agent's cached path.
    RethinkQueued {
        /// Agent whose controller was enqueued for a forced re-plan.
        agent: AgentId,
    },
}

#[cfg(test)]
mod tests {
    use super::{
        AgentId, AgentProfile, CellIndex, CellRect, Cost, TerrainTile, COORD_MAX, COORD_MIN,
    };
    use serde::{de::DeserializeOwned, Serialize};

    #[test]
    fn pack_unpack_are_inverse_over_full_range() {
        let samples = [
            COORD_MIN,
            COORD_MIN + 1,
            -1_000,
            -1,
            0,
            1,
            999,
            COORD_MAX - 1,
            COORD_MAX,
        ];
        for &x in &samples {
            for &y in &samples {
                let cell = CellIndex::pack(x, y);
                assert_eq!(cell.x(), x, "x mismatch for ({x}, {y})");
                assert_eq!(cell.y(), y, "y mismatch for ({x}, {y})");
            }
        }
    }

    #[test]
    fn try_pack_rejects_out_of_range_coordinates() {
        assert!(CellIndex::try_pack(COORD_MAX + 1, 0).is_err());
        assert!(CellIndex::try_pack(0, COORD_MIN - 1).is_err());
        assert!(CellIndex::try_pack(i32::MAX, i32::MAX).is_err());
    }

    #[test]
    fn packed_cells_compare_equal_only_when_coordinates_match() {
        assert_eq!(CellIndex::pack(3, -7), CellIndex::pack(3, -7));
        assert_ne!(CellIndex::pack(3, -7), CellIndex::pack(-7, 3));
    }

    #[test]
    fn adjacency_covers_eight_neighbours() {
        let origin = CellIndex::pack(5, 5);
        let mut adjacent = 0;
        for dx in -1..=1 {
            for dy in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let neighbour = origin.step(dx, dy).expect("in range");
                assert!(origin.is_adjacent_8(neighbour));
                adjacent += 1;
            }
        }
        assert_eq!(adjacent, 8);
        assert!(!origin.is_adjacent_8(origin));
        assert!(!origin.is_adjacent_8(CellIndex::pack(5, 7)));
    }

    #[test]
    fn diagonal_detection_matches_geometry() {
        let origin = CellIndex::pack(0, 0);
        assert!(origin.is_diagonal_to(CellIndex::pack(1, 1)));
        assert!(origin.is_diagonal_to(CellIndex::pack(-1, 1)));
        assert!(!origin.is_diagonal_to(CellIndex::pack(1, 0)));
        assert!(!origin.is_diagonal_to(CellIndex::pack(0, -1)));
    }

    #[test]
    fn cost_scaling_uses_widened_intermediate() {
        let cost = Cost::from_units(3_000_000_000);
        assert_eq!(cost.scale(141, 100), Cost::from_units(4_230_000_000));
        assert_eq!(Cost::from_units(u32::MAX).scale(5, 1).units(), u32::MAX);
    }

    #[test]
    fn rect_containment_and_intersection() {
        let rect = CellRect::from_origin_size(CellIndex::pack(2, 2), 3, 2);
        assert!(rect.contains(CellIndex::pack(2, 2)));
        assert!(rect.contains(CellIndex::pack(4, 3)));
        assert!(!rect.contains(CellIndex::pack(5, 3)));
        assert!(!rect.contains(CellIndex::pack(4, 4)));

        let other = CellRect::from_bounds(4, 3, 8, 9);
        assert!(rect.intersects(&other));
        assert!(other.intersects(&rect));
        let disjoint = CellRect::from_bounds(6, 0, 9, 1);
        assert!(!rect.intersects(&disjoint));
    }

    #[test]
    fn rect_cells_iterate_row_major() {
        let rect = CellRect::from_origin_size(CellIndex::pack(0, 0), 2, 2);
        let cells: Vec<_> = rect.cells().collect();
        assert_eq!(
            cells,
            vec![
                CellIndex::pack(0, 0),
                CellIndex::pack(1, 0),
                CellIndex::pack(0, 1),
                CellIndex::pack(1, 1),
            ]
        );
    }

    #[test]
    fn only_colliding_hostiles_reserve_occupancy() {
        assert!(AgentProfile::hostile(0.1).reserves_occupancy());
        assert!(!AgentProfile::gidlet(0.1).reserves_occupancy());
        let mut wraith = AgentProfile::hostile(0.1);
        wraith.wraith = true;
        assert!(!wraith.reserves_occupancy());
    }

    fn assert_round_trip<T>(value: &T)
    where
        T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let bytes = bincode::serialize(value).expect("serialize");
        let restored: T = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(&restored, value);
    }

    #[test]
    fn cell_index_round_trips_through_bincode() {
        assert_round_trip(&CellIndex::pack(-12, 345));
    }

    #[test]
    fn agent_id_round_trips_through_bincode() {
        assert_round_trip(&AgentId::new(42));
    }

    #[test]
    fn terrain_tile_round_trips_through_bincode() {
        assert_round_trip(&TerrainTile::bog());
    }
}
