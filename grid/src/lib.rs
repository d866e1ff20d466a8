#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative shared grid state for the horde-nav engine.
//!
//! The grid owns everything agents contend over: stacked terrain layers, the
//! decaying danger field, the occupancy registry, and the attacking registry.
//! It is the only write surface into shared state; systems read it through
//! the query methods and mutate it exclusively through the operations defined
//! here.

use horde_nav_core::{
    AgentId, CellIndex, CellRect, Footing, TerrainTile, COORD_MAX, MAX_DANGER,
};
use thiserror::Error;

/// Largest supported grid edge, bounded by the packable coordinate range.
pub const MAX_GRID_EDGE: u32 = (COORD_MAX + 1) as u32;

/// Errors raised while constructing a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum GridError {
    /// Requested dimensions are zero or exceed the packable coordinate range.
    #[error("grid dimensions {width}x{height} outside supported range 1..={MAX_GRID_EDGE}")]
    InvalidDimensions {
        /// Requested width in cells.
        width: u32,
        /// Requested height in cells.
        height: u32,
    },
    /// A terrain row string does not match the grid width.
    #[error("terrain row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        /// Row index that failed to parse.
        row: usize,
        /// Number of cells found in the row.
        found: usize,
        /// Number of cells every row must contain.
        expected: usize,
    },
    /// A terrain character has no tile mapping.
    #[error("unknown terrain glyph {glyph:?} at ({x}, {y})")]
    UnknownGlyph {
        /// Unrecognised character.
        glyph: char,
        /// Column of the character.
        x: usize,
        /// Row of the character.
        y: usize,
    },
}

/// Fixed-size tile map with danger, occupancy, and attacking registries.
#[derive(Clone, Debug)]
pub struct Grid {
    width: u32,
    height: u32,
    ground: Vec<TerrainTile>,
    overlay: Vec<Option<TerrainTile>>,
    danger: Vec<u16>,
    occupants: Vec<Option<AgentId>>,
    attackers: Vec<Option<AgentId>>,
}

impl Grid {
    /// Creates an all-open grid, validating dimensions at load time.
    pub fn new(width: u32, height: u32) -> Result<Self, GridError> {
        if width == 0 || height == 0 || width > MAX_GRID_EDGE || height > MAX_GRID_EDGE {
            return Err(GridError::InvalidDimensions { width, height });
        }
        let capacity = width as usize * height as usize;
        Ok(Self {
            width,
            height,
            ground: vec![TerrainTile::open(); capacity],
            overlay: vec![None; capacity],
            danger: vec![0; capacity],
            occupants: vec![None; capacity],
            attackers: vec![None; capacity],
        })
    }

    /// Parses a grid from terrain rows.
    ///
    /// Glyphs: `.` open ground, `#` wall, `r` road, `~` bog.
    pub fn from_rows(rows: &[&str]) -> Result<Self, GridError> {
        let height = rows.len() as u32;
        let width = rows.first().map_or(0, |row| row.chars().count()) as u32;
        let mut grid = Self::new(width, height)?;

        for (y, row) in rows.iter().enumerate() {
            let cells = row.chars().count();
            if cells != width as usize {
                return Err(GridError::RaggedRow {
                    row: y,
                    found: cells,
                    expected: width as usize,
                });
            }
            for (x, glyph) in row.chars().enumerate() {
                let tile = match glyph {
                    '.' => TerrainTile::open(),
                    '#' => TerrainTile::wall(),
                    'r' => TerrainTile::road(),
                    '~' => TerrainTile::bog(),
                    other => {
                        return Err(GridError::UnknownGlyph {
                            glyph: other,
                            x,
                            y,
                        })
                    }
                };
                let cell = CellIndex::pack(x as i32, y as i32);
                grid.set_ground(cell, tile);
            }
        }

        Ok(grid)
    }

    /// Width of the grid in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height of the grid in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Reports whether the cell lies inside the grid.
    #[must_use]
    pub fn in_bounds(&self, cell: CellIndex) -> bool {
        let x = cell.x();
        let y = cell.y();
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    fn index(&self, cell: CellIndex) -> Option<usize> {
        if self.in_bounds(cell) {
            Some(cell.y() as usize * self.width as usize + cell.x() as usize)
        } else {
            None
        }
    }

    /// Replaces the ground-layer tile at map-load time.
    pub fn set_ground(&mut self, cell: CellIndex, tile: TerrainTile) {
        if let Some(index) = self.index(cell) {
            self.ground[index] = tile;
        }
    }

    /// Reports whether any stacked terrain layer blocks movement.
    ///
    /// Out-of-bounds cells are impassable.
    #[must_use]
    pub fn is_impassable_terrain(&self, cell: CellIndex) -> bool {
        match self.index(cell) {
            Some(index) => {
                self.ground[index].blocks_movement()
                    || self.overlay[index].is_some_and(|tile| tile.blocks_movement())
            }
            None => true,
        }
    }

    /// Base terrain cost multiplier at the cell, taking the costlier layer.
    #[must_use]
    pub fn terrain_cost(&self, cell: CellIndex) -> u32 {
        match self.index(cell) {
            Some(index) => {
                let ground = self.ground[index].cost.max(1) as u32;
                match self.overlay[index] {
                    Some(tile) => ground.max(tile.cost.max(1) as u32),
                    None => ground,
                }
            }
            None => 1,
        }
    }

    /// Surface classification at the cell, preferring the overlay layer.
    #[must_use]
    pub fn footing(&self, cell: CellIndex) -> Footing {
        match self.index(cell) {
            Some(index) => match self.overlay[index] {
                Some(tile) => tile.footing,
                None => self.ground[index].footing,
            },
            None => Footing::Open,
        }
    }

    /// Places a structure footprint on the overlay layer.
    ///
    /// Returns the edited region so callers can invalidate cached paths.
    pub fn place_structure(&mut self, origin: CellIndex, width: u32, height: u32) -> CellRect {
        let region = CellRect::from_origin_size(origin, width, height);
        for cell in region.cells() {
            if let Some(index) = self.index(cell) {
                self.overlay[index] = Some(TerrainTile::structure());
            }
        }
        region
    }

    /// Clears the overlay layer across the region.
    ///
    /// Returns the edited region so callers can invalidate cached paths.
    pub fn clear_structure(&mut self, region: CellRect) -> CellRect {
        for cell in region.cells() {
            if let Some(index) = self.index(cell) {
                self.overlay[index] = None;
            }
        }
        region
    }

    /// Danger level at the cell; zero outside the grid.
    #[must_use]
    pub fn danger(&self, cell: CellIndex) -> u16 {
        self.index(cell).map_or(0, |index| self.danger[index])
    }

    /// Raises danger at the cell and splashes half the amount to neighbours.
    ///
    /// This is the agent-died-here hook; values saturate at [`MAX_DANGER`].
    pub fn raise_danger(&mut self, cell: CellIndex, amount: u16) {
        if let Some(index) = self.index(cell) {
            self.danger[index] = self.danger[index].saturating_add(amount).min(MAX_DANGER);
        }
        let splash = amount / 2;
        if splash == 0 {
            return;
        }
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let Some(neighbour) = cell.step(dx, dy) else {
                    continue;
                };
                if let Some(index) = self.index(neighbour) {
                    self.danger[index] =
                        self.danger[index].saturating_add(splash).min(MAX_DANGER);
                }
            }
        }
    }

    /// Decays every cell's danger by the provided amount.
    pub fn decay_danger(&mut self, amount: u16) {
        for value in &mut self.danger {
            *value = value.saturating_sub(amount);
        }
    }

    /// Agent currently holding the cell's occupancy reservation, if any.
    #[must_use]
    pub fn occupant(&self, cell: CellIndex) -> Option<AgentId> {
        self.index(cell).and_then(|index| self.occupants[index])
    }

    /// Reports whether any agent holds the cell's reservation.
    #[must_use]
    pub fn is_occupied(&self, cell: CellIndex) -> bool {
        self.occupant(cell).is_some()
    }

    /// Attempts to reserve the cell for the agent.
    ///
    /// Fails when the cell is out of bounds or another agent holds it.
    /// Re-reserving a cell the agent already holds succeeds.
    #[must_use]
    pub fn reserve(&mut self, agent: AgentId, cell: CellIndex) -> bool {
        let Some(index) = self.index(cell) else {
            return false;
        };
        match self.occupants[index] {
            None => {
                self.occupants[index] = Some(agent);
                true
            }
            Some(holder) => holder == agent,
        }
    }

    /// Releases the cell's reservation if the agent is the holder.
    pub fn release(&mut self, agent: AgentId, cell: CellIndex) {
        if let Some(index) = self.index(cell) {
            if self.occupants[index] == Some(agent) {
                self.occupants[index] = None;
            }
        }
    }

    /// Number of the cell's eight neighbours holding occupancy reservations.
    #[must_use]
    pub fn occupied_neighbour_count(&self, cell: CellIndex) -> u32 {
        let mut count = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                if let Some(neighbour) = cell.step(dx, dy) {
                    if self.is_occupied(neighbour) {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    /// Agent currently flagged as attacking through the cell, if any.
    #[must_use]
    pub fn attacker(&self, cell: CellIndex) -> Option<AgentId> {
        self.index(cell).and_then(|index| self.attackers[index])
    }

    /// Marks the cell as the site of the agent's ongoing structure attack.
    pub fn set_attacking(&mut self, agent: AgentId, cell: CellIndex) {
        if let Some(index) = self.index(cell) {
            self.attackers[index] = Some(agent);
        }
    }

    /// Clears the attacking flag if the agent is the one recorded.
    pub fn clear_attacking(&mut self, agent: AgentId, cell: CellIndex) {
        if let Some(index) = self.index(cell) {
            if self.attackers[index] == Some(agent) {
                self.attackers[index] = None;
            }
        }
    }

    /// Clears every attacking flag held by the agent.
    ///
    /// Attack ends for any reason, including agent removal.
    pub fn clear_all_attacking(&mut self, agent: AgentId) {
        for slot in &mut self.attackers {
            if *slot == Some(agent) {
                *slot = None;
            }
        }
    }
}
