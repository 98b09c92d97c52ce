//! Fixed global tile grid: 0.125° x 0.125° cells, column-major from the
//! south-west corner of the world. A tile index is stable across runs and
//! names every per-tile artifact (inputs, elevation rasters, shared-edge
//! files, output meshes).

use anyhow::{bail, Result};

/// Angular tile extent in degrees.
pub const TILE_SPAN_DEG: f64 = 0.125;

/// Grid columns (360 / 0.125).
pub const GRID_COLS: u32 = 2880;

/// Grid rows (180 / 0.125).
pub const GRID_ROWS: u32 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];
}

/// One geographic cell. Immutable once selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    x: u32,
    y: u32,
}

impl Tile {
    pub fn from_grid(x: u32, y: u32) -> Result<Self> {
        if x >= GRID_COLS || y >= GRID_ROWS {
            bail!("tile grid position ({}, {}) out of range", x, y);
        }
        // Top and bottom rows touch the poles and are not buildable.
        if y == 0 || y == GRID_ROWS - 1 {
            bail!("tile row {} touches a pole and is not buildable", y);
        }
        Ok(Self { x, y })
    }

    pub fn from_index(index: u64) -> Result<Self> {
        let x = (index % GRID_COLS as u64) as u32;
        let y = (index / GRID_COLS as u64) as u32;
        Self::from_grid(x, y)
    }

    /// Tile containing the given point. Tiles in the top and bottom grid
    /// rows touch the poles and are rejected.
    pub fn from_lon_lat(lon: f64, lat: f64) -> Result<Self> {
        if !(-180.0..180.0).contains(&lon) || !(-90.0..90.0).contains(&lat) {
            bail!("point ({}, {}) outside the tile grid", lon, lat);
        }

        let x = ((lon + 180.0) / TILE_SPAN_DEG).floor() as u32;
        let y = ((lat + 90.0) / TILE_SPAN_DEG).floor() as u32;

        Self::from_grid(x.min(GRID_COLS - 1), y)
    }

    #[inline]
    pub fn index(&self) -> u64 {
        self.y as u64 * GRID_COLS as u64 + self.x as u64
    }

    #[inline]
    pub fn min_lon(&self) -> f64 {
        -180.0 + self.x as f64 * TILE_SPAN_DEG
    }

    #[inline]
    pub fn min_lat(&self) -> f64 {
        -90.0 + self.y as f64 * TILE_SPAN_DEG
    }

    #[inline]
    pub fn max_lon(&self) -> f64 {
        self.min_lon() + TILE_SPAN_DEG
    }

    #[inline]
    pub fn max_lat(&self) -> f64 {
        self.min_lat() + TILE_SPAN_DEG
    }

    #[inline]
    pub fn center_lon(&self) -> f64 {
        self.min_lon() + 0.5 * TILE_SPAN_DEG
    }

    #[inline]
    pub fn center_lat(&self) -> f64 {
        self.min_lat() + 0.5 * TILE_SPAN_DEG
    }

    /// Neighbor one step in the given direction. No wraparound: `None`
    /// past the grid edge.
    pub fn neighbor(&self, dir: Direction) -> Option<Tile> {
        let (x, y) = match dir {
            Direction::North => (self.x, self.y.checked_add(1)?),
            Direction::South => (self.x, self.y.checked_sub(1)?),
            Direction::East => (self.x.checked_add(1)?, self.y),
            Direction::West => (self.x.checked_sub(1)?, self.y),
        };
        Tile::from_grid(x, y).ok()
    }

    #[inline]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon() && lon <= self.max_lon() && lat >= self.min_lat() && lat <= self.max_lat()
    }
}

impl std::fmt::Display for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}
