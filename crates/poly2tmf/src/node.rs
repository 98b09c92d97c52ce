//! Deduplicated node arena. Every triangle vertex in the tile resolves to
//! exactly one entry here; dedup is a hash lookup on snap-quantized
//! (lon, lat) rather than a linear scan, so inserting the same coordinate
//! from two shapes (or from a neighbor tile's shared-edge file) always
//! lands on the same index.

use anyhow::{bail, Result};
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::area::AreaType;

/// Snap quantum in degrees (~1 cm). Two points within the same quantum
/// cell are one node.
pub const SNAP_DEG: f64 = 1e-7;

/// One (area, shape, segment, triangle) membership of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub area: AreaType,
    pub shape: usize,
    pub segment: usize,
    /// Global triangle index across the whole tile.
    pub triangle: usize,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub lon: f64,
    pub lat: f64,
    pub elev: f64,
    /// True for explicitly-authored 3-D input; the elevation resolver
    /// never touches these.
    pub fixed_elevation: bool,
    pub normal: [f64; 3],
    pub faces: SmallVec<[Face; 4]>,
}

#[derive(Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    lookup: HashMap<(i64, i64), u32>,
}

#[inline]
fn snap_key(lon: f64, lat: f64) -> (i64, i64) {
    ((lon / SNAP_DEG).round() as i64, (lat / SNAP_DEG).round() as i64)
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn node(&self, index: u32) -> &Node {
        &self.nodes[index as usize]
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Insert a point, deduplicating against existing nodes. A fresh node
    /// starts with the given elevation, an unfixed flag and a zero normal.
    pub fn add(&mut self, lon: f64, lat: f64, elev: f64) -> u32 {
        let key = snap_key(lon, lat);

        if let Some(&index) = self.lookup.get(&key) {
            return index;
        }

        let index = self.nodes.len() as u32;
        self.nodes.push(Node {
            lon,
            lat,
            elev,
            fixed_elevation: false,
            normal: [0.0; 3],
            faces: SmallVec::new(),
        });
        self.lookup.insert(key, index);

        index
    }

    /// Insert a point whose elevation is authoritative (3-D input).
    /// Re-adding an existing node promotes it to fixed.
    pub fn add_fixed(&mut self, lon: f64, lat: f64, elev: f64) -> u32 {
        let index = self.add(lon, lat, elev);

        let node = &mut self.nodes[index as usize];
        node.elev = elev;
        node.fixed_elevation = true;

        index
    }

    pub fn index_of(&self, lon: f64, lat: f64) -> Option<u32> {
        self.lookup.get(&snap_key(lon, lat)).copied()
    }

    /// Resolve a coordinate that must already exist. A miss after
    /// tessellation signals a topology bug, not a recoverable condition.
    pub fn expect_index(&self, lon: f64, lat: f64) -> Result<u32> {
        match self.index_of(lon, lat) {
            Some(index) => Ok(index),
            None => bail!("no node registered at ({:.8}, {:.8})", lon, lat),
        }
    }

    /// Set a node's elevation. Fixed nodes keep their authored value.
    pub fn set_elevation(&mut self, index: u32, elev: f64) {
        let node = &mut self.nodes[index as usize];
        if !node.fixed_elevation {
            node.elev = elev;
        }
    }

    #[inline]
    pub fn set_normal(&mut self, index: u32, normal: [f64; 3]) {
        self.nodes[index as usize].normal = normal;
    }

    #[inline]
    pub fn add_face(&mut self, index: u32, face: Face) {
        self.nodes[index as usize].faces.push(face);
    }
}
