//! Priority clipper and sliver merger. Resolves overlaps among area types
//! in clip-priority order against the landmass/island cover masks, then
//! fills whatever is left of the tile rectangle with the default Ocean
//! area. The accumulator is unioned with each shape's *pre-subtraction*
//! mask, not the post-clip result: later, lower-priority shapes must be
//! excluded from the full original footprint, not just the sliver-trimmed
//! remainder.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use geo::{coord, Area, BooleanOps, MultiPolygon, Polygon, Rect};
use log::{debug, info, warn};

use crate::area::AreaType;
use crate::shape::{ring_count, union_all, Shape};
use crate::tile::Tile;

/// Contours below this unsigned area (deg², ~12 m² at mid latitudes) are
/// too thin to triangulate or texture and go through the sliver merger.
pub const SLIVER_AREA_DEG2: f64 = 1e-9;

/// Tie-break for the sliver merger's shape scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliverMerge {
    /// Scan output shapes in insertion order.
    First,
    /// Scan output shapes in area-priority order.
    Priority,
}

#[derive(Debug, Clone)]
pub struct ClipConfig {
    pub sliver_merge: SliverMerge,
    /// Shape ids to trace through the clip at info level.
    pub trace: HashSet<String>,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            sliver_merge: SliverMerge::Priority,
            trace: HashSet::new(),
        }
    }
}

pub fn tile_rect(tile: &Tile) -> MultiPolygon<f64> {
    let rect = Rect::new(
        coord! { x: tile.min_lon(), y: tile.min_lat() },
        coord! { x: tile.max_lon(), y: tile.max_lat() },
    );
    MultiPolygon(vec![rect.to_polygon()])
}

fn mask_union<'a, I: Iterator<Item = &'a Shape>>(shapes: I) -> MultiPolygon<f64> {
    let mut out = MultiPolygon::<f64>(Vec::new());
    for shape in shapes {
        out = out.union(&shape.mask);
    }
    out
}

/// Split a claim into kept polygons and sliver fragments.
fn extract_slivers(claim: MultiPolygon<f64>) -> (MultiPolygon<f64>, Vec<Polygon<f64>>) {
    let mut kept = Vec::new();
    let mut slivers = Vec::new();

    for poly in claim.0 {
        if poly.unsigned_area() < SLIVER_AREA_DEG2 {
            slivers.push(poly);
        } else {
            kept.push(poly);
        }
    }

    (MultiPolygon(kept), slivers)
}

/// Clip all input shapes for one tile. Returns the output shapes in
/// priority order; hole claims reserve ground but emit no shape.
pub fn clip_tile(
    tile: &Tile,
    mut input: BTreeMap<AreaType, Vec<Shape>>,
    cfg: &ClipConfig,
) -> Result<Vec<Shape>> {
    let rect = tile_rect(tile);

    // Derived cover masks. A tile with no declared landmass is treated as
    // all-land so feature-only inputs still build.
    let land_mask = {
        let mask = mask_union(input.get(&AreaType::Landmass).into_iter().flatten());
        if mask.0.is_empty() {
            debug!("{}: no landmass shapes, assuming full-tile land", tile);
            rect.clone()
        } else {
            mask.intersection(&rect)
        }
    };
    let island_mask = mask_union(input.get(&AreaType::Island).into_iter().flatten());

    let mut accum = MultiPolygon::<f64>(Vec::new());
    let mut outputs: Vec<Shape> = Vec::new();
    let mut pending_slivers: Vec<Polygon<f64>> = Vec::new();

    for area in AreaType::ALL {
        let shapes = match input.remove(&area) {
            Some(s) => s,
            None => continue,
        };

        for shape in shapes {
            let traced = cfg.trace.contains(&shape.id);

            // Start from the shape's aggregate mask, bounded to the tile.
            let mut clip = shape.mask.intersection(&rect);

            // Non-hole features never extend past declared land.
            if !area.is_hole() {
                clip = clip.intersection(&land_mask);
            }

            // Islands poke through lakes.
            if area.is_closed_water() {
                clip = clip.difference(&island_mask);
            }

            let claim = clip.difference(&accum);

            // Pre-subtraction mask into the accumulator (see module docs).
            accum = accum.union(&clip);

            if traced {
                info!(
                    "trace {}: area {} mask {:.3e} deg2, claim {:.3e} deg2",
                    shape.id,
                    area,
                    clip.unsigned_area(),
                    claim.unsigned_area()
                );
            }

            if area.is_hole() {
                continue;
            }

            let (kept, slivers) = extract_slivers(claim);
            pending_slivers.extend(slivers);

            if kept.0.is_empty() {
                debug!("{}: shape {} fully clipped away", tile, shape.id);
                continue;
            }

            let segments = kept.0.clone();
            outputs.push(Shape {
                segments,
                mask: kept,
                ..shape
            });
        }
    }

    // Whatever remains uncovered becomes the default (ocean) area.
    let remainder = rect.difference(&accum);
    if !remainder.0.is_empty() {
        let (kept, slivers) = extract_slivers(remainder);
        pending_slivers.extend(slivers);

        if !kept.0.is_empty() {
            outputs.push(Shape {
                id: format!("{}:ocean", tile),
                area: AreaType::Ocean,
                material: AreaType::Ocean.default_material().to_owned(),
                segments: kept.0.clone(),
                mask: kept,
                tex_params: None,
            });
        }
    }

    merge_slivers(&mut outputs, pending_slivers, cfg);

    info!(
        "{}: clip produced {} shape(s), coverage {:.6e} deg2",
        tile,
        outputs.len(),
        outputs.iter().map(|s| s.mask.unsigned_area()).sum::<f64>()
    );

    Ok(outputs)
}

/// Absorb slivers into adjacent output shapes. A shape accepts a sliver
/// when unioning it in leaves the mask's ring count unchanged (the sliver
/// is adjacent, not disjoint). Unmerged slivers are dropped, never
/// duplicated into two shapes.
fn merge_slivers(outputs: &mut [Shape], slivers: Vec<Polygon<f64>>, cfg: &ClipConfig) {
    if slivers.is_empty() {
        return;
    }

    // Scan order per the configured tie-break. Sorting is stable, so
    // shapes of one area keep their insertion order either way.
    let mut order: Vec<usize> = (0..outputs.len()).collect();
    if cfg.sliver_merge == SliverMerge::Priority {
        order.sort_by_key(|&i| outputs[i].area);
    }

    let mut dropped = 0usize;

    'sliver: for sliver in slivers {
        let sliver_mp = MultiPolygon(vec![sliver]);

        for &i in &order {
            let shape = &mut outputs[i];
            if shape.area.is_hole() {
                continue;
            }

            let merged = shape.mask.union(&sliver_mp);
            if ring_count(&merged) == ring_count(&shape.mask) {
                shape.segments = merged.0.clone();
                shape.mask = merged;
                continue 'sliver;
            }
        }

        dropped += 1;
    }

    if dropped > 0 {
        warn!("{} sliver(s) had no adjacent shape and were dropped", dropped);
    }
}
