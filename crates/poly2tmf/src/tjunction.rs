//! T-junction fixer. After clipping (and after neighbor shared-edge nodes
//! are loaded), every polygon edge is checked against the full node set:
//! a node lying on the open segment gets inserted as a vertex, then both
//! halves are re-checked until no intermediate node remains.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use rstar::{RTree, RTreeObject, AABB};

use crate::node::{NodeRegistry, SNAP_DEG};
use crate::shape::Shape;

/// Max distance (deg) from a segment at which a node counts as lying on it.
pub const EDGE_EPS_DEG: f64 = 1e-7;

#[derive(Debug, Clone, Copy)]
struct NodePoint {
    pos: [f64; 2],
}

impl RTreeObject for NodePoint {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pos)
    }
}

fn build_tree(reg: &NodeRegistry) -> RTree<NodePoint> {
    let points = reg
        .nodes()
        .iter()
        .map(|n| NodePoint { pos: [n.lon, n.lat] })
        .collect();
    RTree::bulk_load(points)
}

#[inline]
fn close_to(a: [f64; 2], b: [f64; 2]) -> bool {
    (a[0] - b[0]).abs() <= SNAP_DEG && (a[1] - b[1]).abs() <= SNAP_DEG
}

/// Find a node strictly between p0 and p1 within `EDGE_EPS_DEG` of the
/// segment, excluding both endpoints.
fn find_intermediate(p0: [f64; 2], p1: [f64; 2], tree: &RTree<NodePoint>) -> Option<[f64; 2]> {
    let eps = EDGE_EPS_DEG;
    let lo = [p0[0].min(p1[0]) - eps, p0[1].min(p1[1]) - eps];
    let hi = [p0[0].max(p1[0]) + eps, p0[1].max(p1[1]) + eps];

    let dx = p1[0] - p0[0];
    let dy = p1[1] - p0[1];
    let denom = dx * dx + dy * dy;
    if denom <= 0.0 {
        return None;
    }

    for cand in tree.locate_in_envelope_intersecting(&AABB::from_corners(lo, hi)) {
        let p = cand.pos;
        if close_to(p, p0) || close_to(p, p1) {
            continue;
        }

        let t = ((p[0] - p0[0]) * dx + (p[1] - p0[1]) * dy) / denom;
        if t <= 0.0 || t >= 1.0 {
            continue;
        }

        let cx = p0[0] + t * dx;
        let cy = p0[1] + t * dy;
        let d2 = (p[0] - cx) * (p[0] - cx) + (p[1] - cy) * (p[1] - cy);

        if d2 <= eps * eps {
            return Some(p);
        }
    }

    None
}

/// Emit the chain p0..p1 (exclusive of p0), recursing on both halves
/// around each found node. The recursion terminates because every level
/// splits at a distinct registered node.
fn expand_edge(
    p0: [f64; 2],
    p1: [f64; 2],
    tree: &RTree<NodePoint>,
    out: &mut Vec<Coord<f64>>,
    inserted: &mut usize,
) {
    if let Some(q) = find_intermediate(p0, p1, tree) {
        *inserted += 1;
        expand_edge(p0, q, tree, out, inserted);
        expand_edge(q, p1, tree, out, inserted);
    } else {
        out.push(Coord { x: p1[0], y: p1[1] });
    }
}

fn fix_ring(ring: &LineString<f64>, tree: &RTree<NodePoint>, inserted: &mut usize) -> LineString<f64> {
    let pts = &ring.0;
    if pts.len() < 2 {
        return ring.clone();
    }

    let mut out: Vec<Coord<f64>> = Vec::with_capacity(pts.len());
    out.push(pts[0]);

    for pair in pts.windows(2) {
        expand_edge(
            [pair[0].x, pair[0].y],
            [pair[1].x, pair[1].y],
            tree,
            &mut out,
            inserted,
        );
    }

    LineString(out)
}

fn fix_polygon(poly: &Polygon<f64>, tree: &RTree<NodePoint>, inserted: &mut usize) -> Polygon<f64> {
    let exterior = fix_ring(poly.exterior(), tree, inserted);
    let interiors = poly
        .interiors()
        .iter()
        .map(|r| fix_ring(r, tree, inserted))
        .collect();
    Polygon::new(exterior, interiors)
}

/// Insert missing collinear nodes along every edge of every output shape.
/// Returns the number of insertions performed.
pub fn fix_t_junctions(shapes: &mut [Shape], reg: &NodeRegistry) -> usize {
    let tree = build_tree(reg);
    let mut inserted = 0usize;

    for shape in shapes.iter_mut() {
        let segments: Vec<Polygon<f64>> = shape
            .segments
            .iter()
            .map(|p| fix_polygon(p, &tree, &mut inserted))
            .collect();
        shape.segments = segments;
        shape.mask = MultiPolygon(shape.segments.clone());
    }

    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::AreaType;
    use geo::polygon;

    fn register_shape_points(shape: &Shape, reg: &mut NodeRegistry) {
        for poly in &shape.segments {
            for c in poly.exterior().0.iter() {
                reg.add(c.x, c.y, 0.0);
            }
            for ring in poly.interiors() {
                for c in ring.0.iter() {
                    reg.add(c.x, c.y, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_adjoining_rectangles_gain_matching_point() {
        // Scenario: two adjoining rectangles, the shared edge subdivided
        // on the left side only.
        let left = Shape::new(
            "l:0".into(),
            AreaType::Grass,
            "Grass".into(),
            vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 0.5),   // subdivision point on the shared edge
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 1.0),
            ]],
            None,
            None,
        );
        let right = Shape::new(
            "r:0".into(),
            AreaType::Forest,
            "Forest".into(),
            vec![polygon![
                (x: 1.0, y: 0.0),
                (x: 2.0, y: 0.0),
                (x: 2.0, y: 1.0),
                (x: 1.0, y: 1.0),
            ]],
            None,
            None,
        );

        let mut reg = NodeRegistry::new();
        register_shape_points(&left, &mut reg);
        register_shape_points(&right, &mut reg);

        let mut shapes = vec![left, right];
        let inserted = fix_t_junctions(&mut shapes, &reg);
        assert_eq!(inserted, 1);

        // Both sides now carry the point at identical coordinates.
        let right_ring = &shapes[1].segments[0].exterior().0;
        assert!(right_ring.iter().any(|c| c.x == 1.0 && c.y == 0.5));

        let left_ring = &shapes[0].segments[0].exterior().0;
        assert!(left_ring.iter().any(|c| c.x == 1.0 && c.y == 0.5));
    }

    #[test]
    fn test_multiple_points_on_one_edge_in_order() {
        let big = Shape::new(
            "b:0".into(),
            AreaType::Grass,
            "Grass".into(),
            vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 4.0, y: 0.0),
                (x: 4.0, y: 1.0),
                (x: 0.0, y: 1.0),
            ]],
            None,
            None,
        );

        let mut reg = NodeRegistry::new();
        register_shape_points(&big, &mut reg);
        // Two extra nodes on the bottom edge, registered out of order.
        reg.add(3.0, 0.0, 0.0);
        reg.add(1.0, 0.0, 0.0);

        let mut shapes = vec![big];
        let inserted = fix_t_junctions(&mut shapes, &reg);
        assert_eq!(inserted, 2);

        let ring = &shapes[0].segments[0].exterior().0;
        let xs: Vec<f64> = ring.iter().take(4).map(|c| c.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn test_off_segment_node_ignored() {
        let square = Shape::new(
            "s:0".into(),
            AreaType::Grass,
            "Grass".into(),
            vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 1.0),
            ]],
            None,
            None,
        );

        let mut reg = NodeRegistry::new();
        register_shape_points(&square, &mut reg);
        reg.add(0.5, 0.5, 0.0); // interior, not on any edge

        let mut shapes = vec![square];
        assert_eq!(fix_t_junctions(&mut shapes, &reg), 0);
    }
}
