//! Tessellator: wraps a constrained Delaunay triangulation per polygon
//! segment. Ring edges become constraints; registry nodes falling inside
//! the segment are fed in as "must include" points so adjacent
//! triangulations share vertices off the strict boundary. Triangulation
//! may introduce new (Steiner) points; they are re-inserted into the
//! registry, after which the node set is frozen and every triangle vertex
//! must resolve to an existing node.

use anyhow::{Context, Result};
use geo::{BoundingRect, Contains, Point, Polygon};
use log::{debug, warn};
use spade::{ConstrainedDelaunayTriangulation, Point2, Triangulation};

use crate::area::AreaType;
use crate::node::{Face, NodeRegistry};
use crate::shape::Shape;

/// One output triangle; `nodes` are registry indices.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub area: AreaType,
    pub shape: usize,
    pub segment: usize,
    pub nodes: [u32; 3],
}

type Cdt = ConstrainedDelaunayTriangulation<Point2<f64>>;

/// Registry nodes inside the segment (strictly interior or on the
/// boundary rings) that the triangulation must include.
fn must_include_points(poly: &Polygon<f64>, reg: &NodeRegistry) -> Vec<[f64; 2]> {
    let rect = match poly.bounding_rect() {
        Some(r) => r,
        None => return Vec::new(),
    };

    reg.nodes()
        .iter()
        .filter(|n| {
            n.lon >= rect.min().x
                && n.lon <= rect.max().x
                && n.lat >= rect.min().y
                && n.lat <= rect.max().y
                && poly.contains(&Point::new(n.lon, n.lat))
        })
        .map(|n| [n.lon, n.lat])
        .collect()
}

fn constrain_ring(cdt: &mut Cdt, ring: &[geo::Coord<f64>]) -> Result<()> {
    let mut handles = Vec::with_capacity(ring.len());
    for c in ring {
        handles.push(cdt.insert(Point2::new(c.x, c.y))?);
    }

    for pair in handles.windows(2) {
        // Snapped duplicates collapse to one handle; a self-constraint
        // would be degenerate.
        if pair[0] != pair[1] {
            cdt.add_constraint(pair[0], pair[1]);
        }
    }

    Ok(())
}

/// Triangulate one polygon segment.
fn tessellate_segment(
    poly: &Polygon<f64>,
    reg: &NodeRegistry,
) -> Result<Vec<[[f64; 2]; 3]>> {
    if poly.exterior().0.len() < 4 {
        // Fewer than 3 distinct vertices after closing; nothing to emit.
        warn!("segment with degenerate exterior ring skipped");
        return Ok(Vec::new());
    }

    let mut cdt = Cdt::new();

    constrain_ring(&mut cdt, &poly.exterior().0)?;
    for ring in poly.interiors() {
        constrain_ring(&mut cdt, &ring.0)?;
    }

    for p in must_include_points(poly, reg) {
        cdt.insert(Point2::new(p[0], p[1]))?;
    }

    let mut tris = Vec::new();

    for face in cdt.inner_faces() {
        let [a, b, c] = face.vertices();
        let (pa, pb, pc) = (a.position(), b.position(), c.position());

        // Keep faces whose centroid lies in the polygon; this drops
        // hole-interior and concavity faces of the convex triangulation.
        let cx = (pa.x + pb.x + pc.x) / 3.0;
        let cy = (pa.y + pb.y + pc.y) / 3.0;
        if !poly.contains(&Point::new(cx, cy)) {
            continue;
        }

        tris.push([[pa.x, pa.y], [pb.x, pb.y], [pc.x, pc.y]]);
    }

    Ok(tris)
}

/// Tessellate every segment of every shape, re-insert triangulation
/// vertices into the registry, and resolve triangle corners to node
/// indices. A resolution miss is fatal: it signals a topology bug.
pub fn tessellate_all(shapes: &[Shape], reg: &mut NodeRegistry) -> Result<Vec<Triangle>> {
    let mut triangles: Vec<Triangle> = Vec::new();

    for (shape_idx, shape) in shapes.iter().enumerate() {
        let mut shape_tris = 0usize;

        for (seg_idx, poly) in shape.segments.iter().enumerate() {
            let coords = tessellate_segment(poly, reg)
                .with_context(|| format!("tessellating {} segment {}", shape.id, seg_idx))?;

            for tri in coords {
                // Steiner points enter the registry here; existing
                // coordinates dedup onto their node.
                for p in tri {
                    reg.add(p[0], p[1], 0.0);
                }

                let nodes = [
                    reg.expect_index(tri[0][0], tri[0][1])?,
                    reg.expect_index(tri[1][0], tri[1][1])?,
                    reg.expect_index(tri[2][0], tri[2][1])?,
                ];

                let triangle = triangles.len();
                for &n in &nodes {
                    reg.add_face(
                        n,
                        Face {
                            area: shape.area,
                            shape: shape_idx,
                            segment: seg_idx,
                            triangle,
                        },
                    );
                }

                triangles.push(Triangle {
                    area: shape.area,
                    shape: shape_idx,
                    segment: seg_idx,
                    nodes,
                });
                shape_tris += 1;
            }
        }

        debug!("{}: {} triangle(s)", shape.id, shape_tris);
    }

    Ok(triangles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn grass(poly: Polygon<f64>) -> Shape {
        Shape::new("g:0".into(), AreaType::Grass, "Grass".into(), vec![poly], None, None)
    }

    #[test]
    fn test_square_tessellates_fully() {
        let square = grass(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]);

        let mut reg = NodeRegistry::new();
        let tris = tessellate_all(std::slice::from_ref(&square), &mut reg).unwrap();

        assert_eq!(tris.len(), 2);
        assert_eq!(reg.len(), 4);

        // Every corner resolved and carries a face record.
        for tri in &tris {
            for &n in &tri.nodes {
                assert!(!reg.node(n).faces.is_empty());
            }
        }
    }

    #[test]
    fn test_hole_interior_left_empty() {
        let with_hole = grass(Polygon::new(
            geo::LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]),
            vec![geo::LineString::from(vec![
                (1.0, 1.0),
                (3.0, 1.0),
                (3.0, 3.0),
                (1.0, 3.0),
            ])],
        ));

        let mut reg = NodeRegistry::new();
        let tris = tessellate_all(std::slice::from_ref(&with_hole), &mut reg).unwrap();
        assert!(!tris.is_empty());

        // No triangle centroid falls inside the hole.
        for tri in &tris {
            let (mut cx, mut cy) = (0.0, 0.0);
            for &n in &tri.nodes {
                cx += reg.node(n).lon / 3.0;
                cy += reg.node(n).lat / 3.0;
            }
            let inside_hole = cx > 1.0 && cx < 3.0 && cy > 1.0 && cy < 3.0;
            assert!(!inside_hole, "triangle centered at ({}, {}) is in the hole", cx, cy);
        }
    }

    #[test]
    fn test_interior_registry_node_becomes_vertex() {
        let square = grass(polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 0.0, y: 2.0),
        ]);

        let mut reg = NodeRegistry::new();
        let center = reg.add(1.0, 1.0, 0.0);

        let tris = tessellate_all(std::slice::from_ref(&square), &mut reg).unwrap();

        // The must-include point participates in the triangulation.
        assert!(tris.iter().any(|t| t.nodes.contains(&center)));
        assert!(!reg.node(center).faces.is_empty());
    }

    #[test]
    fn test_boundary_point_splits_edge() {
        // A node on the outline (e.g. applied by the T-junction fixer on a
        // neighbor's behalf) must appear in this segment's triangulation.
        let square = grass(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 0.5),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]);

        let mut reg = NodeRegistry::new();
        let tris = tessellate_all(std::slice::from_ref(&square), &mut reg).unwrap();

        let split = reg.expect_index(1.0, 0.5).unwrap();
        assert!(tris.iter().any(|t| t.nodes.contains(&split)));
    }
}
