//! Normals: per-triangle face normals in ECEF and area-weighted point
//! normals accumulated back onto the registry nodes.

use log::debug;

use crate::node::NodeRegistry;
use crate::tess::Triangle;

/// Faces smaller than this (m^2) contribute a radial-up normal instead of
/// their cross product.
const MIN_FACE_AREA_M2: f64 = 1e-10;

/// Triangles squashed flat along one geographic axis are degenerate even
/// when float noise gives them a nonzero cross product.
const AXIS_EPS_DEG: f64 = 1e-7;

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn length(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn normalize(v: [f64; 3]) -> [f64; 3] {
    let len = length(v);
    if len > 0.0 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        [0.0, 0.0, 1.0]
    }
}

fn node_ecef(reg: &NodeRegistry, index: u32) -> [f64; 3] {
    let n = reg.node(index);
    tmf::geodetic_to_ecef(n.lat, n.lon, n.elev)
}

/// Radial up at a node, the fallback for degenerate faces and for nodes
/// with no incident face.
fn radial_up(reg: &NodeRegistry, index: u32) -> [f64; 3] {
    normalize(node_ecef(reg, index))
}

fn axis_degenerate(reg: &NodeRegistry, nodes: [u32; 3]) -> bool {
    let [a, b, c] = nodes.map(|n| (reg.node(n).lon, reg.node(n).lat));
    let lon_span = a.0.max(b.0).max(c.0) - a.0.min(b.0).min(c.0);
    let lat_span = a.1.max(b.1).max(c.1) - a.1.min(b.1).min(c.1);
    lon_span < AXIS_EPS_DEG || lat_span < AXIS_EPS_DEG
}

/// Unit face normal and area (m^2) of one triangle.
pub fn face_normal(reg: &NodeRegistry, tri: &Triangle) -> ([f64; 3], f64) {
    let a = node_ecef(reg, tri.nodes[0]);
    let b = node_ecef(reg, tri.nodes[1]);
    let c = node_ecef(reg, tri.nodes[2]);

    let raw = cross(sub(b, a), sub(c, a));
    let area = length(raw) * 0.5;

    if area < MIN_FACE_AREA_M2 || axis_degenerate(reg, tri.nodes) {
        (radial_up(reg, tri.nodes[0]), area)
    } else {
        (normalize(raw), area)
    }
}

/// Compute every face normal and fold them into area-weighted per-node
/// normals stored on the registry.
pub fn compute_normals(reg: &mut NodeRegistry, tris: &[Triangle]) {
    let mut sums = vec![[0.0f64; 3]; reg.len()];

    let mut degenerate = 0usize;
    for tri in tris {
        let (normal, area) = face_normal(reg, tri);
        if area < MIN_FACE_AREA_M2 {
            degenerate += 1;
        }
        for &n in &tri.nodes {
            let s = &mut sums[n as usize];
            s[0] += normal[0] * area;
            s[1] += normal[1] * area;
            s[2] += normal[2] * area;
        }
    }
    if degenerate > 0 {
        debug!("{} degenerate face(s) use radial-up normals", degenerate);
    }

    for index in 0..reg.len() as u32 {
        let sum = sums[index as usize];
        let normal = if length(sum) > 0.0 {
            normalize(sum)
        } else {
            radial_up(reg, index)
        };
        reg.set_normal(index, normal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::AreaType;
    use crate::node::NodeRegistry;
    use crate::tess::Triangle;

    fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
        a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
    }

    #[test]
    fn test_flat_triangle_normal_points_outward() {
        let mut reg = NodeRegistry::new();
        // Counter-clockwise in lon/lat near the equator.
        let a = reg.add(0.0, 0.0, 0.0);
        let b = reg.add(0.01, 0.0, 0.0);
        let c = reg.add(0.0, 0.01, 0.0);
        let tri = Triangle {
            area: AreaType::Grass,
            shape: 0,
            segment: 0,
            nodes: [a, b, c],
        };

        let (normal, area) = face_normal(&reg, &tri);
        assert!(area > 1e5, "area was {}", area);

        // Outward at (0, 0) is roughly +X in ECEF.
        let up = radial_up(&reg, a);
        assert!(dot(normal, up) > 0.99);
        assert!((length(normal) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_triangle_uses_radial_up() {
        let mut reg = NodeRegistry::new();
        let a = reg.add(10.0, 45.0, 0.0);
        let b = reg.add(10.00000001, 45.0, 0.0);
        let c = reg.add(10.00000002, 45.0, 0.0);
        let tri = Triangle {
            area: AreaType::Grass,
            shape: 0,
            segment: 0,
            nodes: [a, b, c],
        };

        let (normal, _) = face_normal(&reg, &tri);
        let up = radial_up(&reg, a);
        assert!(dot(normal, up) > 0.999_999);
    }

    #[test]
    fn test_point_normals_weighted_and_faceless_radial() {
        let mut reg = NodeRegistry::new();
        let a = reg.add(0.0, 0.0, 0.0);
        let b = reg.add(0.01, 0.0, 0.0);
        let c = reg.add(0.0, 0.01, 0.0);
        let lone = reg.add(5.0, 50.0, 100.0);

        let tris = [Triangle {
            area: AreaType::Grass,
            shape: 0,
            segment: 0,
            nodes: [a, b, c],
        }];
        compute_normals(&mut reg, &tris);

        let (face, _) = face_normal(&reg, &tris[0]);
        for idx in [a, b, c] {
            let n = reg.node(idx).normal;
            assert!(dot(n, face) > 0.999_999);
        }

        let n = reg.node(lone).normal;
        assert!(dot(n, radial_up(&reg, lone)) > 0.999_999);
        assert!((length(n) - 1.0).abs() < 1e-12);
    }
}
