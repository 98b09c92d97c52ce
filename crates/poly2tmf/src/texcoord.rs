//! Texture coordinates: one UV per (shape, node). Generic shapes project
//! tile-relative; shapes with texture parameters use the feature-aligned
//! linear mapping.

use hashbrown::HashMap;

use crate::node::NodeRegistry;
use crate::shape::{Shape, TexParams};
use crate::tess::Triangle;
use crate::tile::{Tile, TILE_SPAN_DEG};

/// UVs for every node a shape's triangles touch, keyed by registry index.
pub type ShapeUvs = HashMap<u32, [f64; 2]>;

fn generic_uv(tile: Tile, lon: f64, lat: f64) -> [f64; 2] {
    [
        (lon - tile.min_lon()) / TILE_SPAN_DEG,
        (lat - tile.min_lat()) / TILE_SPAN_DEG,
    ]
}

/// Feature-aligned mapping: distance and course from the reference point,
/// rotated by the feature heading, split into along-track and cross-track
/// meters. u is clamped to one texture repeat either side of the
/// centerline; v runs unclamped so long features tile along their length.
fn linear_uv(params: &TexParams, lon: f64, lat: f64) -> [f64; 2] {
    let dist = tmf::geodesic_distance_m(params.ref_lon, params.ref_lat, lon, lat);
    let course = tmf::geodesic_course_deg(params.ref_lon, params.ref_lat, lon, lat);
    let rel = (course - params.heading_deg).to_radians();

    let along = dist * rel.cos();
    let cross = dist * rel.sin();

    let u = (cross / params.width_m).clamp(-1.0, 1.0);
    let v = along / params.length_m + params.min_v;
    [u, v]
}

/// One UV map per shape, parallel to `shapes`.
pub fn generate_texcoords(
    shapes: &[Shape],
    tris: &[Triangle],
    reg: &NodeRegistry,
    tile: Tile,
) -> Vec<ShapeUvs> {
    let mut out: Vec<ShapeUvs> = vec![ShapeUvs::new(); shapes.len()];

    for tri in tris {
        let shape = &shapes[tri.shape];
        let uvs = &mut out[tri.shape];
        for &index in &tri.nodes {
            if uvs.contains_key(&index) {
                continue;
            }
            let node = reg.node(index);
            let uv = match &shape.tex_params {
                Some(params) => linear_uv(params, node.lon, node.lat),
                None => generic_uv(tile, node.lon, node.lat),
            };
            uvs.insert(index, uv);
        }
    }

    out
}
