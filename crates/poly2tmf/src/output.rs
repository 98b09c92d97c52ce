//! Output assembly: compact the used nodes into vertex/UV pools, build
//! the material groups, and write the tile mesh.

use std::path::Path;

use anyhow::{Context, Result};
use hashbrown::HashMap;
use log::{debug, info};
use tmf::{TmfMesh, TriGroup};

use crate::node::NodeRegistry;
use crate::shape::Shape;
use crate::tess::Triangle;
use crate::texcoord::ShapeUvs;
use crate::tile::Tile;

/// Pack a finished tile into a mesh. Only nodes referenced by a triangle
/// become vertices; positions are f32 offsets from the bounding-sphere
/// center, which stays f64.
pub fn assemble_mesh(
    tile: Tile,
    shapes: &[Shape],
    tris: &[Triangle],
    reg: &NodeRegistry,
    uvs: &[ShapeUvs],
) -> TmfMesh {
    // First pass: compact node indices in order of first use, in ECEF.
    let mut vertex_of: HashMap<u32, u32> = HashMap::new();
    let mut ecef: Vec<[f64; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();

    for tri in tris {
        for &index in &tri.nodes {
            if vertex_of.contains_key(&index) {
                continue;
            }
            let node = reg.node(index);
            vertex_of.insert(index, ecef.len() as u32);
            ecef.push(tmf::geodetic_to_ecef(node.lat, node.lon, node.elev));
            normals.push(node.normal.map(|c| c as f32));
        }
    }

    let (center, radius) = bounding_sphere(&ecef);
    let positions: Vec<[f32; 3]> = ecef
        .iter()
        .map(|p| {
            [
                (p[0] - center[0]) as f32,
                (p[1] - center[1]) as f32,
                (p[2] - center[2]) as f32,
            ]
        })
        .collect();

    // Second pass: deduplicated UV pool and per-material triangle groups.
    // BTreeMap keeps group order stable across runs.
    let mut texcoords: Vec<[f32; 2]> = Vec::new();
    let mut uv_of: HashMap<[u32; 2], u32> = HashMap::new();
    let mut groups: std::collections::BTreeMap<&str, Vec<[u32; 6]>> = Default::default();

    for tri in tris {
        let shape = &shapes[tri.shape];
        let shape_uvs = &uvs[tri.shape];

        let mut corners = [0u32; 6];
        for (i, &index) in tri.nodes.iter().enumerate() {
            let uv = shape_uvs.get(&index).copied().unwrap_or([0.0, 0.0]);
            let uv32 = [uv[0] as f32, uv[1] as f32];
            let key = uv32.map(f32::to_bits);
            let t = *uv_of.entry(key).or_insert_with(|| {
                texcoords.push(uv32);
                (texcoords.len() - 1) as u32
            });

            corners[i * 2] = vertex_of[&index];
            corners[i * 2 + 1] = t;
        }

        groups.entry(shape.material.as_str()).or_default().push(corners);
    }

    let groups: Vec<TriGroup> = groups
        .into_iter()
        .map(|(material, tris)| TriGroup {
            material: material.to_owned(),
            tris,
        })
        .collect();

    debug!(
        "{}: {} vertices, {} uvs, {} group(s)",
        tile,
        positions.len(),
        texcoords.len(),
        groups.len()
    );

    TmfMesh {
        tile_index: Some(tile.index()),
        center,
        radius,
        positions,
        normals,
        texcoords,
        groups,
    }
}

/// Axis-aligned box center plus the max vertex distance. Not the minimal
/// sphere, but tight enough for culling.
fn bounding_sphere(points: &[[f64; 3]]) -> ([f64; 3], f64) {
    if points.is_empty() {
        return ([0.0; 3], 0.0);
    }

    let mut lo = points[0];
    let mut hi = points[0];
    for p in points {
        for axis in 0..3 {
            lo[axis] = lo[axis].min(p[axis]);
            hi[axis] = hi[axis].max(p[axis]);
        }
    }

    let center = [
        (lo[0] + hi[0]) * 0.5,
        (lo[1] + hi[1]) * 0.5,
        (lo[2] + hi[2]) * 0.5,
    ];
    let radius = points
        .iter()
        .map(|p| {
            let dx = p[0] - center[0];
            let dy = p[1] - center[1];
            let dz = p[2] - center[2];
            (dx * dx + dy * dy + dz * dz).sqrt()
        })
        .fold(0.0f64, f64::max);

    (center, radius)
}

/// Write `<output-dir>/<tile>.tmf`. Returns false when an existing file
/// was kept.
pub fn write_tile(output_dir: &Path, tile: Tile, mesh: &TmfMesh, overwrite: bool) -> Result<bool> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let path = output_dir.join(format!("{}.tmf", tile));
    if path.exists() && !overwrite {
        debug!("{}: {} exists, skipping (use --overwrite)", tile, path.display());
        return Ok(false);
    }

    tmf::write_mesh_file(&path, mesh).with_context(|| format!("writing {}", path.display()))?;
    info!(
        "{}: wrote {} ({} triangles)",
        tile,
        path.display(),
        mesh.groups.iter().map(|g| g.tris.len()).sum::<usize>()
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::AreaType;
    use crate::shape::Shape;
    use crate::texcoord::generate_texcoords;
    use geo::polygon;

    fn fixture() -> (Tile, Vec<Shape>, Vec<Triangle>, NodeRegistry) {
        let tile = Tile::from_lon_lat(0.01, 0.01).unwrap();
        let poly = polygon![
            (x: 0.0, y: 0.0), (x: 0.05, y: 0.0), (x: 0.05, y: 0.05), (x: 0.0, y: 0.05),
        ];
        let shape = Shape::new(
            "t:0".to_owned(),
            AreaType::Grass,
            "Grass".to_owned(),
            vec![poly],
            None,
            None,
        );

        let mut reg = NodeRegistry::new();
        let a = reg.add(0.0, 0.0, 10.0);
        let b = reg.add(0.05, 0.0, 10.0);
        let c = reg.add(0.05, 0.05, 10.0);
        let d = reg.add(0.0, 0.05, 10.0);
        for i in 0..reg.len() as u32 {
            reg.set_normal(i, [0.0, 0.0, 1.0]);
        }

        let tris = vec![
            Triangle {
                area: AreaType::Grass,
                shape: 0,
                segment: 0,
                nodes: [a, b, c],
            },
            Triangle {
                area: AreaType::Grass,
                shape: 0,
                segment: 0,
                nodes: [a, c, d],
            },
        ];

        (tile, vec![shape], tris, reg)
    }

    #[test]
    fn test_assemble_compacts_and_groups() {
        let (tile, shapes, tris, reg) = fixture();
        let uvs = generate_texcoords(&shapes, &tris, &reg, tile);
        let mesh = assemble_mesh(tile, &shapes, &tris, &reg, &uvs);

        assert_eq!(mesh.tile_index, Some(tile.index()));
        // Two triangles over four vertices, not six.
        assert_eq!(mesh.positions.len(), 4);
        assert_eq!(mesh.normals.len(), 4);
        assert_eq!(mesh.texcoords.len(), 4);
        assert_eq!(mesh.groups.len(), 1);
        assert_eq!(mesh.groups[0].material, "Grass");
        assert_eq!(mesh.groups[0].tris.len(), 2);

        // Every corner index resolves.
        for t in &mesh.groups[0].tris {
            for pair in t.chunks(2) {
                assert!((pair[0] as usize) < mesh.positions.len());
                assert!((pair[1] as usize) < mesh.texcoords.len());
            }
        }

        // The bounding sphere covers every vertex.
        for p in &mesh.positions {
            let d = ((p[0] as f64).powi(2) + (p[1] as f64).powi(2) + (p[2] as f64).powi(2)).sqrt();
            assert!(d <= mesh.radius + 1.0);
        }
    }

    #[test]
    fn test_write_skips_existing_without_overwrite() {
        let (tile, shapes, tris, reg) = fixture();
        let uvs = generate_texcoords(&shapes, &tris, &reg, tile);
        let mesh = assemble_mesh(tile, &shapes, &tris, &reg, &uvs);

        let dir = std::env::temp_dir().join(format!("poly2tmf-out-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        assert!(write_tile(&dir, tile, &mesh, false).unwrap());
        assert!(!write_tile(&dir, tile, &mesh, false).unwrap());
        assert!(write_tile(&dir, tile, &mesh, true).unwrap());

        let read = tmf::read_mesh_file(dir.join(format!("{}.tmf", tile))).unwrap();
        assert_eq!(read, mesh);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
