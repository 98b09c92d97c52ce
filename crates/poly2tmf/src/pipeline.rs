//! Per-tile build pipeline: collect, clip, repair, tessellate, resolve
//! elevations, then assemble and write the mesh.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::clip::{self, ClipConfig};
use crate::cover::{self, CoverGrid, MaterialTable};
use crate::elevation;
use crate::input;
use crate::node::NodeRegistry;
use crate::normal;
use crate::output;
use crate::shape::Shape;
use crate::shared_edge;
use crate::tess;
use crate::texcoord;
use crate::tile::Tile;
use crate::tjunction;

pub struct BuildConfig {
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub load_dirs: Vec<PathBuf>,
    pub elev_dir: Option<PathBuf>,
    pub clip: ClipConfig,
    /// Write this tile's boundary sequences for its neighbors.
    pub write_shared: bool,
    pub overwrite: bool,
}

/// Every clip output ring vertex becomes a registry node so the
/// T-junction fixer and the tessellator can see them.
fn register_shape_nodes(shapes: &[Shape], reg: &mut NodeRegistry) {
    for shape in shapes {
        for segment in &shape.segments {
            for ring in std::iter::once(segment.exterior()).chain(segment.interiors()) {
                for coord in ring.coords() {
                    reg.add(coord.x, coord.y, 0.0);
                }
            }
        }
    }
}

/// Build one tile end to end. Returns false when the existing output was
/// kept.
pub fn build_tile(
    tile: Tile,
    cfg: &BuildConfig,
    cover_grid: Option<&CoverGrid>,
    materials: &MaterialTable,
) -> Result<bool> {
    let out_path = cfg.output_dir.join(format!("{}.tmf", tile));
    if out_path.exists() && !cfg.overwrite {
        debug!("{}: {} exists, skipping (use --overwrite)", tile, out_path.display());
        return Ok(false);
    }

    let mut reg = NodeRegistry::new();

    let input = input::collect_shapes(&cfg.load_dirs, &tile, &mut reg)
        .with_context(|| format!("{}: collecting input", tile))?;
    info!(
        "{}: {} input shape(s) across {} area(s)",
        tile,
        input.values().map(Vec::len).sum::<usize>(),
        input.len()
    );

    let mut shapes =
        clip::clip_tile(&tile, input, &cfg.clip).with_context(|| format!("{}: clipping", tile))?;
    register_shape_nodes(&shapes, &mut reg);

    // Neighbor-published boundary nodes arrive before the repair pass so
    // this tile's edges line up with already-built neighbors. Rebuilding
    // with --overwrite also re-reads our own saved sequences.
    shared_edge::load_shared_edges(&cfg.work_dir, tile, cfg.overwrite, &mut reg)
        .with_context(|| format!("{}: loading shared edges", tile))?;

    let inserted = tjunction::fix_t_junctions(&mut shapes, &reg);
    if inserted > 0 {
        debug!("{}: inserted {} edge point(s)", tile, inserted);
    }

    let tris = tess::tessellate_all(&shapes, &mut reg)
        .with_context(|| format!("{}: tessellating", tile))?;
    info!("{}: {} triangle(s) over {} node(s)", tile, tris.len(), reg.len());

    let grid = elevation::load_tile_grid(cfg.elev_dir.as_deref(), tile)
        .with_context(|| format!("{}: loading elevation", tile))?;
    elevation::resolve_elevations(&mut reg, &tris, grid.as_ref());

    // Elevations are final; publish the boundary for neighbors.
    shared_edge::save_shared_edges(&cfg.work_dir, tile, &reg, cfg.write_shared)
        .with_context(|| format!("{}: saving shared edges", tile))?;

    normal::compute_normals(&mut reg, &tris);
    cover::apply_cover(&mut shapes, cover_grid, materials);

    let uvs = texcoord::generate_texcoords(&shapes, &tris, &reg, tile);
    let mesh = output::assemble_mesh(tile, &shapes, &tris, &reg, &uvs);
    output::write_tile(&cfg.output_dir, tile, &mesh, cfg.overwrite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write_record(load_dir: &Path, area_dir: &str, tile: Tile, body: &str) {
        let dir = load_dir.join(area_dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.poly", tile)), body).unwrap();
    }

    #[test]
    fn test_build_tile_end_to_end() {
        let root = std::env::temp_dir().join(format!("poly2tmf-pipe-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let load = root.join("load");
        let tile = Tile::from_lon_lat(10.01, 45.01).unwrap();

        // A landmass square covering part of the tile and a lake inside it.
        let record = format!(
            "2d\nDefault\n1\n4 0\n{x0} {y0}\n{x1} {y0}\n{x1} {y1}\n{x0} {y1}\n",
            x0 = tile.min_lon(),
            y0 = tile.min_lat(),
            x1 = tile.min_lon() + 0.06,
            y1 = tile.min_lat() + 0.06,
        );
        write_record(&load, "Default", tile, &record);

        let lake = format!(
            "2d\nLake\n1\n4 0\n{x0} {y0}\n{x1} {y0}\n{x1} {y1}\n{x0} {y1}\n",
            x0 = tile.min_lon() + 0.01,
            y0 = tile.min_lat() + 0.01,
            x1 = tile.min_lon() + 0.02,
            y1 = tile.min_lat() + 0.02,
        );
        write_record(&load, "Lake", tile, &lake);

        let cfg = BuildConfig {
            work_dir: root.join("work"),
            output_dir: root.join("out"),
            load_dirs: vec![load],
            elev_dir: None,
            clip: ClipConfig::default(),
            write_shared: true,
            overwrite: false,
        };

        assert!(build_tile(tile, &cfg, None, &MaterialTable::new()).unwrap());

        let mesh = tmf::read_mesh_file(cfg.output_dir.join(format!("{}.tmf", tile))).unwrap();
        assert_eq!(mesh.tile_index, Some(tile.index()));
        assert!(!mesh.positions.is_empty());
        assert!(mesh.groups.iter().any(|g| g.material == "Lake"));
        assert!(mesh.groups.iter().any(|g| g.material == "Ocean"));

        // Boundary sequences were published for all four neighbors.
        let shared = shared_edge::shared_dir(&cfg.work_dir);
        assert_eq!(fs::read_dir(&shared).unwrap().count(), 4);

        // A second run without --overwrite keeps the output.
        assert!(!build_tile(tile, &cfg, None, &MaterialTable::new()).unwrap());

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_overwrite_rebuild_is_byte_identical() {
        let root = std::env::temp_dir().join(format!("poly2tmf-idem-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let load = root.join("load");
        let tile = Tile::from_lon_lat(5.01, 40.01).unwrap();

        let record = format!(
            "2d\nDefault\n1\n4 0\n{x0} {y0}\n{x1} {y0}\n{x1} {y1}\n{x0} {y1}\n",
            x0 = tile.min_lon(),
            y0 = tile.min_lat(),
            x1 = tile.min_lon() + 0.05,
            y1 = tile.min_lat() + 0.04,
        );
        write_record(&load, "Default", tile, &record);

        let mut cfg = BuildConfig {
            work_dir: root.join("work"),
            output_dir: root.join("out"),
            load_dirs: vec![load],
            elev_dir: None,
            clip: ClipConfig::default(),
            write_shared: true,
            overwrite: false,
        };

        assert!(build_tile(tile, &cfg, None, &MaterialTable::new()).unwrap());
        let out_path = cfg.output_dir.join(format!("{}.tmf", tile));
        let first = fs::read(&out_path).unwrap();

        // Rebuilding over unchanged inputs (and the tile's own saved
        // boundary sequences) must reproduce the exact same mesh.
        cfg.overwrite = true;
        assert!(build_tile(tile, &cfg, None, &MaterialTable::new()).unwrap());
        let second = fs::read(&out_path).unwrap();

        assert_eq!(first, second);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_input_builds_ocean_tile() {
        let root = std::env::temp_dir().join(format!("poly2tmf-ocean-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let tile = Tile::from_lon_lat(-30.0 + 0.01, 0.01).unwrap();

        let cfg = BuildConfig {
            work_dir: root.join("work"),
            output_dir: root.join("out"),
            load_dirs: vec![root.join("load")],
            elev_dir: None,
            clip: ClipConfig::default(),
            write_shared: false,
            overwrite: false,
        };

        assert!(build_tile(tile, &cfg, None, &MaterialTable::new()).unwrap());
        let mesh = tmf::read_mesh_file(cfg.output_dir.join(format!("{}.tmf", tile))).unwrap();
        assert_eq!(mesh.groups.len(), 1);
        assert_eq!(mesh.groups[0].material, "Ocean");

        fs::remove_dir_all(&root).unwrap();
    }
}
