//! Shared-edge synchronizer. Adjacent tiles are built independently and
//! in either order; the boundary subdivision must match on both sides or
//! a crack appears. Each tile persists its four boundary-node sequences
//! (one SEDG file per neighbor, keyed `<owner>_<neighbor>.sse`); a later
//! build of the neighbor loads that file before its own T-junction pass
//! and thereby adopts the subdivision. Whichever tile builds first wins.
//! Two adjacent tiles built concurrently for the first time can still
//! crack; the protocol provides no locking or barrier.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use tmf::SharedEdge;

use crate::node::NodeRegistry;
use crate::tile::{Direction, Tile};
use crate::tjunction::EDGE_EPS_DEG;

pub fn shared_dir(work_dir: &Path) -> PathBuf {
    work_dir.join("shared")
}

fn edge_file(work_dir: &Path, owner: Tile, neighbor: Tile) -> PathBuf {
    shared_dir(work_dir).join(format!("{}_{}.sse", owner, neighbor))
}

fn load_one(path: &Path, reg: &mut NodeRegistry) -> Result<usize> {
    let edge = tmf::read_edge_file(path).with_context(|| format!("reading {}", path.display()))?;

    for n in &edge.nodes {
        // Unfixed: the elevation resolver re-derives these from the grid.
        reg.add(n[0], n[1], n[2]);
    }

    Ok(edge.nodes.len())
}

/// Load neighbor boundary sequences into the registry before the
/// T-junction pass. Also re-reads this tile's own previously-saved
/// sequences when `reload_own` is set, so rebuilds are idempotent.
pub fn load_shared_edges(
    work_dir: &Path,
    tile: Tile,
    reload_own: bool,
    reg: &mut NodeRegistry,
) -> Result<usize> {
    let mut loaded = 0usize;

    for dir in Direction::ALL {
        let neighbor = match tile.neighbor(dir) {
            Some(n) => n,
            None => continue,
        };

        let theirs = edge_file(work_dir, neighbor, tile);
        if theirs.is_file() {
            let n = load_one(&theirs, reg)?;
            debug!("{}: loaded {} boundary node(s) from {}", tile, n, theirs.display());
            loaded += n;
        } else {
            debug!(
                "{}: neighbor {} has published no boundary yet ({:?} edge, first build wins)",
                tile, neighbor, dir
            );
        }

        if reload_own {
            let ours = edge_file(work_dir, tile, neighbor);
            if ours.is_file() {
                loaded += load_one(&ours, reg)?;
            }
        }
    }

    if loaded > 0 {
        info!("{}: {} shared-edge node(s) applied", tile, loaded);
    }

    Ok(loaded)
}

/// Registry nodes lying on one tile border, ordered along the edge.
fn boundary_sequence(tile: Tile, dir: Direction, reg: &NodeRegistry) -> SharedEdge {
    let eps = EDGE_EPS_DEG;

    let mut picked: Vec<[f64; 3]> = reg
        .nodes()
        .iter()
        .filter(|n| {
            let on_line = match dir {
                Direction::North => (n.lat - tile.max_lat()).abs() <= eps,
                Direction::South => (n.lat - tile.min_lat()).abs() <= eps,
                Direction::East => (n.lon - tile.max_lon()).abs() <= eps,
                Direction::West => (n.lon - tile.min_lon()).abs() <= eps,
            };
            on_line
                && n.lon >= tile.min_lon() - eps
                && n.lon <= tile.max_lon() + eps
                && n.lat >= tile.min_lat() - eps
                && n.lat <= tile.max_lat() + eps
        })
        .map(|n| [n.lon, n.lat, n.elev])
        .collect();

    match dir {
        Direction::North | Direction::South => {
            picked.sort_by(|a, b| a[0].total_cmp(&b[0]));
        }
        Direction::East | Direction::West => {
            picked.sort_by(|a, b| a[1].total_cmp(&b[1]));
        }
    }

    SharedEdge { nodes: picked }
}

/// Persist this tile's boundary sequences after elevations are final.
/// Disabled for read-only/dry-run use via `write = false`.
pub fn save_shared_edges(
    work_dir: &Path,
    tile: Tile,
    reg: &NodeRegistry,
    write: bool,
) -> Result<usize> {
    if !write {
        debug!("{}: shared-edge writing disabled", tile);
        return Ok(0);
    }

    std::fs::create_dir_all(shared_dir(work_dir))
        .with_context(|| format!("creating {}", shared_dir(work_dir).display()))?;

    let mut saved = 0usize;

    for dir in Direction::ALL {
        let neighbor = match tile.neighbor(dir) {
            Some(n) => n,
            None => continue,
        };

        let edge = boundary_sequence(tile, dir, reg);
        let path = edge_file(work_dir, tile, neighbor);

        tmf::write_edge_file(&path, &edge)
            .with_context(|| format!("writing {}", path.display()))?;

        debug!("{}: saved {} node(s) to {}", tile, edge.nodes.len(), path.display());
        saved += edge.nodes.len();
    }

    Ok(saved)
}
