use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info};
use std::path::PathBuf;
use std::time::Instant;

mod area;
mod clip;
mod cover;
mod elevation;
mod input;
mod node;
mod normal;
mod output;
mod pipeline;
mod shape;
mod shared_edge;
mod tess;
mod texcoord;
mod tile;
mod tjunction;

use clip::{ClipConfig, SliverMerge};
use cover::MaterialTable;
use pipeline::BuildConfig;
use tile::Tile;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SliverMergeArg {
    /// Merge slivers into the first adjacent output shape.
    First,
    /// Merge slivers into the highest-priority adjacent output shape.
    Priority,
}

impl From<SliverMergeArg> for SliverMerge {
    fn from(arg: SliverMergeArg) -> Self {
        match arg {
            SliverMergeArg::First => SliverMerge::First,
            SliverMergeArg::Priority => SliverMerge::Priority,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "poly2tmf", version)]
struct Args {
    /// Tile index of the (south-west) tile to build.
    #[arg(long, conflicts_with_all = ["lon", "lat"])]
    tile: Option<u64>,

    /// Longitude selecting the tile to build (with --lat).
    #[arg(long, requires = "lat")]
    lon: Option<f64>,

    /// Latitude selecting the tile to build (with --lon).
    #[arg(long, requires = "lon")]
    lat: Option<f64>,

    /// Number of tile columns to build, eastwards from the start tile.
    #[arg(long, default_value_t = 1)]
    x_span: u32,

    /// Number of tile rows to build, northwards from the start tile.
    #[arg(long, default_value_t = 1)]
    y_span: u32,

    /// Scratch directory; shared-edge files live under <work-dir>/shared.
    #[arg(long, default_value = "work")]
    work_dir: PathBuf,

    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Polygon input root(s) with per-area subdirectories. Repeatable.
    #[arg(long = "load-dir", required = true)]
    load_dirs: Vec<PathBuf>,

    /// Directory of per-tile elevation grids (<tile>.arr).
    #[arg(long)]
    elev_dir: Option<PathBuf>,

    /// Land-cover class grid for classifying leftover land.
    #[arg(long)]
    cover: Option<PathBuf>,

    /// JSON material-name overrides (area names or cover class codes).
    #[arg(long)]
    materials: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SliverMergeArg::Priority)]
    sliver_merge: SliverMergeArg,

    /// Do not publish this tile's boundary sequences.
    #[arg(long, default_value_t = false)]
    no_write_shared: bool,

    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Continue with the next tile after a per-tile failure.
    #[arg(long, default_value_t = false)]
    keep_going: bool,

    /// Comma-separated shape ids to trace through the clipper.
    #[arg(long, value_delimiter = ',')]
    trace_shapes: Vec<String>,
}

fn start_tile(args: &Args) -> Result<Tile> {
    match (args.tile, args.lon, args.lat) {
        (Some(index), None, None) => Tile::from_index(index),
        (None, Some(lon), Some(lat)) => Tile::from_lon_lat(lon, lat),
        (None, None, None) => bail!("select a tile with --tile or --lon/--lat"),
        _ => unreachable!("clap enforces the exclusion"),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let start = start_tile(&args)?;

    let cfg = BuildConfig {
        work_dir: args.work_dir.clone(),
        output_dir: args.output_dir.clone(),
        load_dirs: args.load_dirs.clone(),
        elev_dir: args.elev_dir.clone(),
        clip: ClipConfig {
            sliver_merge: args.sliver_merge.into(),
            trace: args.trace_shapes.iter().cloned().collect(),
        },
        write_shared: !args.no_write_shared,
        overwrite: args.overwrite,
    };

    let cover_grid = cover::load_cover(args.cover.as_deref()).context("loading cover grid")?;
    let materials =
        MaterialTable::load(args.materials.as_deref()).context("loading material table")?;

    // Tiles build sequentially; cross-process runs coordinate through the
    // shared-edge files only.
    let t0 = Instant::now();
    let mut built = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for dy in 0..args.y_span {
        for dx in 0..args.x_span {
            let tile = match offset_tile(start, dx, dy) {
                Some(t) => t,
                None => {
                    error!("tile span leaves the grid at +{}+{}", dx, dy);
                    failed += 1;
                    if args.keep_going {
                        continue;
                    }
                    bail!("tile span leaves the grid");
                }
            };

            match pipeline::build_tile(tile, &cfg, cover_grid.as_ref(), &materials) {
                Ok(true) => built += 1,
                Ok(false) => skipped += 1,
                Err(err) => {
                    error!("{}: {:#}", tile, err);
                    failed += 1;
                    if !args.keep_going {
                        return Err(err);
                    }
                }
            }
        }
    }

    info!(
        "built {}, skipped {}, failed {} in {:.1?}",
        built,
        skipped,
        failed,
        t0.elapsed()
    );

    if failed > 0 {
        bail!("{} tile(s) failed", failed);
    }
    Ok(())
}

/// Step east/north across the grid without longitude wraparound.
fn offset_tile(start: Tile, dx: u32, dy: u32) -> Option<Tile> {
    let mut tile = start;
    for _ in 0..dx {
        tile = tile.neighbor(tile::Direction::East)?;
    }
    for _ in 0..dy {
        tile = tile.neighbor(tile::Direction::North)?;
    }
    Some(tile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_tile_walks_grid() {
        let start = Tile::from_lon_lat(0.01, 0.01).unwrap();
        let stepped = offset_tile(start, 2, 1).unwrap();
        assert!((stepped.min_lon() - 0.25).abs() < 1e-9);
        assert!((stepped.min_lat() - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_start_tile_selection() {
        let args = Args::parse_from([
            "poly2tmf",
            "--load-dir",
            "in",
            "--lon",
            "10.3",
            "--lat",
            "45.2",
        ]);
        let tile = start_tile(&args).unwrap();
        assert!(tile.contains(10.3, 45.2));

        let args = Args::parse_from(["poly2tmf", "--load-dir", "in", "--tile", "42"]);
        assert_eq!(start_tile(&args).unwrap().index(), 42);

        let args = Args::parse_from(["poly2tmf", "--load-dir", "in"]);
        assert!(start_tile(&args).is_err());
    }
}
