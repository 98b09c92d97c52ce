//! Elevation: per-tile raster grid loader (ESRI ASCII format, void cells
//! back-filled at load) and the per-vertex elevation resolver with its
//! area-type flattening policies.

use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, warn};

use crate::area::AreaType;
use crate::node::NodeRegistry;
use crate::tess::Triangle;
use crate::tile::Tile;

/// Raster values below this are void ("unknown") and get back-filled.
pub const VOID_SENTINEL: f64 = -9000.0;

/// Maximum extra elevation per meter of distance from a stream triangle's
/// lowest vertex.
pub const STREAM_SLOPE: f64 = 0.20;

/// Same cap for road surfaces.
pub const ROAD_SLOPE: f64 = 0.30;

/// Regular elevation grid; rows stored south to north.
pub struct ElevationGrid {
    ncols: usize,
    nrows: usize,
    xll: f64,
    yll: f64,
    cellsize: f64,
    data: Vec<f64>,
}

impl ElevationGrid {
    /// Parse an ESRI ASCII grid. Data rows are listed north to south in
    /// the file; voids (NODATA or anything below the sentinel) are
    /// back-filled by iterated neighbor averaging.
    pub fn from_ascii(text: &str) -> Result<ElevationGrid> {
        let mut tokens = text.split_whitespace();

        let mut ncols = 0usize;
        let mut nrows = 0usize;
        let mut xll = f64::NAN;
        let mut yll = f64::NAN;
        let mut cellsize = f64::NAN;
        let mut nodata = -9999.0f64;

        // Header: keyword/value pairs until the first bare number.
        let first_value = loop {
            let tok = tokens.next().context("empty elevation grid")?;
            if let Ok(v) = tok.parse::<f64>() {
                break v;
            }

            let value: f64 = tokens
                .next()
                .context("header keyword without value")?
                .parse()
                .with_context(|| format!("bad value for header '{}'", tok))?;

            match tok.to_ascii_lowercase().as_str() {
                "ncols" => ncols = value as usize,
                "nrows" => nrows = value as usize,
                "xllcorner" => xll = value,
                "yllcorner" => yll = value,
                "cellsize" => cellsize = value,
                "nodata_value" => nodata = value,
                other => bail!("unknown grid header '{}'", other),
            }
        };

        if ncols < 2 || nrows < 2 || !xll.is_finite() || !yll.is_finite() || !(cellsize > 0.0) {
            bail!("incomplete elevation grid header");
        }

        let mut values = Vec::with_capacity(ncols * nrows);
        values.push(first_value);
        for tok in tokens {
            values.push(tok.parse::<f64>().with_context(|| format!("bad cell '{}'", tok))?);
        }

        if values.len() != ncols * nrows {
            bail!("grid has {} cells, expected {}", values.len(), ncols * nrows);
        }

        // Flip to south-up row order and normalize voids.
        let mut data = vec![0.0f64; ncols * nrows];
        for row in 0..nrows {
            let src = &values[row * ncols..(row + 1) * ncols];
            let dst_row = nrows - 1 - row;
            for (col, &v) in src.iter().enumerate() {
                data[dst_row * ncols + col] = if v < VOID_SENTINEL || v == nodata {
                    f64::NEG_INFINITY
                } else {
                    v
                };
            }
        }

        let mut grid = ElevationGrid {
            ncols,
            nrows,
            xll,
            yll,
            cellsize,
            data,
        };
        grid.fill_voids();

        Ok(grid)
    }

    /// Back-fill void cells from their non-void neighbors, sweeping until
    /// none remain. A fully-void grid flattens to zero.
    fn fill_voids(&mut self) {
        let mut voids: usize = self.data.iter().filter(|v| !v.is_finite()).count();
        if voids == 0 {
            return;
        }
        debug!("filling {} void cell(s)", voids);

        while voids > 0 {
            let snapshot = self.data.clone();
            let mut filled_this_pass = 0usize;

            for row in 0..self.nrows {
                for col in 0..self.ncols {
                    let idx = row * self.ncols + col;
                    if snapshot[idx].is_finite() {
                        continue;
                    }

                    let mut sum = 0.0;
                    let mut count = 0usize;
                    for dr in -1i64..=1 {
                        for dc in -1i64..=1 {
                            let r = row as i64 + dr;
                            let c = col as i64 + dc;
                            if r < 0 || c < 0 || r >= self.nrows as i64 || c >= self.ncols as i64 {
                                continue;
                            }
                            let v = snapshot[r as usize * self.ncols + c as usize];
                            if v.is_finite() {
                                sum += v;
                                count += 1;
                            }
                        }
                    }

                    if count > 0 {
                        self.data[idx] = sum / count as f64;
                        filled_this_pass += 1;
                    }
                }
            }

            if filled_this_pass == 0 {
                // No seed anywhere; flatten what is left.
                for v in self.data.iter_mut() {
                    if !v.is_finite() {
                        *v = 0.0;
                    }
                }
                return;
            }

            voids -= filled_this_pass;
        }
    }

    /// Bilinear interpolation at a (lon, lat) in degrees; queries outside
    /// the grid clamp to its edge.
    pub fn interpolate(&self, lon: f64, lat: f64) -> f64 {
        let gx = ((lon - self.xll) / self.cellsize).clamp(0.0, (self.ncols - 1) as f64);
        let gy = ((lat - self.yll) / self.cellsize).clamp(0.0, (self.nrows - 1) as f64);

        let x0 = (gx.floor() as usize).min(self.ncols - 2);
        let y0 = (gy.floor() as usize).min(self.nrows - 2);
        let fx = gx - x0 as f64;
        let fy = gy - y0 as f64;

        let v00 = self.data[y0 * self.ncols + x0];
        let v10 = self.data[y0 * self.ncols + x0 + 1];
        let v01 = self.data[(y0 + 1) * self.ncols + x0];
        let v11 = self.data[(y0 + 1) * self.ncols + x0 + 1];

        let bottom = v00 + (v10 - v00) * fx;
        let top = v01 + (v11 - v01) * fx;
        bottom + (top - bottom) * fy
    }
}

/// Load `<elev-dir>/<tile>.arr`. A missing file is recoverable: the tile
/// builds at elevation zero.
pub fn load_tile_grid(elev_dir: Option<&Path>, tile: Tile) -> Result<Option<ElevationGrid>> {
    let dir = match elev_dir {
        Some(d) => d,
        None => return Ok(None),
    };

    let path = dir.join(format!("{}.arr", tile));
    if !path.is_file() {
        warn!("{}: no elevation grid at {}, using zero", tile, path.display());
        return Ok(None);
    }

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let grid = ElevationGrid::from_ascii(&text)
        .with_context(|| format!("parsing {}", path.display()))?;

    Ok(Some(grid))
}

/// Assign every unfixed node its base elevation from the grid, then apply
/// the per-area-type flattening policies over the triangles, in AreaType
/// order. That ordering is an approximation, not a dependency order.
pub fn resolve_elevations(reg: &mut NodeRegistry, tris: &[Triangle], grid: Option<&ElevationGrid>) {
    // Base pass.
    for index in 0..reg.len() as u32 {
        let node = reg.node(index);
        if node.fixed_elevation {
            continue;
        }
        let elev = grid.map(|g| g.interpolate(node.lon, node.lat)).unwrap_or(0.0);
        reg.set_elevation(index, elev);
    }

    apply_flattening(reg, tris);
}

/// The per-area-type flattening passes, separate from the base grid pass.
fn apply_flattening(reg: &mut NodeRegistry, tris: &[Triangle]) {
    for area in AreaType::ALL {
        let flatten = area.is_closed_water();
        let slope = if area.is_stream() {
            Some(STREAM_SLOPE)
        } else if area.is_road() {
            Some(ROAD_SLOPE)
        } else {
            None
        };
        let zero = area.is_ocean();

        if !flatten && slope.is_none() && !zero {
            continue;
        }

        for tri in tris.iter().filter(|t| t.area == area) {
            if zero {
                for &n in &tri.nodes {
                    reg.set_elevation(n, 0.0);
                }
                continue;
            }

            if flatten {
                let low = tri
                    .nodes
                    .iter()
                    .map(|&n| reg.node(n).elev)
                    .fold(f64::INFINITY, f64::min);
                for &n in &tri.nodes {
                    reg.set_elevation(n, low);
                }
                continue;
            }

            if let Some(slope) = slope {
                let (&low_idx, low_elev) = match tri
                    .nodes
                    .iter()
                    .map(|n| (n, reg.node(*n).elev))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                {
                    Some((n, e)) => (n, e),
                    None => continue,
                };

                let low_node = (reg.node(low_idx).lon, reg.node(low_idx).lat);
                for &n in &tri.nodes {
                    let node = reg.node(n);
                    let dist = tmf::geodesic_distance_m(node.lon, node.lat, low_node.0, low_node.1);
                    let cap = low_elev + slope * dist;
                    if node.elev > cap {
                        reg.set_elevation(n, cap);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRegistry;

    const GRID: &str = "\
ncols 3
nrows 3
xllcorner 0.0
yllcorner 0.0
cellsize 0.5
NODATA_value -9999
9 9 9
5 5 5
1 1 1
";

    #[test]
    fn test_grid_orientation_and_interpolation() {
        let grid = ElevationGrid::from_ascii(GRID).unwrap();

        // The first data row is the northern edge.
        assert!((grid.interpolate(0.5, 1.0) - 9.0).abs() < 1e-9);
        assert!((grid.interpolate(0.5, 0.0) - 1.0).abs() < 1e-9);
        assert!((grid.interpolate(0.5, 0.5) - 5.0).abs() < 1e-9);
        // Halfway between the south and middle rows.
        assert!((grid.interpolate(0.5, 0.25) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_void_cells_backfilled() {
        let text = "\
ncols 2
nrows 2
xllcorner 0.0
yllcorner 0.0
cellsize 1.0
10 -9999
10 10
";
        let grid = ElevationGrid::from_ascii(text).unwrap();
        // The void corner picks up the neighbor average.
        assert!((grid.interpolate(1.0, 1.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_cell_count_mismatch_rejected() {
        let text = "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3\n";
        assert!(ElevationGrid::from_ascii(text).is_err());
    }

    fn tri(area: AreaType, nodes: [u32; 3]) -> Triangle {
        Triangle {
            area,
            shape: 0,
            segment: 0,
            nodes,
        }
    }

    #[test]
    fn test_closed_water_flattens_to_minimum() {
        let mut reg = NodeRegistry::new();
        let a = reg.add(0.0, 0.0, 0.0);
        let b = reg.add(0.001, 0.0, 0.0);
        let c = reg.add(0.0, 0.001, 0.0);
        reg.set_elevation(a, 12.0);
        reg.set_elevation(b, 15.0);
        reg.set_elevation(c, 11.0);

        let tris = [tri(AreaType::Lake, [a, b, c])];
        super::apply_flattening(&mut reg, &tris);

        assert_eq!(reg.node(a).elev, 11.0);
        assert_eq!(reg.node(b).elev, 11.0);
        assert_eq!(reg.node(c).elev, 11.0);
    }

    #[test]
    fn test_stream_slope_cap() {
        let mut reg = NodeRegistry::new();
        let a = reg.add(0.0, 0.0, 0.0);
        let b = reg.add(0.01, 0.0, 0.0); // ~1113 m east
        let c = reg.add(0.0, 0.0001, 0.0);
        reg.set_elevation(a, 5.0);
        reg.set_elevation(b, 10_000.0);
        reg.set_elevation(c, 6.0);

        let tris = [tri(AreaType::Stream, [a, b, c])];
        super::apply_flattening(&mut reg, &tris);

        let dist = tmf::geodesic_distance_m(0.01, 0.0, 0.0, 0.0);
        let cap = 5.0 + STREAM_SLOPE * dist;
        assert!((reg.node(b).elev - cap).abs() < 1e-6);
        // Under-cap vertices stay untouched.
        assert_eq!(reg.node(c).elev, 6.0);
    }

    #[test]
    fn test_ocean_forced_to_zero_and_fixed_nodes_kept() {
        let mut reg = NodeRegistry::new();
        let a = reg.add(0.0, 0.0, 0.0);
        let fixed = reg.add_fixed(0.001, 0.0, 77.0);
        let c = reg.add(0.0, 0.001, 0.0);
        reg.set_elevation(a, 3.0);
        reg.set_elevation(c, 4.0);

        let tris = [tri(AreaType::Ocean, [a, fixed, c])];
        super::apply_flattening(&mut reg, &tris);

        assert_eq!(reg.node(a).elev, 0.0);
        assert_eq!(reg.node(c).elev, 0.0);
        assert_eq!(reg.node(fixed).elev, 77.0);
    }
}
