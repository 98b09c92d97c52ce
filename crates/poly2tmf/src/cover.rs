//! Land-cover classification: an optional class-code raster plus a
//! code/area to material table, with JSON overrides.

use std::path::Path;

use anyhow::{bail, Context, Result};
use geo::InteriorPoint;
use hashbrown::HashMap;
use log::{debug, warn};

use crate::area::AreaType;
use crate::shape::Shape;

/// Nearest-cell land-cover class grid, ESRI ASCII layout like the
/// elevation rasters but holding integer class codes.
pub struct CoverGrid {
    ncols: usize,
    nrows: usize,
    xll: f64,
    yll: f64,
    cellsize: f64,
    nodata: i32,
    data: Vec<i32>,
}

impl CoverGrid {
    pub fn from_ascii(text: &str) -> Result<CoverGrid> {
        let mut tokens = text.split_whitespace();

        let mut ncols = 0usize;
        let mut nrows = 0usize;
        let mut xll = f64::NAN;
        let mut yll = f64::NAN;
        let mut cellsize = f64::NAN;
        let mut nodata = -9999i32;

        let first_value = loop {
            let tok = tokens.next().context("empty cover grid")?;
            if let Ok(v) = tok.parse::<i32>() {
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
                "nodata_value" => nodata = value as i32,
                other => bail!("unknown grid header '{}'", other),
            }
        };

        if ncols == 0 || nrows == 0 || !xll.is_finite() || !yll.is_finite() || !(cellsize > 0.0) {
            bail!("incomplete cover grid header");
        }

        let mut values = Vec::with_capacity(ncols * nrows);
        values.push(first_value);
        for tok in tokens {
            values.push(tok.parse::<i32>().with_context(|| format!("bad cell '{}'", tok))?);
        }
        if values.len() != ncols * nrows {
            bail!("grid has {} cells, expected {}", values.len(), ncols * nrows);
        }

        // Flip to south-up row order.
        let mut data = vec![nodata; ncols * nrows];
        for row in 0..nrows {
            let dst_row = nrows - 1 - row;
            data[dst_row * ncols..(dst_row + 1) * ncols]
                .copy_from_slice(&values[row * ncols..(row + 1) * ncols]);
        }

        Ok(CoverGrid {
            ncols,
            nrows,
            xll,
            yll,
            cellsize,
            nodata,
            data,
        })
    }

    /// Nearest-cell class code at (lon, lat); `None` outside the grid or
    /// on a NODATA cell.
    pub fn sample(&self, lon: f64, lat: f64) -> Option<i32> {
        let col = ((lon - self.xll) / self.cellsize).floor();
        let row = ((lat - self.yll) / self.cellsize).floor();
        if col < 0.0 || row < 0.0 || col >= self.ncols as f64 || row >= self.nrows as f64 {
            return None;
        }

        let code = self.data[row as usize * self.ncols + col as usize];
        (code != self.nodata).then_some(code)
    }
}

pub fn load_cover(path: Option<&Path>) -> Result<Option<CoverGrid>> {
    let path = match path {
        Some(p) => p,
        None => return Ok(None),
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let grid =
        CoverGrid::from_ascii(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(grid))
}

/// On-disk shape of the `--materials` override file: a flat string map;
/// numeric keys are class codes, the rest are area names.
#[derive(Debug, serde::Deserialize)]
struct MaterialOverrides(std::collections::BTreeMap<String, String>);

/// Material naming: class-code and per-area-name entries.
pub struct MaterialTable {
    by_code: HashMap<i32, String>,
    by_area: HashMap<String, String>,
}

impl MaterialTable {
    /// Built-in class codes follow the NLCD-style convention.
    pub fn new() -> MaterialTable {
        let mut by_code = HashMap::new();
        for (code, material) in [
            (11, "Lake"),
            (21, "Urban"),
            (22, "Town"),
            (31, "Grass"),
            (41, "Forest"),
            (42, "Forest"),
            (43, "Forest"),
        ] {
            by_code.insert(code, material.to_owned());
        }

        MaterialTable {
            by_code,
            by_area: HashMap::new(),
        }
    }

    pub fn load(path: Option<&Path>) -> Result<MaterialTable> {
        let mut table = MaterialTable::new();
        let path = match path {
            Some(p) => p,
            None => return Ok(table),
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let overrides: MaterialOverrides = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;

        for (key, material) in overrides.0 {
            if let Ok(code) = key.parse::<i32>() {
                table.by_code.insert(code, material);
            } else {
                let area = AreaType::from_dir_name(&key)
                    .with_context(|| format!("material key '{}'", key))?;
                table.by_area.insert(area.name().to_owned(), material);
            }
        }

        Ok(table)
    }

    pub fn material_for_area(&self, area: AreaType) -> &str {
        self.by_area
            .get(area.name())
            .map(String::as_str)
            .unwrap_or_else(|| area.default_material())
    }

    pub fn material_for_code(&self, code: i32) -> Option<&str> {
        self.by_code.get(&code).map(String::as_str)
    }
}

impl Default for MaterialTable {
    fn default() -> Self {
        MaterialTable::new()
    }
}

/// Rename shape materials from the table. Shapes still carrying their
/// area's built-in material take the per-area override; the leftover
/// default-land shape is additionally classified by sampling the cover
/// grid at an interior point.
pub fn apply_cover(shapes: &mut [Shape], cover: Option<&CoverGrid>, table: &MaterialTable) {
    for shape in shapes.iter_mut() {
        if shape.material == shape.area.default_material() {
            shape.material = table.material_for_area(shape.area).to_owned();
        }

        let classify = shape.area.is_landmass() || shape.area.is_ocean();
        if !classify {
            continue;
        }
        let grid = match cover {
            Some(g) => g,
            None => continue,
        };
        let point = match shape.mask.interior_point() {
            Some(p) => p,
            None => continue,
        };

        match grid.sample(point.x(), point.y()) {
            Some(code) => match table.material_for_code(code) {
                Some(material) => {
                    debug!("{}: cover class {} -> {}", shape.id, code, material);
                    shape.material = material.to_owned();
                }
                None => warn!("{}: no material for cover class {}", shape.id, code),
            },
            None => debug!("{}: no cover data at interior point", shape.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use geo::polygon;

    const GRID: &str = "\
ncols 2
nrows 2
xllcorner 0.0
yllcorner 0.0
cellsize 1.0
41 21
31 -9999
";

    #[test]
    fn test_sample_orientation_and_nodata() {
        let grid = CoverGrid::from_ascii(GRID).unwrap();
        assert_eq!(grid.sample(0.5, 0.5), Some(31));
        assert_eq!(grid.sample(0.5, 1.5), Some(41));
        assert_eq!(grid.sample(1.5, 1.5), Some(21));
        assert_eq!(grid.sample(1.5, 0.5), None);
        assert_eq!(grid.sample(-0.5, 0.5), None);
    }

    #[test]
    fn test_default_land_shape_classified() {
        let grid = CoverGrid::from_ascii(GRID).unwrap();
        let table = MaterialTable::new();
        let poly = polygon![
            (x: 0.1, y: 1.1), (x: 0.9, y: 1.1), (x: 0.9, y: 1.9), (x: 0.1, y: 1.9),
        ];
        let mut shapes = vec![Shape::new(
            "t:0".to_owned(),
            AreaType::Landmass,
            AreaType::Landmass.default_material().to_owned(),
            vec![poly],
            None,
            None,
        )];

        apply_cover(&mut shapes, Some(&grid), &table);
        assert_eq!(shapes[0].material, "Forest");
    }

    #[test]
    fn test_area_override_applies_only_to_default_material() {
        let table = MaterialTable {
            by_code: HashMap::new(),
            by_area: [("Forest".to_owned(), "PineForest".to_owned())].into_iter().collect(),
        };

        let poly = polygon![
            (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 0.5, y: 1.0),
        ];
        let mut shapes = vec![
            Shape::new(
                "t:0".to_owned(),
                AreaType::Forest,
                AreaType::Forest.default_material().to_owned(),
                vec![poly.clone()],
                None,
                None,
            ),
            Shape::new(
                "t:1".to_owned(),
                AreaType::Forest,
                "CustomForest".to_owned(),
                vec![poly],
                None,
                None,
            ),
        ];

        apply_cover(&mut shapes, None, &table);
        assert_eq!(shapes[0].material, "PineForest");
        assert_eq!(shapes[1].material, "CustomForest");
    }
}
