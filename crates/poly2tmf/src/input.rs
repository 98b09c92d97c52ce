//! Polygon input collector: walks the load directories, picks up every
//! record file for the selected tile, and parses the text polygon format.
//!
//! Record format (whitespace-separated, `#` starts a comment line):
//!
//! ```text
//! <marker>          2d | 2d_mask | 2d_tex | 3d
//! <material>
//! [2d_tex]  ref_lon ref_lat width_m length_m heading_deg min_u max_u min_v max_v
//! [2d_mask] <mask_contour_count> followed by that many contours
//! <contour_count>
//! per contour: "<point_count> <hole_flag>" then one point per line,
//!              "lon lat" for 2-D records or "lon lat elev" for 3-D.
//! ```
//!
//! Multiple records per file are read until EOF. 3-D points are inserted
//! into the node registry with authoritative elevations at load time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use geo::{LineString, MultiPolygon, Polygon};
use log::{debug, warn};
use walkdir::WalkDir;

use crate::area::AreaType;
use crate::node::NodeRegistry;
use crate::shape::{Shape, TexParams};
use crate::tile::Tile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    TwoD,
    TwoDMask,
    TwoDTex,
    ThreeD,
}

impl Marker {
    fn parse(s: &str) -> Result<Marker> {
        let marker = match s.to_ascii_lowercase().as_str() {
            "2d" => Marker::TwoD,
            "2d_mask" => Marker::TwoDMask,
            "2d_tex" => Marker::TwoDTex,
            "3d" => Marker::ThreeD,
            other => bail!("unknown record marker '{}'", other),
        };
        Ok(marker)
    }
}

/// Cursor over the meaningful lines of a record file.
struct Lines<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        Self { lines, pos: 0 }
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<&'a str> {
        let line = self.lines.get(self.pos).copied().context("unexpected end of record")?;
        self.pos += 1;
        Ok(line)
    }

    fn remaining(&self) -> usize {
        self.lines.len() - self.pos
    }

    fn next_floats(&mut self, want: usize) -> Result<Vec<f64>> {
        let line = self.next()?;
        let vals: Vec<f64> = line
            .split_whitespace()
            .map(|t| t.parse::<f64>().with_context(|| format!("bad number '{}'", t)))
            .collect::<Result<_>>()?;
        if vals.len() < want {
            bail!("expected {} numbers, got {} in '{}'", want, vals.len(), line);
        }
        Ok(vals)
    }
}

/// One parsed contour: hole flag plus (lon, lat, elev) points.
struct Contour {
    hole: bool,
    points: Vec<[f64; 3]>,
}

fn parse_contour(lines: &mut Lines<'_>, three_d: bool) -> Result<Contour> {
    let header = lines.next_floats(2)?;
    let count = header[0] as usize;
    let hole = header[1] != 0.0;

    // A triangle is the smallest valid contour; anything less is a
    // malformed input and aborts the build.
    if count < 3 {
        bail!("malformed contour: {} points (minimum 3)", count);
    }
    // Each point is one line, so a count past the end of the file is a
    // corrupt header; reject it before reserving point storage.
    if count > lines.remaining() {
        bail!(
            "malformed contour: {} points declared, {} line(s) left",
            count,
            lines.remaining()
        );
    }

    let want = if three_d { 3 } else { 2 };
    let mut points = Vec::with_capacity(count);

    for _ in 0..count {
        let vals = lines.next_floats(want)?;
        let elev = if three_d { vals[2] } else { 0.0 };
        points.push([vals[0], vals[1], elev]);
    }

    Ok(Contour { hole, points })
}

/// Assemble contours into polygons: each non-hole contour opens a new
/// polygon, hole contours attach to the polygon opened last.
fn contours_to_polygons(contours: Vec<Contour>) -> Result<Vec<Polygon<f64>>> {
    let mut polys: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();

    for contour in contours {
        let ring = LineString::from(
            contour
                .points
                .iter()
                .map(|p| (p[0], p[1]))
                .collect::<Vec<_>>(),
        );

        if contour.hole {
            match polys.last_mut() {
                Some((_, holes)) => holes.push(ring),
                None => bail!("hole contour before any outer contour"),
            }
        } else {
            polys.push((ring, Vec::new()));
        }
    }

    Ok(polys
        .into_iter()
        .map(|(exterior, holes)| Polygon::new(exterior, holes))
        .collect())
}

fn parse_record(
    lines: &mut Lines<'_>,
    area: AreaType,
    id: String,
    reg: &mut NodeRegistry,
) -> Result<Shape> {
    let marker = Marker::parse(lines.next()?)?;
    let material = lines.next()?.to_owned();

    let tex_params = if marker == Marker::TwoDTex {
        let v = lines.next_floats(9)?;
        Some(TexParams {
            ref_lon: v[0],
            ref_lat: v[1],
            width_m: v[2],
            length_m: v[3],
            heading_deg: v[4],
            min_u: v[5],
            max_u: v[6],
            min_v: v[7],
            max_v: v[8],
        })
    } else {
        None
    };

    // Explicit mask contours come first for 2d_mask records.
    let mask = if marker == Marker::TwoDMask {
        let mask_count = lines.next_floats(1)?[0] as usize;
        if mask_count > lines.remaining() {
            bail!("malformed record: {} mask contours declared", mask_count);
        }
        let mut contours = Vec::with_capacity(mask_count);
        for _ in 0..mask_count {
            contours.push(parse_contour(lines, false)?);
        }
        Some(MultiPolygon(contours_to_polygons(contours)?))
    } else {
        None
    };

    let three_d = marker == Marker::ThreeD;
    let contour_count = lines.next_floats(1)?[0] as usize;
    if contour_count == 0 {
        bail!("record with zero contours");
    }
    if contour_count > lines.remaining() {
        bail!("malformed record: {} contours declared", contour_count);
    }

    let mut contours = Vec::with_capacity(contour_count);
    for _ in 0..contour_count {
        contours.push(parse_contour(lines, three_d)?);
    }

    // Authored 3-D points carry authoritative elevations.
    if three_d {
        for contour in &contours {
            for p in &contour.points {
                reg.add_fixed(p[0], p[1], p[2]);
            }
        }
    }

    let segments = contours_to_polygons(contours)?;

    Ok(Shape::new(id, area, material, segments, mask, tex_params))
}

/// Parse every record in one file.
fn parse_file(
    text: &str,
    file_stem: &str,
    area: AreaType,
    reg: &mut NodeRegistry,
) -> Result<Vec<Shape>> {
    let mut lines = Lines::new(text);
    let mut shapes = Vec::new();

    while lines.peek().is_some() {
        let id = format!("{}:{}", file_stem, shapes.len());
        let shape = parse_record(&mut lines, area, id.clone(), reg)
            .with_context(|| format!("record {}", id))?;
        shapes.push(shape);
    }

    Ok(shapes)
}

/// First dot-separated component of a file stem; record files are named
/// `<tile>.<anything>` by the upstream polygon generators.
fn stem_tile_component(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(name.split('.').next()?.to_owned())
}

/// Load every record for `tile` found under the area-type subdirectories
/// of the given load directories.
pub fn collect_shapes(
    load_dirs: &[PathBuf],
    tile: &Tile,
    reg: &mut NodeRegistry,
) -> Result<BTreeMap<AreaType, Vec<Shape>>> {
    let tile_name = tile.to_string();
    let mut out: BTreeMap<AreaType, Vec<Shape>> = BTreeMap::new();

    for dir in load_dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(err) => {
                warn!("load dir {} unreadable: {}", dir.display(), err);
                continue;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let area = match AreaType::from_dir_name(&dir_name) {
                Ok(a) => a,
                Err(_) => {
                    debug!("skipping non-area directory {}", dir_name);
                    continue;
                }
            };

            if area.is_ocean() {
                warn!("ignoring input directory for the implicit Ocean area");
                continue;
            }

            for file in WalkDir::new(entry.path())
                .follow_links(true)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let path = file.into_path();
                if stem_tile_component(&path).as_deref() != Some(tile_name.as_str()) {
                    continue;
                }

                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();

                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;

                let shapes = parse_file(&text, &stem, area, reg)
                    .with_context(|| format!("parsing {}", path.display()))?;

                debug!(
                    "{}: {} {} shape(s) from {}",
                    tile_name,
                    shapes.len(),
                    area,
                    path.display()
                );

                out.entry(area).or_default().extend(shapes);
            }
        }
    }

    Ok(out)
}
