//! Shape: one input feature. One or more polygon segments sharing a
//! material and an area type, plus the aggregate clip mask the priority
//! clipper works on. The mask is the shape's full claimed surface; the
//! segments are what eventually gets tessellated.

use geo::{BooleanOps, MultiPolygon, Polygon};

use crate::area::AreaType;

/// Parameters for feature-aligned (linear) texturing: a reference point,
/// the feature's width/length in meters, its heading, and u/v bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexParams {
    pub ref_lon: f64,
    pub ref_lat: f64,
    pub width_m: f64,
    pub length_m: f64,
    pub heading_deg: f64,
    pub min_u: f64,
    pub max_u: f64,
    pub min_v: f64,
    pub max_v: f64,
}

#[derive(Debug, Clone)]
pub struct Shape {
    /// `<file-stem>:<ordinal>` of the source record; used for tracing only.
    pub id: String,
    pub area: AreaType,
    pub material: String,
    /// Polygon segments in (lon, lat) degrees.
    pub segments: Vec<Polygon<f64>>,
    /// Aggregate clip mask; starts as the union of the segments unless the
    /// input supplied explicit mask contours.
    pub mask: MultiPolygon<f64>,
    pub tex_params: Option<TexParams>,
}

impl Shape {
    pub fn new(
        id: String,
        area: AreaType,
        material: String,
        segments: Vec<Polygon<f64>>,
        mask: Option<MultiPolygon<f64>>,
        tex_params: Option<TexParams>,
    ) -> Self {
        let mask = mask.unwrap_or_else(|| union_all(&segments));
        Self {
            id,
            area,
            material,
            segments,
            mask,
            tex_params,
        }
    }
}

/// Union a polygon list into one multipolygon.
pub fn union_all(polys: &[Polygon<f64>]) -> MultiPolygon<f64> {
    let mut out = MultiPolygon::<f64>(Vec::new());
    for poly in polys {
        out = out.union(&MultiPolygon(vec![poly.clone()]));
    }
    out
}

/// Total ring count (exterior + interior) of a multipolygon. The sliver
/// merger uses this as its adjacency test.
pub fn ring_count(mp: &MultiPolygon<f64>) -> usize {
    mp.0.iter().map(|p| 1 + p.interiors().len()).sum()
}
