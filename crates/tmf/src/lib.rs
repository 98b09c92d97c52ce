//! TMF: internal terrain-mesh tile format using WGS-84 ECEF, plus the SEDG
//! shared-edge sidecar format.
//!
//! - Stores an f64 ECEF bounding-sphere center and f32 offsets per vertex.
//! - Per-vertex unit normals, a shared texture-coordinate pool, and
//!   per-material triangle groups indexing (vertex, texcoord) pairs.
//! - SEDG files carry the ordered (lon, lat, elev) boundary sequence one
//!   tile publishes for one neighbor.
//!
//! TMF file layout (little-endian):
//!   00  : [u8;4]  magic = b"TMF1"
//!   04  : u32     version = 1
//!   08  : u32     flags (bitfield)
//!                 bit 0 => tile index present (u64)
//!   0C  : u32     vertex_count
//!   10  : u32     texcoord_count
//!   14  : u32     group_count
//!   ..  : u64     tile_index          (if bit0)
//!   ..  : f64[3]  sphere center (ECEF meters)
//!   ..  : f64     sphere radius (meters)
//!   ..  : for each vertex: f32 dx, dy, dz   (offset from center)
//!   ..  : for each vertex: f32 nx, ny, nz   (unit normal)
//!   ..  : for each texcoord: f32 u, f32 v
//!   ..  : for each group:
//!           u16 name_len, name bytes (UTF-8 material name)
//!           u32 tri_count
//!           tri_count * [u32 v0, t0, v1, t1, v2, t2]
//!
//! SEDG file layout (little-endian):
//!   00  : [u8;4]  magic = b"SEDG"
//!   04  : u32     version = 1
//!   08  : u32     count
//!   0C  : count * [f64 lon_deg, f64 lat_deg, f64 elev_m]

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

pub const TMF_MAGIC: [u8; 4] = *b"TMF1";
pub const TMF_VERSION: u32 = 1;

pub const SEDG_MAGIC: [u8; 4] = *b"SEDG";
pub const SEDG_VERSION: u32 = 1;

/// One material group: every triangle corner carries a vertex index and a
/// texture-coordinate index into the shared pools.
#[derive(Debug, Clone, PartialEq)]
pub struct TriGroup {
    pub material: String,
    /// [v0, t0, v1, t1, v2, t2] per triangle.
    pub tris: Vec<[u32; 6]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TmfMesh {
    pub tile_index: Option<u64>,
    /// Bounding-sphere center in ECEF meters.
    pub center: [f64; 3],
    /// Bounding-sphere radius in meters.
    pub radius: f64,
    /// Vertex positions as f32 offsets from `center`.
    pub positions: Vec<[f32; 3]>,
    /// Unit normals, parallel to `positions`.
    pub normals: Vec<[f32; 3]>,
    pub texcoords: Vec<[f32; 2]>,
    pub groups: Vec<TriGroup>,
}

/// Ordered boundary-node sequence for one tile-pair/direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedEdge {
    /// (lon_deg, lat_deg, elev_m) per node, ordered along the edge.
    pub nodes: Vec<[f64; 3]>,
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated file"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u16(buf: &mut &[u8]) -> io::Result<u16> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_u64(buf: &mut &[u8]) -> io::Result<u64> {
    let b = take(buf, 8)?;
    Ok(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

#[inline(always)]
fn le_f32(buf: &mut &[u8]) -> io::Result<f32> {
    let b = take(buf, 4)?;
    Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    let b = take(buf, 8)?;
    Ok(f64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Parse TMF from a contiguous byte slice. This is the single source of truth
/// for parsing.
pub fn parse_tmf_bytes(mut p: &[u8]) -> io::Result<TmfMesh> {
    // Header
    if take(&mut p, 4)? != b"TMF1" {
        return Err(bad("bad TMF magic"));
    }

    let version = le_u32(&mut p)?;
    if version != TMF_VERSION {
        return Err(bad("unsupported TMF version"));
    }

    let flags = le_u32(&mut p)?;
    let has_tile = (flags & (1 << 0)) != 0;

    let vertex_count = le_u32(&mut p)? as usize;
    let texcoord_count = le_u32(&mut p)? as usize;
    let group_count = le_u32(&mut p)? as usize;

    let tile_index = if has_tile { Some(le_u64(&mut p)?) } else { None };

    let center = [le_f64(&mut p)?, le_f64(&mut p)?, le_f64(&mut p)?];
    let radius = le_f64(&mut p)?;

    let positions = read_f32x3_block(&mut p, vertex_count)?;
    let normals = read_f32x3_block(&mut p, vertex_count)?;

    let tc_bytes = texcoord_count
        .checked_mul(8)
        .ok_or_else(|| bad("texcoord size overflow"))?;
    need(p, tc_bytes)?;

    let mut texcoords = Vec::<[f32; 2]>::with_capacity(texcoord_count);
    for _ in 0..texcoord_count {
        texcoords.push([le_f32(&mut p)?, le_f32(&mut p)?]);
    }

    let mut groups = Vec::<TriGroup>::with_capacity(group_count);
    for _ in 0..group_count {
        let name_len = le_u16(&mut p)? as usize;
        let name = take(&mut p, name_len)?;
        let material = std::str::from_utf8(name)
            .map_err(|_| bad("group material is not UTF-8"))?
            .to_owned();

        let tri_count = le_u32(&mut p)? as usize;
        let tri_bytes = tri_count
            .checked_mul(24)
            .ok_or_else(|| bad("triangle size overflow"))?;
        need(p, tri_bytes)?;

        let mut tris = Vec::<[u32; 6]>::with_capacity(tri_count);
        for _ in 0..tri_count {
            let mut t = [0u32; 6];
            for slot in t.iter_mut() {
                *slot = le_u32(&mut p)?;
            }

            // Every corner index must resolve into the pools.
            if t[0] as usize >= vertex_count
                || t[2] as usize >= vertex_count
                || t[4] as usize >= vertex_count
            {
                return Err(bad("triangle vertex index out of range"));
            }
            if t[1] as usize >= texcoord_count
                || t[3] as usize >= texcoord_count
                || t[5] as usize >= texcoord_count
            {
                return Err(bad("triangle texcoord index out of range"));
            }

            tris.push(t);
        }

        groups.push(TriGroup { material, tris });
    }

    Ok(TmfMesh {
        tile_index,
        center,
        radius,
        positions,
        normals,
        texcoords,
        groups,
    })
}

/// Read a tightly packed f32x3 block, zero-copy on little-endian targets.
fn read_f32x3_block(p: &mut &[u8], count: usize) -> io::Result<Vec<[f32; 3]>> {
    let bytes = count
        .checked_mul(12)
        .ok_or_else(|| bad("block size overflow"))?;
    let raw = take(p, bytes)?;

    #[cfg(target_endian = "little")]
    {
        // Safety of the cast:
        // - alignment: all header variants are a multiple of 4 bytes, and
        //   each f32x3 block is 12N bytes, so every block starts 4-aligned.
        // - repr: [f32; 3] has no padding beyond 12 bytes.
        let as_f32x3: &[[f32; 3]] =
            bytemuck::try_cast_slice(raw).map_err(|_| bad("misaligned vertex block"))?;

        Ok(as_f32x3.to_vec())
    }

    #[cfg(not(target_endian = "little"))]
    {
        let mut out = Vec::<[f32; 3]>::with_capacity(count);

        for chunk in raw.chunks_exact(12) {
            let x = f32::from_le_bytes(chunk[0..4].try_into().unwrap());
            let y = f32::from_le_bytes(chunk[4..8].try_into().unwrap());
            let z = f32::from_le_bytes(chunk[8..12].try_into().unwrap());
            out.push([x, y, z]);
        }

        Ok(out)
    }
}

pub fn read_mesh_file<P: AsRef<Path>>(path: P) -> io::Result<TmfMesh> {
    let bytes = std::fs::read(path)?;
    parse_tmf_bytes(&bytes)
}

pub fn write_mesh_file<P: AsRef<Path>>(path: P, mesh: &TmfMesh) -> io::Result<()> {
    if mesh.normals.len() != mesh.positions.len() {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "normals length != positions length",
        ));
    }

    let mut flags = 0u32;
    if mesh.tile_index.is_some() {
        flags |= 1 << 0;
    }

    let mut file = File::create(path)?;

    file.write_all(&TMF_MAGIC)?;

    write_u32(&mut file, TMF_VERSION)?;
    write_u32(&mut file, flags)?;

    write_u32(&mut file, mesh.positions.len() as u32)?;
    write_u32(&mut file, mesh.texcoords.len() as u32)?;
    write_u32(&mut file, mesh.groups.len() as u32)?;

    if let Some(tile) = mesh.tile_index {
        file.write_all(&tile.to_le_bytes())?;
    }

    write_f64(&mut file, mesh.center[0])?;
    write_f64(&mut file, mesh.center[1])?;
    write_f64(&mut file, mesh.center[2])?;
    write_f64(&mut file, mesh.radius)?;

    for p in mesh.positions.iter() {
        write_f32(&mut file, p[0])?;
        write_f32(&mut file, p[1])?;
        write_f32(&mut file, p[2])?;
    }

    for n in mesh.normals.iter() {
        write_f32(&mut file, n[0])?;
        write_f32(&mut file, n[1])?;
        write_f32(&mut file, n[2])?;
    }

    for tc in mesh.texcoords.iter() {
        write_f32(&mut file, tc[0])?;
        write_f32(&mut file, tc[1])?;
    }

    for group in mesh.groups.iter() {
        let name = group.material.as_bytes();
        if name.len() > u16::MAX as usize {
            return Err(io::Error::new(ErrorKind::InvalidData, "material name too long"));
        }

        write_u16(&mut file, name.len() as u16)?;
        file.write_all(name)?;

        write_u32(&mut file, group.tris.len() as u32)?;

        for t in group.tris.iter() {
            for &slot in t.iter() {
                write_u32(&mut file, slot)?;
            }
        }
    }

    file.flush()?;

    Ok(())
}

pub fn parse_sedg_bytes(mut p: &[u8]) -> io::Result<SharedEdge> {
    if take(&mut p, 4)? != b"SEDG" {
        return Err(bad("bad SEDG magic"));
    }

    let version = le_u32(&mut p)?;
    if version != SEDG_VERSION {
        return Err(bad("unsupported SEDG version"));
    }

    let count = le_u32(&mut p)? as usize;
    let bytes = count
        .checked_mul(24)
        .ok_or_else(|| bad("edge node size overflow"))?;
    need(p, bytes)?;

    let mut nodes = Vec::<[f64; 3]>::with_capacity(count);
    for _ in 0..count {
        nodes.push([le_f64(&mut p)?, le_f64(&mut p)?, le_f64(&mut p)?]);
    }

    Ok(SharedEdge { nodes })
}

pub fn read_edge_file<P: AsRef<Path>>(path: P) -> io::Result<SharedEdge> {
    let bytes = std::fs::read(path)?;
    parse_sedg_bytes(&bytes)
}

pub fn write_edge_file<P: AsRef<Path>>(path: P, edge: &SharedEdge) -> io::Result<()> {
    let mut file = File::create(path)?;

    file.write_all(&SEDG_MAGIC)?;

    write_u32(&mut file, SEDG_VERSION)?;
    write_u32(&mut file, edge.nodes.len() as u32)?;

    for n in edge.nodes.iter() {
        write_f64(&mut file, n[0])?;
        write_f64(&mut file, n[1])?;
        write_f64(&mut file, n[2])?;
    }

    file.flush()?;

    Ok(())
}

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;

    /// Flattening factor (1 / 298.257223563).
    pub const F: f64 = 1.0 / 298.257_223_563;

    /// First eccentricity squared.
    pub const E2: f64 = F * (2.0 - F);

    /// Semi-minor axis (polar radius) in meters.
    pub const B: f64 = A * (1.0 - F);

    /// Second eccentricity squared.
    pub const E2P: f64 = (A * A - B * B) / (B * B);
}

#[inline]
pub fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, h_m: f64) -> [f64; 3] {
    // Convert latitude and longitude from degrees to radians
    let lat_rad = lat_deg.to_radians();
    let lon_rad = lon_deg.to_radians();

    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    let (sin_lon, cos_lon) = lon_rad.sin_cos();

    // Radius of curvature in the prime vertical (N)
    let n = wgs84::A / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();

    let x = (n + h_m) * cos_lat * cos_lon;
    let y = (n + h_m) * cos_lat * sin_lon;
    let z = (n * (1.0 - wgs84::E2) + h_m) * sin_lat;

    [x, y, z]
}

#[inline]
pub fn ecef_to_geodetic(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    // Distance from the Z-axis
    let p = (x * x + y * y).sqrt();

    // Longitude (λ)
    let lon = y.atan2(x);

    // Initial latitude estimate (θ)
    let theta = (z * wgs84::A).atan2(p * wgs84::B);
    let (sin_theta, cos_theta) = theta.sin_cos();

    // Latitude (φ)
    let lat_numerator = z + wgs84::E2P * wgs84::B * sin_theta * sin_theta * sin_theta;
    let lat_denominator = p - wgs84::E2 * wgs84::A * cos_theta * cos_theta * cos_theta;
    let lat = lat_numerator.atan2(lat_denominator);

    // Radius of curvature in the prime vertical (N)
    let sin_lat = lat.sin();
    let n = wgs84::A / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();

    // Ellipsoidal height (h)
    let h = p / lat.cos() - n;

    (lat.to_degrees(), lon.to_degrees(), h)
}

/// Great-circle distance in meters between two (lon, lat) degree pairs,
/// on a sphere of the WGS-84 equatorial radius. Accurate enough for the
/// sub-tile distances the pipeline measures.
#[inline]
pub fn geodesic_distance_m(lon1_deg: f64, lat1_deg: f64, lon2_deg: f64, lat2_deg: f64) -> f64 {
    let lat1 = lat1_deg.to_radians();
    let lat2 = lat2_deg.to_radians();
    let dlat = (lat2_deg - lat1_deg).to_radians();
    let dlon = (lon2_deg - lon1_deg).to_radians();

    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();

    let a = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    wgs84::A * c
}

/// Initial great-circle course in degrees (0 = north, 90 = east) from the
/// first (lon, lat) pair toward the second.
#[inline]
pub fn geodesic_course_deg(lon1_deg: f64, lat1_deg: f64, lon2_deg: f64, lat2_deg: f64) -> f64 {
    let lat1 = lat1_deg.to_radians();
    let lat2 = lat2_deg.to_radians();
    let dlon = (lon2_deg - lon1_deg).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    let course = y.atan2(x).to_degrees();
    if course < 0.0 {
        course + 360.0
    } else {
        course
    }
}

#[inline]
fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_f32<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
