//! Binary labeled point cloud file, the input of the external voxelizer.
//!
//! File layout (little-endian):
//!   00  : u32     points_count (M)
//!   04  : M records of
//!           f32   x
//!           f32   y
//!           f32   z
//!           i32   label
//!
//! Coordinates are stored as `f32`, so decoding returns the `f32` value of
//! each coordinate widened to `f64`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Result, VoxError};
use crate::{LabeledCloud, Point};

pub const RECORD_BYTES: usize = 16;

const CONTEXT: &str = "binary point file";

#[inline(always)]
fn need(buf: &[u8], want: usize) -> Result<()> {
    if buf.len() < want {
        Err(VoxError::malformed(
            CONTEXT,
            format!("truncated: need {} bytes, {} left", want, buf.len()),
        ))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Parse a point file from a contiguous byte slice.
pub fn parse_cloud_bytes(mut p: &[u8]) -> Result<LabeledCloud> {
    let count = le_u32(&mut p)? as usize;

    let bytes = count
        .checked_mul(RECORD_BYTES)
        .ok_or_else(|| VoxError::malformed(CONTEXT, "points size overflow"))?;
    let raw = take(&mut p, bytes)?;

    if !p.is_empty() {
        return Err(VoxError::malformed(
            CONTEXT,
            format!("{} trailing bytes after {} records", p.len(), count),
        ));
    }

    let mut points = Vec::<Point>::with_capacity(count);
    let mut labels = Vec::<i32>::with_capacity(count);

    for chunk in raw.chunks_exact(RECORD_BYTES) {
        #[cfg(target_endian = "little")]
        let [x, y, z, l]: [u32; 4] = bytemuck::pod_read_unaligned(chunk);

        #[cfg(not(target_endian = "little"))]
        let [x, y, z, l]: [u32; 4] = {
            let word = |i: usize| {
                u32::from_le_bytes([chunk[i], chunk[i + 1], chunk[i + 2], chunk[i + 3]])
            };
            [word(0), word(4), word(8), word(12)]
        };

        points.push([
            f32::from_bits(x) as f64,
            f32::from_bits(y) as f64,
            f32::from_bits(z) as f64,
        ]);
        labels.push(l as i32);
    }

    Ok(LabeledCloud {
        points,
        labels: Some(labels),
        category: None,
    })
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<LabeledCloud> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_cloud_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<LabeledCloud> {
    let bytes = std::fs::read(path)?;
    parse_cloud_bytes(&bytes)
}

/// Writes `points` with their `labels`. Both must have the same length.
pub fn write_cloud<W: Write>(w: &mut W, points: &[Point], labels: &[i32]) -> Result<()> {
    if points.len() != labels.len() {
        return Err(VoxError::malformed(
            CONTEXT,
            format!("{} points but {} labels", points.len(), labels.len()),
        ));
    }

    let count = u32::try_from(points.len())
        .map_err(|_| VoxError::malformed(CONTEXT, "more than u32::MAX points"))?;

    write_u32(w, count)?;

    for (point, &label) in points.iter().zip(labels) {
        write_f32(w, point[0] as f32)?;
        write_f32(w, point[1] as f32)?;
        write_f32(w, point[2] as f32)?;
        write_i32(w, label)?;
    }

    w.flush()?;
    Ok(())
}

/// Encodes a cloud whose segmentation labels are present.
pub fn encode_cloud(cloud: &LabeledCloud) -> Result<Vec<u8>> {
    let labels = cloud
        .labels
        .as_deref()
        .ok_or_else(|| VoxError::missing("segmentation labels"))?;

    let mut out = Vec::with_capacity(4 + cloud.points.len() * RECORD_BYTES);
    write_cloud(&mut out, &cloud.points, labels)?;
    Ok(out)
}

pub fn write_file<P: AsRef<Path>>(path: P, cloud: &LabeledCloud) -> Result<()> {
    let labels = cloud
        .labels
        .as_deref()
        .ok_or_else(|| VoxError::missing("segmentation labels"))?;

    let mut file = BufWriter::new(File::create(path)?);
    write_cloud(&mut file, &cloud.points, labels)
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

#[inline]
fn write_i32<W: Write>(w: &mut W, v: i32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

#[inline]
fn write_f32<W: Write>(w: &mut W, v: f32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}
