//! Point binning, per-voxel label occupancy and the majority-vote label grid.
//!
//! Grid layout: voxel `(i, j, k)` lives at linear key `(i * n + j) * n + k`,
//! so flattening walks `i` outermost and `k` innermost. External tools read
//! the exported grid in exactly this order.

use std::io::{BufRead, Write};

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::bounds::BoundingBox;
use crate::error::{Result, VoxError};
use crate::Point;

pub type VoxelIndex = [usize; 3];

/// Labels observed in one voxel. Most voxels see only a handful of points.
type LabelRun = SmallVec<[i32; 4]>;

/// Checks `n` and returns the cell count `n³`.
pub fn cell_count(n: usize) -> Result<usize> {
    if n == 0 {
        return Err(VoxError::InvalidResolution { n });
    }

    n.checked_mul(n)
        .and_then(|sq| sq.checked_mul(n))
        .ok_or(VoxError::InvalidResolution { n })
}

#[inline(always)]
pub fn linear_key(index: VoxelIndex, n: usize) -> usize {
    (index[0] * n + index[1]) * n + index[2]
}

#[inline(always)]
fn in_bounds(index: VoxelIndex, n: usize) -> bool {
    index.iter().all(|&c| c < n)
}

#[inline(always)]
pub fn unlinear_key(key: usize, n: usize) -> VoxelIndex {
    [key / (n * n), (key / n) % n, key % n]
}

#[inline(always)]
fn bin_axis(coord: f64, min: f64, span: f64, n: usize) -> usize {
    let t = ((coord - min) / span * n as f64).floor();

    // `!(t >= 0.0)` also catches NaN.
    if !(t >= 0.0) {
        0
    } else if t >= (n - 1) as f64 {
        n - 1
    } else {
        t as usize
    }
}

/// Voxel holding `point`; every component is clamped to `[0, n - 1]`, so a
/// point sitting exactly on the upper bound lands in the last cell.
#[inline]
pub fn voxel_index(point: &Point, bbox: &BoundingBox, span: &[f64; 3], n: usize) -> VoxelIndex {
    [
        bin_axis(point[0], bbox.min[0], span[0], n),
        bin_axis(point[1], bbox.min[1], span[1], n),
        bin_axis(point[2], bbox.min[2], span[2], n),
    ]
}

/// Labels of all points that fell into each voxel, stored densely.
/// An empty run means the voxel is unoccupied.
#[derive(Debug, Clone)]
pub struct Occupancy {
    n: usize,
    cells: Vec<LabelRun>,
}

impl Occupancy {
    pub fn new(n: usize) -> Result<Self> {
        let cells = cell_count(n)?;
        Ok(Self::with_cells(n, cells))
    }

    fn with_cells(n: usize, cells: usize) -> Self {
        Self {
            n,
            cells: vec![LabelRun::new(); cells],
        }
    }

    /// Single pass over `points`, appending each label to its voxel.
    pub fn from_points(
        points: &[Point],
        labels: &[i32],
        bbox: &BoundingBox,
        n: usize,
    ) -> Result<Self> {
        check_lengths(points, labels)?;

        let mut occupancy = Self::new(n)?;
        let span = bbox.span();

        for (point, &label) in points.iter().zip(labels) {
            occupancy.push(voxel_index(point, bbox, &span, n), label);
        }

        log::debug!(
            "binned {} points into {} occupied voxels (n = {})",
            points.len(),
            occupancy.occupied_count(),
            n
        );

        Ok(occupancy)
    }

    /// Same as [`Occupancy::from_points`] with binning spread over rayon
    /// workers. Workers collect `(key, label)` pairs, concatenated in input
    /// order, and a single dense grid is filled from them at the end.
    pub fn from_points_par(
        points: &[Point],
        labels: &[i32],
        bbox: &BoundingBox,
        n: usize,
    ) -> Result<Self> {
        check_lengths(points, labels)?;

        let mut occupancy = Self::new(n)?;
        let span = bbox.span();

        let keyed: Vec<(usize, i32)> = points
            .par_iter()
            .zip(labels.par_iter())
            .fold(Vec::new, |mut acc, (point, &label)| {
                acc.push((linear_key(voxel_index(point, bbox, &span, n), n), label));
                acc
            })
            .reduce(Vec::new, |mut a, mut b| {
                a.append(&mut b);
                a
            });

        for (key, label) in keyed {
            occupancy.cells[key].push(label);
        }

        log::debug!(
            "binned {} points into {} occupied voxels (n = {}, parallel)",
            points.len(),
            occupancy.occupied_count(),
            n
        );

        Ok(occupancy)
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn push(&mut self, index: VoxelIndex, label: i32) {
        debug_assert!(in_bounds(index, self.n), "voxel {index:?} outside n = {}", self.n);
        self.cells[linear_key(index, self.n)].push(label);
    }

    /// Concatenates the runs of `other` onto `self`. Both must share `n`.
    pub fn merge(mut self, other: Self) -> Self {
        debug_assert_eq!(self.n, other.n);

        for (dst, src) in self.cells.iter_mut().zip(other.cells) {
            if dst.is_empty() {
                *dst = src;
            } else {
                dst.extend(src);
            }
        }

        self
    }

    pub fn labels_at(&self, index: VoxelIndex) -> &[i32] {
        debug_assert!(in_bounds(index, self.n), "voxel {index:?} outside n = {}", self.n);
        &self.cells[linear_key(index, self.n)]
    }

    pub fn occupied(&self) -> impl Iterator<Item = (VoxelIndex, &[i32])> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, run)| !run.is_empty())
            .map(|(key, run)| (unlinear_key(key, self.n), run.as_slice()))
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|run| !run.is_empty()).count()
    }

    /// Reduces every occupied voxel to its most frequent label.
    pub fn majority_vote(&self) -> Result<VoxelGrid> {
        let mut labels = vec![0i32; self.cells.len()];

        for (slot, run) in labels.iter_mut().zip(&self.cells) {
            if !run.is_empty() {
                *slot = majority_label(run)?;
            }
        }

        Ok(VoxelGrid { n: self.n, labels })
    }
}

fn check_lengths(points: &[Point], labels: &[i32]) -> Result<()> {
    if points.len() != labels.len() {
        return Err(VoxError::malformed(
            "labeled cloud",
            format!("{} points but {} labels", points.len(), labels.len()),
        ));
    }
    Ok(())
}

/// Most frequent label in `run`; among tied counts the smallest label wins.
pub fn majority_label(run: &[i32]) -> Result<i32> {
    if let Some(&negative) = run.iter().find(|&&l| l < 0) {
        return Err(VoxError::invalid_label(negative));
    }

    let mut sorted: LabelRun = run.iter().copied().collect();
    sorted.sort_unstable();

    let Some(&first) = sorted.first() else {
        return Err(VoxError::EmptyInput);
    };
    let mut best = first;
    let mut best_count = 0usize;

    // Ascending walk with a strict `>` keeps the first (smallest) maximum.
    for group in sorted.chunk_by(|a, b| a == b) {
        if group.len() > best_count {
            best = group[0];
            best_count = group.len();
        }
    }

    Ok(best)
}

/// Dense `n × n × n` grid of labels; 0 marks an empty voxel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelGrid {
    n: usize,
    labels: Vec<i32>,
}

impl VoxelGrid {
    pub fn from_flat(n: usize, labels: Vec<i32>) -> Result<Self> {
        let cells = cell_count(n)?;
        if labels.len() != cells {
            return Err(VoxError::malformed(
                "label grid",
                format!("expected {} cells, got {}", cells, labels.len()),
            ));
        }
        Ok(Self { n, labels })
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn get(&self, index: VoxelIndex) -> i32 {
        debug_assert!(in_bounds(index, self.n), "voxel {index:?} outside n = {}", self.n);
        self.labels[linear_key(index, self.n)]
    }

    /// Labels in export order (`i`, then `j`, then `k`).
    #[inline]
    pub fn as_flat(&self) -> &[i32] {
        &self.labels
    }

    /// Voxels holding a non-zero label.
    pub fn labeled(&self) -> impl Iterator<Item = (VoxelIndex, i32)> + '_ {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l != 0)
            .map(|(key, &l)| (unlinear_key(key, self.n), l))
    }

    /// One integer per line, `n³` lines.
    pub fn write_flat<W: Write>(&self, w: &mut W) -> Result<()> {
        for label in &self.labels {
            writeln!(w, "{label}")?;
        }
        w.flush()?;
        Ok(())
    }

    /// Reads the text written by [`VoxelGrid::write_flat`]. Any whitespace
    /// separates values; exactly `n³` integers are required.
    pub fn read_flat<R: BufRead>(reader: R, n: usize) -> Result<Self> {
        let cells = cell_count(n)?;
        let mut labels = Vec::with_capacity(cells);

        for line in reader.lines() {
            let line = line?;
            for token in line.split_whitespace() {
                let label: i32 = token
                    .parse()
                    .map_err(|_| VoxError::invalid_label(token))?;
                labels.push(label);
            }
        }

        Self::from_flat(n, labels)
    }
}

/// Reads whitespace-separated integer labels (one per point or a single
/// category value).
pub fn read_labels<R: BufRead>(reader: R) -> Result<Vec<i32>> {
    let mut labels = Vec::new();

    for line in reader.lines() {
        let line = line?;
        for token in line.split_whitespace() {
            labels.push(token.parse().map_err(|_| VoxError::invalid_label(token))?);
        }
    }

    Ok(labels)
}
