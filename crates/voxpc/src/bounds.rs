//! Axis-aligned bounds of a point set.

use crate::error::{Result, VoxError};
use crate::Point;

/// Added to every axis span so degenerate (flat) clouds never divide by zero.
pub const SPAN_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    /// Componentwise min/max over `points`.
    pub fn from_points(points: &[Point]) -> Result<Self> {
        let (first, rest) = points.split_first().ok_or(VoxError::EmptyInput)?;

        let mut min = *first;
        let mut max = *first;

        for p in rest {
            for axis in 0..3 {
                if p[axis] < min[axis] {
                    min[axis] = p[axis];
                }
                if p[axis] > max[axis] {
                    max[axis] = p[axis];
                }
            }
        }

        Ok(Self { min, max })
    }

    /// Per-axis `max - min + SPAN_EPSILON`.
    #[inline]
    pub fn span(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0] + SPAN_EPSILON,
            self.max[1] - self.min[1] + SPAN_EPSILON,
            self.max[2] - self.min[2] + SPAN_EPSILON,
        ]
    }

    /// Edge lengths of one voxel when the box is divided into `n` cells per axis.
    #[inline]
    pub fn voxel_size(&self, n: usize) -> [f64; 3] {
        let span = self.span();
        let n = n as f64;
        [span[0] / n, span[1] / n, span[2] / n]
    }

    /// World-space center of voxel `(i, j, k)`.
    ///
    /// Uses the raw extent (no epsilon), matching where a renderer places its
    /// center markers.
    pub fn voxel_center(&self, index: [usize; 3], n: usize) -> Point {
        let n = n as f64;
        let mut c = [0.0; 3];
        for axis in 0..3 {
            let cell = (self.max[axis] - self.min[axis]) / n;
            c[axis] = self.min[axis] + (index[axis] as f64 + 0.5) * cell;
        }
        c
    }

    /// Plot limits `[min, min + size * n]` per axis.
    pub fn limits(&self, n: usize) -> [[f64; 2]; 3] {
        let size = self.voxel_size(n);
        let n = n as f64;
        [
            [self.min[0], self.min[0] + size[0] * n],
            [self.min[1], self.min[1] + size[1] * n],
            [self.min[2], self.min[2] + size[2] * n],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            BoundingBox::from_points(&[]),
            Err(VoxError::EmptyInput)
        ));
    }

    #[test]
    fn min_max_per_axis() {
        let bbox = BoundingBox::from_points(&[[1.0, -2.0, 3.0], [-1.0, 5.0, 0.5], [0.0, 0.0, 9.0]])
            .unwrap();
        assert_eq!(bbox.min, [-1.0, -2.0, 0.5]);
        assert_eq!(bbox.max, [1.0, 5.0, 9.0]);
    }

    #[test]
    fn degenerate_axis_has_positive_span() {
        let bbox = BoundingBox::from_points(&[[0.0, 1.0, 2.0], [4.0, 1.0, 2.0]]).unwrap();
        let span = bbox.span();
        assert!((span[0] - 4.0).abs() < 1e-6);
        assert!(span[1] > 0.0);
        assert!(span[2] > 0.0);
    }

    #[test]
    fn voxel_center_is_mid_cell() {
        let bbox = BoundingBox::from_points(&[[0.0, 0.0, 0.0], [4.0, 8.0, 2.0]]).unwrap();
        assert_eq!(bbox.voxel_center([0, 0, 0], 2), [1.0, 2.0, 0.5]);
        assert_eq!(bbox.voxel_center([1, 1, 1], 2), [3.0, 6.0, 1.5]);
    }
}
