//! voxpc: voxel label grids and wireframe overlays for labeled point clouds.
//!
//! - Bins points into a fixed `n × n × n` grid over their bounding box.
//! - Reduces the labels of each occupied voxel to one majority label
//!   (ties go to the smallest label).
//! - Exports the grid as `n³` text lines, `i` outermost, `k` innermost.
//! - Recovers voxel centers from a rendered ASCII PLY by marker color and
//!   builds a 12-edge wireframe cube around each.
//! - Reads/writes the little-endian binary point file consumed by the
//!   external voxelizer (see [`codec`]).

pub mod bounds;
pub mod codec;
pub mod color;
pub mod error;
pub mod grid;
pub mod pipeline;
pub mod ply;
pub mod wireframe;

pub use bounds::BoundingBox;
pub use color::{ChannelScale, ColorMap, MarkerThresholds, Rgb};
pub use error::{Diagnostic, Result, VoxError};
pub use grid::{Occupancy, VoxelGrid, VoxelIndex};
pub use pipeline::{export_labels, label_grid, overlay, LabelExport, Overlay};
pub use wireframe::WireframeEdge;

/// World-space position `[x, y, z]`.
pub type Point = [f64; 3];

/// A point cloud as delivered by an upstream loader.
///
/// Segmentation labels and the whole-object category are optional because
/// not every source carries them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledCloud {
    pub points: Vec<Point>,
    /// One label per point.
    pub labels: Option<Vec<i32>>,
    pub category: Option<i32>,
}

impl LabeledCloud {
    pub fn new(points: Vec<Point>, labels: Option<Vec<i32>>, category: Option<i32>) -> Self {
        Self {
            points,
            labels,
            category,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
