//! The two passes over a labeled cloud.
//!
//! Label-grid export: bounds -> binning -> occupancy -> majority vote.
//! Visualization overlay: marker vertices -> centers -> wireframe cubes sized
//! from the same bounds.

use rayon::prelude::*;
use serde::Serialize;

use crate::bounds::BoundingBox;
use crate::color::{ColorMap, MarkerThresholds, Rgb};
use crate::error::{Diagnostic, Result, VoxError};
use crate::grid::{voxel_index, Occupancy, VoxelGrid};
use crate::ply::RenderedVertex;
use crate::wireframe::{wireframe, WireframeEdge};
use crate::{LabeledCloud, Point};

/// Bins `points` at resolution `n` and majority-votes each voxel.
pub fn label_grid(
    points: &[Point],
    labels: &[i32],
    n: usize,
    parallel: bool,
) -> Result<VoxelGrid> {
    let bbox = BoundingBox::from_points(points)?;

    let occupancy = if parallel {
        Occupancy::from_points_par(points, labels, &bbox, n)?
    } else {
        Occupancy::from_points(points, labels, &bbox, n)?
    };

    occupancy.majority_vote()
}

#[derive(Debug)]
pub struct LabelExport {
    /// `None` when the cloud carries no segmentation labels.
    pub grid: Option<VoxelGrid>,
    /// Whole-object category, when the source provides one.
    pub category: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Builds everything the label export writes for one cloud.
///
/// An empty cloud is fatal. Missing segmentation labels or category only
/// skip the affected output and are reported in `diagnostics`.
pub fn export_labels(cloud: &LabeledCloud, n: usize, parallel: bool) -> Result<LabelExport> {
    if cloud.points.is_empty() {
        return Err(VoxError::EmptyInput);
    }

    let mut diagnostics = Vec::new();

    let grid = match cloud.labels.as_deref() {
        Some(labels) => Some(label_grid(&cloud.points, labels, n, parallel)?),
        None => {
            diagnostics.push(Diagnostic::missing("segmentation", "no segmentation labels"));
            None
        }
    };

    if cloud.category.is_none() {
        diagnostics.push(Diagnostic::missing("classification", "no classification category"));
    }

    Ok(LabelExport {
        grid,
        category: cloud.category,
        diagnostics,
    })
}

/// Positions of the rendered vertices whose color marks a voxel center, in
/// file order.
pub fn marker_centers(vertices: &[RenderedVertex], thresholds: &MarkerThresholds) -> Vec<Point> {
    vertices
        .par_iter()
        .filter(|v| thresholds.is_marker(v.rgb))
        .map(|v| v.position)
        .collect()
}

/// Centers of the voxels occupied by `points`, for when no rendered mesh is
/// available.
pub fn occupied_centers(points: &[Point], n: usize) -> Result<Vec<Point>> {
    let bbox = BoundingBox::from_points(points)?;
    let mut occupancy = Occupancy::new(n)?;
    let span = bbox.span();

    for point in points {
        occupancy.push(voxel_index(point, &bbox, &span, n), 0);
    }

    Ok(occupancy
        .occupied()
        .map(|(index, _)| bbox.voxel_center(index, n))
        .collect())
}

/// Everything a plotting backend needs to draw the cloud with its voxels.
#[derive(Debug, Serialize)]
pub struct Overlay {
    pub points: Vec<Point>,
    pub colors: Vec<Rgb>,
    pub centers: Vec<Point>,
    pub voxel_size: [f64; 3],
    pub edges: Vec<WireframeEdge>,
    /// `[min, min + size * n]` per axis.
    pub limits: [[f64; 2]; 3],
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Wireframes every center with the voxel size derived from the original
/// cloud's bounds and colors the cloud's points by label.
pub fn overlay(
    cloud: &LabeledCloud,
    centers: Vec<Point>,
    cmap: &ColorMap,
    n: usize,
) -> Result<Overlay> {
    if n == 0 {
        return Err(VoxError::InvalidResolution { n });
    }

    let bbox = BoundingBox::from_points(&cloud.points)?;
    let voxel_size = bbox.voxel_size(n);
    let mut diagnostics = Vec::new();

    if centers.is_empty() {
        diagnostics.push(Diagnostic::missing("overlay", "no voxel centers found"));
    }

    let colors = match cloud.labels.as_deref() {
        Some(labels) => labels.iter().map(|&l| cmap.color(l)).collect(),
        None => {
            diagnostics.push(Diagnostic::missing("overlay", "no segmentation labels to color by"));
            vec![cmap.fallback; cloud.points.len()]
        }
    };

    let edges = wireframe(&centers, voxel_size);

    log::debug!(
        "overlay: {} points, {} centers, {} edges",
        cloud.points.len(),
        centers.len(),
        edges.len()
    );

    Ok(Overlay {
        points: cloud.points.clone(),
        colors,
        centers,
        voxel_size,
        edges,
        limits: bbox.limits(n),
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_points() -> LabeledCloud {
        LabeledCloud::new(
            vec![
                [0.0, 0.0, 0.0],
                [0.1, 0.1, 0.1],
                [9.0, 9.0, 9.0],
                [9.9, 9.9, 9.9],
            ],
            Some(vec![1, 1, 2, 2]),
            Some(4),
        )
    }

    #[test]
    fn two_clusters_two_voxels() {
        let cloud = four_points();
        let export = export_labels(&cloud, 2, false).unwrap();
        let grid = export.grid.unwrap();

        assert_eq!(grid.len(), 8);
        assert_eq!(grid.get([0, 0, 0]), 1);
        assert_eq!(grid.get([1, 1, 1]), 2);
        assert_eq!(grid.labeled().count(), 2);
        assert_eq!(export.category, Some(4));
        assert!(export.diagnostics.is_empty());
    }

    #[test]
    fn missing_labels_and_category_are_diagnostics() {
        let cloud = LabeledCloud::new(vec![[0.0; 3], [1.0; 3]], None, None);
        let export = export_labels(&cloud, 4, false).unwrap();
        assert!(export.grid.is_none());
        assert!(export.category.is_none());
        assert_eq!(export.diagnostics.len(), 2);
        assert!(export
            .diagnostics
            .iter()
            .all(|d| matches!(d.error, VoxError::MissingData { .. })));
    }

    #[test]
    fn empty_cloud_is_fatal() {
        let cloud = LabeledCloud::new(Vec::new(), Some(Vec::new()), Some(1));
        assert!(matches!(export_labels(&cloud, 2, false), Err(VoxError::EmptyInput)));
    }

    #[test]
    fn negative_label_aborts_export() {
        let cloud = LabeledCloud::new(vec![[0.0; 3], [1.0; 3]], Some(vec![1, -3]), None);
        assert!(matches!(
            export_labels(&cloud, 2, true),
            Err(VoxError::InvalidLabel { .. })
        ));
    }

    #[test]
    fn marker_vertices_become_centers_in_order() {
        let vertices = [
            RenderedVertex {
                position: [1.0, 0.0, 0.0],
                rgb: [255.0, 0.0, 0.0],
            },
            RenderedVertex {
                position: [2.0, 0.0, 0.0],
                rgb: [128.0, 128.0, 128.0],
            },
            RenderedVertex {
                position: [3.0, 0.0, 0.0],
                rgb: [230.0, 10.0, 10.0],
            },
        ];
        let centers = marker_centers(&vertices, &MarkerThresholds::default());
        assert_eq!(centers, vec![[1.0, 0.0, 0.0], [3.0, 0.0, 0.0]]);
    }

    #[test]
    fn overlay_edges_and_colors() {
        let cloud = four_points();
        let mut cmap = ColorMap::default();
        cmap.insert(1, [255, 0, 0]);

        let ov = overlay(&cloud, vec![[2.5, 2.5, 2.5]], &cmap, 2).unwrap();
        assert_eq!(ov.edges.len(), 12);
        assert_eq!(ov.colors[0], [255, 0, 0]);
        assert_eq!(ov.colors[3], [128, 128, 128]);
        assert!((ov.voxel_size[0] - 4.95).abs() < 1e-6);
        assert!(ov.diagnostics.is_empty());
    }

    #[test]
    fn overlay_without_centers_reports_and_draws_nothing() {
        let ov = overlay(&four_points(), Vec::new(), &ColorMap::default(), 2).unwrap();
        assert!(ov.edges.is_empty());
        assert_eq!(ov.diagnostics.len(), 1);
    }

    #[test]
    fn occupied_centers_match_clusters() {
        let centers = occupied_centers(&four_points().points, 2).unwrap();
        assert_eq!(centers.len(), 2);
        assert!((centers[0][0] - 2.475).abs() < 1e-9);
        assert!((centers[1][0] - 7.425).abs() < 1e-9);
    }
}
