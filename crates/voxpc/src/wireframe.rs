//! Wireframe cubes around voxel centers.
//!
//! Corner `c` takes its per-axis sign from the bits of `c` (x is bit 2, y is
//! bit 1, z is bit 0; a clear bit means `-1`):
//!
//! ```text
//! corner  0  1  2  3  4  5  6  7
//!   x     -  -  -  -  +  +  +  +
//!   y     -  -  +  +  -  -  +  +
//!   z     -  +  -  +  -  +  -  +
//! ```
//!
//! [`CUBE_EDGES`] is only valid for this ordering.

use crate::Point;

pub type WireframeEdge = [Point; 2];

pub const CUBE_CORNER_SIGNS: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, 1.0, 1.0],
    [1.0, -1.0, -1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, -1.0],
    [1.0, 1.0, 1.0],
];

/// Corner pairs: the `x = -` face loop, the `x = +` face loop, then the four
/// edges joining the two faces.
pub const CUBE_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 3),
    (3, 2),
    (2, 0),
    (4, 5),
    (5, 7),
    (7, 6),
    (6, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// The 8 corners of the box of edge lengths `size` centered on `center`.
pub fn cube_corners(center: Point, size: [f64; 3]) -> [Point; 8] {
    let half = size.map(|s| s * 0.5);

    CUBE_CORNER_SIGNS.map(|sign| {
        [
            center[0] + sign[0] * half[0],
            center[1] + sign[1] * half[1],
            center[2] + sign[2] * half[2],
        ]
    })
}

pub fn cube_edges(center: Point, size: [f64; 3]) -> [WireframeEdge; 12] {
    let corners = cube_corners(center, size);
    CUBE_EDGES.map(|(a, b)| [corners[a], corners[b]])
}

/// All edges for a set of centers sharing one voxel size.
pub fn wireframe(centers: &[Point], size: [f64; 3]) -> Vec<WireframeEdge> {
    let mut edges = Vec::with_capacity(centers.len() * CUBE_EDGES.len());
    for &center in centers {
        edges.extend_from_slice(&cube_edges(center, size));
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(a: Point, b: Point) -> f64 {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
    }

    #[test]
    fn twelve_edges_eight_distinct_corners() {
        let edges = cube_edges([1.0, 2.0, 3.0], [0.5, 0.25, 2.0]);
        assert_eq!(edges.len(), 12);

        let mut corners: Vec<Point> = edges.iter().flat_map(|e| [e[0], e[1]]).collect();
        corners.sort_by(|a, b| a.partial_cmp(b).unwrap());
        corners.dedup();
        assert_eq!(corners.len(), 8);
    }

    #[test]
    fn every_edge_is_axis_aligned_with_axis_length() {
        let size = [2.0, 4.0, 6.0];
        for [a, b] in cube_edges([0.0; 3], size) {
            let differing: Vec<usize> = (0..3).filter(|&ax| a[ax] != b[ax]).collect();
            assert_eq!(differing.len(), 1);
            assert_eq!(dist(a, b), size[differing[0]]);
        }
    }

    #[test]
    fn corner_table_order() {
        let corners = cube_corners([0.0; 3], [2.0; 3]);
        assert_eq!(corners[0], [-1.0, -1.0, -1.0]);
        assert_eq!(corners[3], [-1.0, 1.0, 1.0]);
        assert_eq!(corners[4], [1.0, -1.0, -1.0]);
        assert_eq!(corners[7], [1.0, 1.0, 1.0]);
    }

    #[test]
    fn each_corner_has_three_edges() {
        let mut degree = [0usize; 8];
        for (a, b) in CUBE_EDGES {
            degree[a] += 1;
            degree[b] += 1;
        }
        assert_eq!(degree, [3; 8]);
    }

    #[test]
    fn wireframe_concatenates_cubes() {
        let edges = wireframe(&[[0.0; 3], [5.0; 3]], [1.0; 3]);
        assert_eq!(edges.len(), 24);
        assert_eq!(edges[12][0], [4.5, 4.5, 4.5]);
    }
}
