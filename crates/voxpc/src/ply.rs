//! ASCII PLY produced by the external voxelizer.
//!
//! Only the vertex block matters here: after the `end_header` line each
//! vertex line carries at least `x y z red green blue`.

use std::io::{BufRead, Write};

use crate::color::ColorMap;
use crate::error::{Result, VoxError};
use crate::Point;

const CONTEXT: &str = "rendered mesh";
const END_HEADER: &str = "end_header";
const ELEMENT_VERTEX: &str = "element vertex";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedVertex {
    pub position: Point,
    /// Channels as written in the file, nominally `[0, 255]`.
    pub rgb: [f64; 3],
}

/// How vertex lines that do not parse are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    /// Any non-blank line with fewer than six numeric tokens is an error.
    Strict,
    /// Such lines are skipped (face lists, comments, trailing junk).
    Lenient,
}

/// Consumes header lines up to and including `end_header` and returns them.
fn read_header<I>(lines: &mut I) -> Result<Vec<String>>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    let mut header = Vec::new();

    for line in lines {
        let line = line?;
        let done = line.trim() == END_HEADER;
        header.push(line);
        if done {
            return Ok(header);
        }
    }

    Err(VoxError::malformed(CONTEXT, "missing end_header line"))
}

fn parse_vertex(line: &str) -> std::result::Result<RenderedVertex, String> {
    let mut values = [0.0f64; 6];
    let mut tokens = line.split_whitespace();

    for (slot, value) in values.iter_mut().enumerate() {
        let token = tokens
            .next()
            .ok_or_else(|| format!("expected 6 tokens, found {slot}: {line:?}"))?;
        *value = token
            .parse()
            .map_err(|_| format!("token {token:?} is not a number"))?;
    }

    Ok(RenderedVertex {
        position: [values[0], values[1], values[2]],
        rgb: [values[3], values[4], values[5]],
    })
}

pub fn read_vertices<R: BufRead>(reader: R, mode: LineMode) -> Result<Vec<RenderedVertex>> {
    let mut lines = reader.lines();
    read_header(&mut lines)?;

    let mut vertices = Vec::new();
    let mut skipped = 0usize;

    for (offset, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match parse_vertex(&line) {
            Ok(v) => vertices.push(v),
            Err(detail) if mode == LineMode::Strict => {
                return Err(VoxError::malformed(
                    CONTEXT,
                    format!("vertex line {}: {}", offset + 1, detail),
                ));
            }
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        log::debug!("skipped {skipped} non-vertex lines");
    }

    Ok(vertices)
}

/// Vertex property names in declaration order.
#[derive(Debug, Default)]
struct VertexLayout {
    properties: Vec<String>,
}

impl VertexLayout {
    fn column(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p == name)
    }

    /// Columns of `red`, `green` and `blue`, if all three are declared.
    fn color_columns(&self) -> Option<[usize; 3]> {
        Some([self.column("red")?, self.column("green")?, self.column("blue")?])
    }
}

/// Rewrites a PLY with per-vertex colors taken from `labels` through `cmap`.
///
/// If the `element vertex` block already declares `red`/`green`/`blue`, the
/// header is copied unchanged and those columns are overwritten in place.
/// Otherwise the three properties are appended after the last vertex
/// property and each vertex line gets the color appended. Other columns are
/// kept as they are. Vertices and labels are paired in order and output
/// stops at the shorter of the two. Returns the number of vertices written.
pub fn colorize<R: BufRead, W: Write>(
    input: R,
    labels: &[i32],
    cmap: &ColorMap,
    out: &mut W,
) -> Result<usize> {
    let mut lines = input.lines();
    let header = read_header(&mut lines)?;

    let mut layout = VertexLayout::default();
    let mut in_vertex_block = false;
    for line in &header {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("element") => in_vertex_block = tokens.next() == Some("vertex"),
            Some("property") if in_vertex_block => {
                if let Some(name) = tokens.last() {
                    layout.properties.push(name.to_owned());
                }
            }
            _ => {}
        }
    }

    let color_columns = layout.color_columns();

    in_vertex_block = false;
    for line in &header {
        let trimmed = line.trim();
        if in_vertex_block && !trimmed.starts_with("property") {
            if color_columns.is_none() {
                writeln!(out, "property uchar red")?;
                writeln!(out, "property uchar green")?;
                writeln!(out, "property uchar blue")?;
            }
            in_vertex_block = false;
        }
        if trimmed.starts_with(ELEMENT_VERTEX) {
            in_vertex_block = true;
        }
        writeln!(out, "{line}")?;
    }

    // Columns a vertex line must carry before it can be rewritten.
    let required = match color_columns {
        Some(cols) => cols.into_iter().max().map_or(3, |c| (c + 1).max(3)),
        None => 3,
    };

    let mut written = 0usize;

    for (&label, line) in labels.iter().zip(lines) {
        let line = line?;
        let mut tokens: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        if tokens.len() < required {
            return Err(VoxError::malformed(
                CONTEXT,
                format!(
                    "vertex line {}: expected at least {required} values, got {:?}",
                    written + 1,
                    line
                ),
            ));
        }

        let rgb = cmap.color(label).map(|c| c.to_string());
        match color_columns {
            Some(cols) => {
                for (col, value) in cols.into_iter().zip(rgb) {
                    tokens[col] = value;
                }
            }
            None => tokens.extend(rgb),
        }

        writeln!(out, "{}", tokens.join(" "))?;
        written += 1;
    }

    out.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESH: &str = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\n\
property float y\nproperty float z\nproperty uchar red\nproperty uchar green\n\
property uchar blue\nend_header\n0 0 0 255 0 0\n1.5 2 3 128 128 128\n4 5 6 230 10 10\n";

    #[test]
    fn reads_vertices_after_header() {
        let vs = read_vertices(MESH.as_bytes(), LineMode::Strict).unwrap();
        assert_eq!(vs.len(), 3);
        assert_eq!(vs[1].position, [1.5, 2.0, 3.0]);
        assert_eq!(vs[2].rgb, [230.0, 10.0, 10.0]);
    }

    #[test]
    fn short_line_is_error_in_strict_mode_only() {
        let text = format!("{MESH}3 0 1 2\n");
        let err = read_vertices(text.as_bytes(), LineMode::Strict).unwrap_err();
        assert!(matches!(err, VoxError::MalformedRecord { .. }));

        let vs = read_vertices(text.as_bytes(), LineMode::Lenient).unwrap();
        assert_eq!(vs.len(), 3);
    }

    #[test]
    fn missing_end_header_is_malformed() {
        let err = read_vertices("ply\n0 0 0 1 1 1\n".as_bytes(), LineMode::Lenient).unwrap_err();
        assert!(matches!(err, VoxError::MalformedRecord { .. }));
    }

    #[test]
    fn colorize_inserts_color_properties() {
        let input = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\n\
property float y\nproperty float z\nend_header\n0 0 0\n1 1 1\n";
        let mut cmap = ColorMap::default();
        cmap.insert(1, [10, 20, 30]);

        let mut out = Vec::new();
        let n = colorize(input.as_bytes(), &[1, 4], &cmap, &mut out).unwrap();
        assert_eq!(n, 2);

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\n\
property float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\n\
end_header\n0 0 0 10 20 30\n1 1 1 128 128 128\n"
        );
    }

    #[test]
    fn colorize_overwrites_declared_color_columns() {
        let input = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\n\
property float y\nproperty float z\nproperty uchar red\nproperty uchar green\n\
property uchar blue\nelement face 0\nproperty list uchar int vertex_indices\n\
end_header\n0 0 0 255 0 0\n1 1 1 128 128 128\n";
        let mut cmap = ColorMap::default();
        cmap.insert(2, [10, 20, 30]);

        let mut out = Vec::new();
        let n = colorize(input.as_bytes(), &[2, 7], &cmap, &mut out).unwrap();
        assert_eq!(n, 2);

        let text = String::from_utf8(out).unwrap();
        let (header, body) = text.split_once("end_header\n").unwrap();
        assert_eq!(header.matches("property uchar red").count(), 1);
        assert_eq!(header.matches("property uchar blue").count(), 1);
        assert_eq!(body, "0 0 0 10 20 30\n1 1 1 128 128 128\n");

        // The rewritten file reads back with the same column count it declares.
        let vs = read_vertices(text.as_bytes(), LineMode::Strict).unwrap();
        assert_eq!(vs[0].rgb, [10.0, 20.0, 30.0]);
    }

    #[test]
    fn colorize_keeps_extra_vertex_columns() {
        let input = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\n\
property float y\nproperty float z\nproperty uchar red\nproperty uchar green\n\
property uchar blue\nproperty float quality\nend_header\n1 2 3 4 5 6 0.5\n";
        let mut out = Vec::new();
        colorize(input.as_bytes(), &[0], &ColorMap::new([9, 9, 9]), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("end_header\n1 2 3 9 9 9 0.5\n"));
    }

    #[test]
    fn colorize_short_line_is_malformed() {
        let input = "ply\nelement vertex 1\nproperty float x\nproperty float y\n\
property float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\n\
end_header\n0 0 0\n";
        let mut out = Vec::<u8>::new();
        let err = colorize(input.as_bytes(), &[0], &ColorMap::default(), &mut out).unwrap_err();
        assert!(matches!(err, VoxError::MalformedRecord { .. }));
    }
}
