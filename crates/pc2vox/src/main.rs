use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Read},
    path::{Path, PathBuf},
    process::Command,
};
use walkdir::WalkDir;

use voxpc::{
    codec, color::NEUTRAL_GRAY, export_labels, grid, overlay, pipeline, ply, ChannelScale,
    ColorMap, LabeledCloud, MarkerThresholds, Rgb,
};

#[derive(Parser, Debug)]
#[command(name = "pc2vox", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Color for labels missing from the color map, as `r,g,b`.
    #[arg(long, global = true, value_parser = parse_rgb, default_value = "128,128,128")]
    fallback_color: Rgb,

    /// Channel range of color map files: `auto`, `unit` ([0, 1]) or `byte` ([0, 255]).
    #[arg(long, global = true, env = "VOX_COLOR_SCALE", default_value_t = ChannelScale::Auto)]
    color_scale: ChannelScale,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a text cloud (`x y z label` per line) into the binary point file.
    Encode {
        input: PathBuf,
        output: PathBuf,
    },

    /// Write `<stem>_seg.txt` (majority-vote label grid) and `<stem>_cls.txt`
    /// (category) for one binary cloud or every `.bin` under a directory.
    Export(ExportArgs),

    /// Build the wireframe overlay JSON for a cloud and its rendered mesh.
    Overlay(OverlayArgs),

    /// Rewrite a PLY with per-vertex colors from a label list.
    Colorize {
        #[arg(long)]
        ply_in: PathBuf,

        /// One integer label per vertex.
        #[arg(long)]
        labels: PathBuf,

        #[arg(long, env = "VOX_COLOR_MAP")]
        color_map: PathBuf,

        #[arg(long)]
        ply_out: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct ExportArgs {
    /// A binary cloud, or a directory searched recursively for `.bin` files.
    input: PathBuf,

    #[arg(long, default_value = "voxels")]
    output_dir: PathBuf,

    /// Grid resolution N (N³ cells)
    #[arg(long, env = "VOX_N", default_value_t = 32)]
    n: usize,

    /// Whole-object category for a single input file.
    #[arg(long)]
    category: Option<i32>,

    /// JSON object mapping file stem -> category, for directory inputs.
    #[arg(long)]
    category_index: Option<PathBuf>,

    /// External voxelizer executable, run as `<exe> <cloud.bin> <out.ply>`.
    #[arg(long)]
    voxelizer: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Bin points on a single thread.
    #[arg(long, default_value_t = false)]
    sequential: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct OverlayArgs {
    /// Binary cloud the voxels were built from.
    cloud: PathBuf,

    /// Rendered mesh with red voxel-center markers.
    #[arg(long, required_unless_present = "centers_from_grid")]
    ply: Option<PathBuf>,

    /// Derive centers from the cloud's own occupancy instead of a mesh.
    #[arg(long, default_value_t = false)]
    centers_from_grid: bool,

    #[arg(long, env = "VOX_COLOR_MAP")]
    color_map: Option<PathBuf>,

    /// Grid resolution N the mesh was rendered with
    #[arg(long, env = "VOX_N", default_value_t = 16)]
    n: usize,

    #[arg(long, default_value = "overlay.json")]
    output: PathBuf,
}

fn parse_rgb(s: &str) -> Result<Rgb, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected r,g,b but got {s:?}"));
    }

    let mut rgb = NEUTRAL_GRAY;
    for (slot, part) in rgb.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| format!("{part:?} is not a channel value in 0..=255"))?;
    }

    Ok(rgb)
}

/// Read `x y z label` records; blank lines and `#` comments are ignored.
fn parse_text_cloud<R: Read>(reader: R) -> Result<LabeledCloud> {
    let mut points = Vec::new();
    let mut labels = Vec::new();

    for (line_no, line_result) in BufReader::new(reader).lines().enumerate() {
        let line = line_result?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut parts = trimmed.split_whitespace();
        let mut coord = |axis: &str| -> Result<f64> {
            parts
                .next()
                .with_context(|| format!("line {}: missing {axis} coordinate", line_no + 1))?
                .parse::<f64>()
                .with_context(|| format!("line {}: bad {axis} coordinate", line_no + 1))
        };

        let x = coord("x")?;
        let y = coord("y")?;
        let z = coord("z")?;

        let label: i32 = parts
            .next()
            .with_context(|| format!("line {}: missing label", line_no + 1))?
            .parse()
            .with_context(|| format!("line {}: label is not an integer", line_no + 1))?;

        points.push([x, y, z]);
        labels.push(label);
    }

    Ok(LabeledCloud::new(points, Some(labels), None))
}

fn load_color_map(path: Option<&Path>, fallback: Rgb, scale: ChannelScale) -> Result<ColorMap> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening color map {}", path.display()))?;
            ColorMap::from_json_reader_scaled(BufReader::new(file), fallback, scale)
                .with_context(|| format!("parsing color map {}", path.display()))
        }
        None => {
            warn!("No color map given; every point uses the fallback color.");
            Ok(ColorMap::new(fallback))
        }
    }
}

fn load_category_index(path: &Path) -> Result<HashMap<String, i32>> {
    let file = File::open(path)?;
    let index: HashMap<String, i32> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing category index {}", path.display()))?;
    Ok(index)
}

/// All `.bin` files under `dir`, sorted for a stable processing order.
fn collect_clouds(dir: &Path) -> Vec<PathBuf> {
    let mut clouds: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("bin"))
                .unwrap_or(false)
        })
        .collect();

    clouds.sort();
    clouds
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

fn run_voxelizer(exe: &Path, cloud: &Path, ply_out: &Path) -> Result<()> {
    debug!(
        "Running {} {} {}",
        exe.display(),
        cloud.display(),
        ply_out.display()
    );

    let status = Command::new(exe)
        .arg(cloud)
        .arg(ply_out)
        .status()
        .with_context(|| format!("launching voxelizer {}", exe.display()))?;

    if !status.success() {
        anyhow::bail!("voxelizer exited with {status} for {}", cloud.display());
    }

    Ok(())
}

/// Files one export run writes for `stem`. Binary clouds always carry
/// labels, so the grid is always expected; the category and the rendered
/// mesh only when they are requested.
fn expected_outputs(stem: &str, args: &ExportArgs, category: Option<i32>) -> Vec<PathBuf> {
    let mut outputs = vec![args.output_dir.join(format!("{stem}_seg.txt"))];
    if category.is_some() {
        outputs.push(args.output_dir.join(format!("{stem}_cls.txt")));
    }
    if args.voxelizer.is_some() {
        outputs.push(args.output_dir.join(format!("{stem}.ply")));
    }
    outputs
}

fn process_one_cloud(path: &Path, args: &ExportArgs, category: Option<i32>) -> Result<()> {
    let stem = file_stem(path);
    let seg_path = args.output_dir.join(format!("{stem}_seg.txt"));
    let cls_path = args.output_dir.join(format!("{stem}_cls.txt"));

    if !args.overwrite {
        let outputs = expected_outputs(&stem, args, category);
        match outputs.iter().find(|p| !p.exists()) {
            Some(missing) => debug!("{} is missing, processing", missing.display()),
            None => {
                debug!("Skipping {}: all outputs exist", path.display());
                return Ok(());
            }
        }
    }

    info!("Processing {} -> {}", path.display(), seg_path.display());

    let mut cloud =
        codec::read_file(path).with_context(|| format!("reading {}", path.display()))?;
    cloud.category = category;

    debug!("Loaded {} points", cloud.len());

    if let Some(exe) = &args.voxelizer {
        let ply_path = args.output_dir.join(format!("{stem}.ply"));
        run_voxelizer(exe, path, &ply_path)?;
    }

    let export = export_labels(&cloud, args.n, !args.sequential)?;

    for diagnostic in &export.diagnostics {
        warn!("{}: {}", path.display(), diagnostic);
    }

    if let Some(grid) = &export.grid {
        let mut out = BufWriter::new(File::create(&seg_path)?);
        grid.write_flat(&mut out)?;
        debug!("Wrote {} labels to {}", grid.len(), seg_path.display());
    }

    if let Some(category) = export.category {
        fs::write(&cls_path, format!("{category}\n"))?;
        debug!("Wrote class {} to {}", category, cls_path.display());
    }

    info!(
        "OK {} ({} pts, n = {}, {} labeled voxels)",
        path.display(),
        cloud.len(),
        args.n,
        export.grid.as_ref().map_or(0, |g| g.labeled().count())
    );

    Ok(())
}

fn run_export(args: &ExportArgs) -> Result<()> {
    fs::create_dir_all(&args.output_dir)?;

    if args.input.is_file() {
        return process_one_cloud(&args.input, args, args.category);
    }

    let categories = match &args.category_index {
        Some(path) => load_category_index(path)?,
        None => HashMap::new(),
    };

    let clouds = collect_clouds(&args.input);
    info!("Processing {} items...", clouds.len());

    // Process clouds in parallel, reporting any errors.
    clouds.par_iter().for_each(|path| {
        let category = categories.get(&file_stem(path)).copied();

        if let Err(err) = process_one_cloud(path, args, category) {
            warn!("Error processing {}: {:#}", path.display(), err);
        }
    });

    Ok(())
}

fn run_overlay(args: &OverlayArgs, fallback: Rgb, scale: ChannelScale) -> Result<()> {
    let cloud = codec::read_file(&args.cloud)
        .with_context(|| format!("reading {}", args.cloud.display()))?;

    let centers = match (&args.ply, args.centers_from_grid) {
        (Some(ply_path), false) => {
            let file = File::open(ply_path)
                .with_context(|| format!("opening {}", ply_path.display()))?;
            let vertices = ply::read_vertices(BufReader::new(file), ply::LineMode::Lenient)?;
            debug!("Read {} rendered vertices", vertices.len());
            pipeline::marker_centers(&vertices, &MarkerThresholds::default())
        }
        _ => pipeline::occupied_centers(&cloud.points, args.n)?,
    };

    let cmap = load_color_map(args.color_map.as_deref(), fallback, scale)?;
    let ov = overlay(&cloud, centers, &cmap, args.n)?;

    for diagnostic in &ov.diagnostics {
        warn!("{}: {}", args.cloud.display(), diagnostic);
    }

    let out = BufWriter::new(File::create(&args.output)?);
    serde_json::to_writer(out, &ov)?;

    info!(
        "OK {} -> {} ({} centers, {} edges)",
        args.cloud.display(),
        args.output.display(),
        ov.centers.len(),
        ov.edges.len()
    );

    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Encode { input, output } => {
            let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
            let cloud = parse_text_cloud(file)?;
            codec::write_file(output, &cloud)?;
            info!("Wrote {} points to {}", cloud.len(), output.display());
        }
        Commands::Export(args) => run_export(args)?,
        Commands::Overlay(args) => run_overlay(args, cli.fallback_color, cli.color_scale)?,
        Commands::Colorize {
            ply_in,
            labels,
            color_map,
            ply_out,
        } => {
            let cmap = load_color_map(Some(color_map.as_path()), cli.fallback_color, cli.color_scale)?;
            let labels = grid::read_labels(BufReader::new(File::open(labels)?))?;
            let input = BufReader::new(File::open(ply_in)?);
            let mut out = BufWriter::new(File::create(ply_out)?);
            let written = ply::colorize(input, &labels, &cmap, &mut out)?;
            info!("Colorized {} vertices -> {}", written, ply_out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rgb_argument() {
        assert_eq!(parse_rgb("1, 2,3").unwrap(), [1, 2, 3]);
        assert!(parse_rgb("1,2").is_err());
        assert!(parse_rgb("1,2,300").is_err());
    }

    #[test]
    fn text_cloud_records() {
        let text = "# x y z label\n0 0 0 1\n\n1.5 2 3 7\n";
        let cloud = parse_text_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.points, vec![[0.0, 0.0, 0.0], [1.5, 2.0, 3.0]]);
        assert_eq!(cloud.labels, Some(vec![1, 7]));

        assert!(parse_text_cloud("0 0 0\n".as_bytes()).is_err());
        assert!(parse_text_cloud("0 0 0 1.5\n".as_bytes()).is_err());
    }

    #[test]
    fn export_writes_seg_and_cls() {
        let dir = tempdir().unwrap();
        let cloud_path = dir.path().join("chair.bin");
        let cloud = LabeledCloud::new(
            vec![[0.0; 3], [0.1; 3], [9.0; 3], [9.9; 3]],
            Some(vec![1, 1, 2, 2]),
            None,
        );
        codec::write_file(&cloud_path, &cloud).unwrap();

        let args = ExportArgs {
            input: cloud_path.clone(),
            output_dir: dir.path().join("out"),
            n: 2,
            category: Some(3),
            category_index: None,
            voxelizer: None,
            overwrite: false,
            sequential: true,
        };
        run_export(&args).unwrap();

        let seg = fs::read_to_string(dir.path().join("out/chair_seg.txt")).unwrap();
        assert_eq!(seg, "1\n0\n0\n0\n0\n0\n0\n2\n");
        let cls = fs::read_to_string(dir.path().join("out/chair_cls.txt")).unwrap();
        assert_eq!(cls, "3\n");
    }

    #[test]
    fn missing_category_skips_cls_only() {
        let dir = tempdir().unwrap();
        let cloud_path = dir.path().join("lamp.bin");
        let cloud = LabeledCloud::new(vec![[0.0; 3], [1.0; 3]], Some(vec![4, 4]), None);
        codec::write_file(&cloud_path, &cloud).unwrap();

        let args = ExportArgs {
            input: dir.path().to_path_buf(),
            output_dir: dir.path().join("out"),
            n: 4,
            category: None,
            category_index: None,
            voxelizer: None,
            overwrite: true,
            sequential: false,
        };
        run_export(&args).unwrap();

        let seg = fs::read_to_string(dir.path().join("out/lamp_seg.txt")).unwrap();
        assert_eq!(seg.lines().count(), 64);
        assert!(!dir.path().join("out/lamp_cls.txt").exists());
    }

    #[test]
    fn export_fills_in_missing_outputs_without_overwrite() {
        let dir = tempdir().unwrap();
        let cloud_path = dir.path().join("mug.bin");
        let cloud = LabeledCloud::new(vec![[0.0; 3], [1.0; 3]], Some(vec![2, 2]), None);
        codec::write_file(&cloud_path, &cloud).unwrap();

        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        // A grid left by an earlier run that had no category.
        fs::write(out.join("mug_seg.txt"), "stale\n").unwrap();

        let args = ExportArgs {
            input: cloud_path,
            output_dir: out.clone(),
            n: 2,
            category: Some(5),
            category_index: None,
            voxelizer: None,
            overwrite: false,
            sequential: true,
        };
        run_export(&args).unwrap();

        assert_eq!(fs::read_to_string(out.join("mug_cls.txt")).unwrap(), "5\n");
        let seg = fs::read_to_string(out.join("mug_seg.txt")).unwrap();
        assert_eq!(seg.lines().count(), 8);
    }

    #[test]
    fn export_skips_when_every_output_exists() {
        let dir = tempdir().unwrap();
        let cloud_path = dir.path().join("cup.bin");
        let cloud = LabeledCloud::new(vec![[0.0; 3], [1.0; 3]], Some(vec![2, 2]), None);
        codec::write_file(&cloud_path, &cloud).unwrap();

        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("cup_seg.txt"), "kept\n").unwrap();
        fs::write(out.join("cup_cls.txt"), "kept\n").unwrap();

        let mut args = ExportArgs {
            input: cloud_path,
            output_dir: out.clone(),
            n: 2,
            category: Some(5),
            category_index: None,
            voxelizer: None,
            overwrite: false,
            sequential: true,
        };
        run_export(&args).unwrap();
        assert_eq!(fs::read_to_string(out.join("cup_seg.txt")).unwrap(), "kept\n");

        // A requested mesh that is not on disk yet makes the outputs incomplete.
        args.voxelizer = Some(PathBuf::from("voxelize"));
        let expected = expected_outputs("cup", &args, args.category);
        assert_eq!(expected.len(), 3);
        assert!(!expected[2].exists());
    }
}
