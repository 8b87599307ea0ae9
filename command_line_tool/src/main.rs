mod config;

use clap::Parser;
use config::{load_config, RuntimeConfig};
use image::{GenericImageView, RgbaImage};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tilemesh::any_model::{AnyModel, ModelKind};
use tilemesh::model::{CoordinateTransform, Model};
use tilemesh::moving_least_squares::ElasticMovingLeastSquaresMesh;
use tilemesh::point::PointMatch;
use tilemesh::spring_mesh::SpringMesh;
use tilemesh::transform_map::TransformMap;
use tilemesh::transform_mesh::TransformMesh;

/// Command line arguments structure.
#[derive(Parser, Debug)]
#[command(author, version, about = "Robust 2D registration of point correspondences with optional elastic refinement.")]
struct Args {
    /// Text file of `x1 y1 x2 y2 [weight]` rows, one correspondence per row
    #[arg()]
    matches: PathBuf,

    /// JSON runtime configuration; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model family: translation, rigid, similarity, affine or homography
    #[arg(long)]
    model: Option<ModelKind>,

    /// Regularize the model towards this simpler family
    #[arg(long)]
    regularizer: Option<ModelKind>,

    /// Weight of the regularizer
    #[arg(long)]
    lambda: Option<f64>,

    /// Maximal residual of a RANSAC inlier, in pixels
    #[arg(long)]
    max_epsilon: Option<f64>,

    /// Refine with an elastic moving least squares mesh
    #[arg(long, conflicts_with = "spring")]
    elastic: bool,

    /// Refine with a spring mesh seeded from the global model
    #[arg(long)]
    spring: bool,

    /// Width of the registered area; defaults to the source image or the extent of the matches
    #[arg(long)]
    width: Option<usize>,

    /// Height of the registered area
    #[arg(long)]
    height: Option<usize>,

    /// Write the binary transformation map here
    #[arg(long)]
    map_out: Option<PathBuf>,

    /// Image to warp through the result
    #[arg(long, requires = "warped_image")]
    source_image: Option<PathBuf>,

    /// Output of the warp
    #[arg(long, requires = "source_image")]
    warped_image: Option<PathBuf>,

    /// RANSAC seed
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(message) = run(&args) {
        eprintln!("Err: {message}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), String> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };
    apply_overrides(&mut config, args);

    let text = fs::read_to_string(&args.matches)
        .map_err(|e| format!("Failed to read matches {}: {e}", args.matches.display()))?;
    let candidates = parse_matches(&text)?;
    println!("Read {} correspondences from {}", candidates.len(), args.matches.display());

    let mut model = match config.regularizer {
        Some(regularizer) => AnyModel::regularized(config.model, regularizer, config.lambda)
            .map_err(|e| format!("Invalid model: {e}"))?,
        None => AnyModel::from_kind(config.model),
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let inliers = model
        .filter_ransac(&candidates, &config.ransac, &mut rng)
        .map_err(|e| format!("Model estimation failed: {e}"))?
        .ok_or_else(|| "No consensus model found".to_string())?;

    let mut residuals = inliers.clone();
    PointMatch::apply_all(&mut residuals, &model);
    println!("{model}");
    println!(
        "{} of {} inliers, mean residual {:.4}, max residual {:.4}",
        inliers.len(),
        candidates.len(),
        PointMatch::mean_distance(&residuals),
        PointMatch::max_distance(&residuals)
    );

    let (width, height) = domain_size(args, &candidates)?;
    info!("registering a {width}x{height} domain");

    let mesh = if args.elastic {
        Some(refine_elastic(&model, &inliers, &config, width, height)?)
    } else if args.spring {
        Some(refine_spring(&model, &inliers, &config, width, height, &mut rng)?)
    } else {
        None
    };

    let map = match &mesh {
        Some(mesh) => TransformMap::from_mesh(mesh, width, height),
        None => TransformMap::from_inverse(&model, width, height),
    };
    println!("Map covers {:.1}% of the domain", map.used_area() * 100.0);

    if let Some(path) = &args.map_out {
        let file = File::create(path).map_err(|e| format!("Could not create {}: {e}", path.display()))?;
        map.write_to(&mut BufWriter::new(file))
            .map_err(|e| format!("Failed to write map {}: {e}", path.display()))?;
        println!("Transformation map written to {}", path.display());
    }

    if let (Some(source), Some(warped)) = (&args.source_image, &args.warped_image) {
        warp_image(&map, source, warped)?;
    }

    println!("Done.");
    Ok(())
}

fn apply_overrides(config: &mut RuntimeConfig, args: &Args) {
    if let Some(model) = args.model {
        config.model = model;
    }
    if args.regularizer.is_some() {
        config.regularizer = args.regularizer;
    }
    if let Some(lambda) = args.lambda {
        config.lambda = lambda;
    }
    if let Some(max_epsilon) = args.max_epsilon {
        config.ransac.max_epsilon = max_epsilon;
    }
}

/// Parses whitespace separated `x1 y1 x2 y2 [weight]` rows. Blank lines and lines
/// starting with `#` are skipped.
fn parse_matches(text: &str) -> Result<Vec<PointMatch>, String> {
    let mut matches = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = line
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("line {}: {e}", number + 1))?;
        let weight = match values.len() {
            4 => 1.0,
            5 => values[4],
            n => return Err(format!("line {}: expected 4 or 5 numbers, found {n}", number + 1)),
        };
        matches.push(PointMatch::from_locations([values[0], values[1]], [values[2], values[3]], weight));
    }
    Ok(matches)
}

fn domain_size(args: &Args, candidates: &[PointMatch]) -> Result<(usize, usize), String> {
    let (mut width, mut height) = (args.width, args.height);
    if let Some(path) = &args.source_image {
        let img = image::open(path).map_err(|e| format!("Could not load image {}: {e}", path.display()))?;
        let (w, h) = img.dimensions();
        width = width.or(Some(w as usize));
        height = height.or(Some(h as usize));
    }
    let extent = |k: usize| {
        candidates.iter().map(|m| m.p1.local()[k]).fold(0.0_f64, f64::max).ceil() as usize + 1
    };
    Ok((width.unwrap_or_else(|| extent(0)), height.unwrap_or_else(|| extent(1))))
}

/// Elastic moving least squares over the inliers, weighted by distance to each
/// mesh vertex and started from the global model.
fn refine_elastic(
    model: &AnyModel,
    inliers: &[PointMatch],
    config: &RuntimeConfig,
    width: usize,
    height: usize,
) -> Result<TransformMesh, String> {
    let (w, h) = (width as f64, height as f64);
    let num_x = config.spring.resolution.max(2);
    let num_y = ((h / (w / (num_x - 1) as f64)).round() as usize + 1).max(2);
    let mut elastic = ElasticMovingLeastSquaresMesh::new(model.clone(), num_x, num_y, w, h, config.coupling);
    for m in inliers {
        elastic.add_match_weighted_by_distance(m, config.alpha);
    }
    let convergence = elastic
        .optimize(&config.optimize)
        .map_err(|e| format!("Elastic refinement failed: {e}"))?;
    println!(
        "Elastic mesh: {} iterations, error {:.4}{}",
        convergence.iterations,
        convergence.error,
        if convergence.converged { "" } else { " (not converged)" }
    );
    Ok(elastic.into_mesh())
}

/// Spring mesh initialized with the global model; every inlier pulls its
/// nearest vertex by its residual under that model.
fn refine_spring(
    model: &AnyModel,
    inliers: &[PointMatch],
    config: &RuntimeConfig,
    width: usize,
    height: usize,
    rng: &mut StdRng,
) -> Result<TransformMesh, String> {
    let mut spring_mesh = SpringMesh::new(&config.spring, width as f64, height as f64);
    spring_mesh.init(model).map_err(|e| format!("Spring mesh initialization failed: {e}"))?;
    let nearest = spring_mesh.mesh().closest_source_vertices(&PointMatch::source_points(inliers));
    for (m, v) in inliers.iter().zip(nearest) {
        let Some(v) = v else {
            continue;
        };
        let global = model.apply(m.p1.local());
        let target = spring_mesh.mesh().target(v);
        let pull = [target[0] + m.p2.world()[0] - global[0], target[1] + m.p2.world()[1] - global[1]];
        spring_mesh.attach(v, pull, m.weight());
    }
    let convergence = spring_mesh
        .optimize(&config.optimize, rng)
        .map_err(|e| format!("Spring refinement failed: {e}"))?;
    println!(
        "Spring mesh: {} iterations, total force {:.4}{}",
        convergence.iterations,
        convergence.error,
        if convergence.converged { "" } else { " (not converged)" }
    );
    Ok(spring_mesh.into_mesh())
}

/// Nearest-neighbour pull of every output pixel through `map`. Unmapped pixels
/// stay transparent.
fn warp_image(map: &TransformMap, source: &Path, warped: &Path) -> Result<(), String> {
    println!("Reading image file: {}", source.display());
    let img = image::open(source)
        .map_err(|e| format!("Could not load image {}: {e}", source.display()))?
        .to_rgba8();
    let mut out = RgbaImage::new(map.width() as u32, map.height() as u32);
    for y in 0..map.height() {
        for x in 0..map.width() {
            let p = map.get(x, y);
            if p[0].is_nan() || p[1].is_nan() {
                continue;
            }
            let (sx, sy) = (p[0].round(), p[1].round());
            if sx < 0.0 || sy < 0.0 || sx >= img.width() as f32 || sy >= img.height() as f32 {
                continue;
            }
            out.put_pixel(x as u32, y as u32, *img.get_pixel(sx as u32, sy as u32));
        }
    }
    println!("Writing image {}", warped.display());
    out.save(warped).map_err(|e| format!("Could not write image {}: {e}", warped.display()))
}
