/// Fusion tool: combines the three satellite processing centers, the
/// scale-factor grid and the land-surface model into the groundwater storage
/// anomaly cube consumed by `climatology` and `point_trend`.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gws_core::config::PipelineConfig;
use gws_core::fusion::FusionInputs;
use gws_core::pipeline::{run_stage, FusionStage};
use gws_core::polygon::PolygonWithHoles;
use gws_core::sources::SourceBundle;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "fusion",
    about = "Fuse satellite and land-model water storage into a groundwater anomaly cube"
)]
struct Args {
    /// Land-model bundle (canopy + soil moisture layers)
    #[arg(long, default_value = "data/gldas.json")]
    gldas: PathBuf,

    /// CSR satellite solution bundle
    #[arg(long, default_value = "data/grace_csr.json")]
    csr: PathBuf,

    /// JPL satellite solution bundle
    #[arg(long, default_value = "data/grace_jpl.json")]
    jpl: PathBuf,

    /// GFZ satellite solution bundle
    #[arg(long, default_value = "data/grace_gfz.json")]
    gfz: PathBuf,

    /// Scale factor bundle (time-less)
    #[arg(long, default_value = "data/scale_factors.json")]
    scale_factors: PathBuf,

    /// Region of interest, GeoJSON Polygon or Feature
    #[arg(long, default_value = "data/region.geojson")]
    region: PathBuf,

    /// Pipeline configuration (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output anomaly cube
    #[arg(short, long, default_value = "dgw.json")]
    output: PathBuf,
}

// ── Run summary ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RunSummary<'a> {
    output: &'a Path,
    epochs: usize,
    n_lat: usize,
    n_lon: usize,
    valid_values: usize,
}

fn load_bundle(path: &Path) -> Result<SourceBundle> {
    SourceBundle::load(path).with_context(|| format!("reading bundle {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fusion=info,gws_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(p) => PipelineConfig::load(p).with_context(|| format!("reading config {}", p.display()))?,
        None => PipelineConfig::default(),
    };

    info!("Loading inputs");
    let csr = load_bundle(&args.csr)?;
    let jpl = load_bundle(&args.jpl)?;
    let gfz = load_bundle(&args.gfz)?;
    let scale = load_bundle(&args.scale_factors)?;
    let gldas = load_bundle(&args.gldas)?;
    let region = PolygonWithHoles::load(&args.region)
        .with_context(|| format!("reading region {}", args.region.display()))?;

    let inputs = FusionInputs::from_bundles([&csr, &jpl, &gfz], &scale, &gldas, region)
        .context("assembling fusion inputs")?;
    let cube = run_stage(&FusionStage { config: config.fusion }, &inputs)?;

    cube.save(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;

    let summary = RunSummary {
        output: &args.output,
        epochs: cube.time.len(),
        n_lat: cube.lat.len(),
        n_lon: cube.lon.len(),
        valid_values: cube.mask.iter().filter(|m| !**m).count(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
