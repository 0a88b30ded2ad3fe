/// Climatology tool: monthly climatology, deviation cube, water-year means
/// and the extremes report for a groundwater anomaly cube.
///
/// With `--from-deviation` the monthly step is skipped and the annual means
/// are computed from a previously saved deviation cube.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gws_core::aggregation::Extremes;
use gws_core::artifact::{AnomalyCube, DeviationCube, MapSet};
use gws_core::config::PipelineConfig;
use gws_core::pipeline::{run_stage, AnnualInput, AnnualStage, ClimatologyStage};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "climatology",
    about = "Monthly climatology, deviation cube and water-year means of a groundwater anomaly cube"
)]
struct Args {
    /// Groundwater anomaly cube written by `fusion`
    #[arg(short, long, default_value = "dgw.json")]
    input: PathBuf,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "climatology")]
    output_dir: PathBuf,

    /// Pipeline configuration (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reuse a saved deviation cube instead of recomputing it
    #[arg(long)]
    from_deviation: Option<PathBuf>,
}

// ── Report ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Report {
    first_date: NaiveDate,
    last_date: NaiveDate,
    epochs: usize,
    extremes: Option<Extremes>,
    empty_water_years: Vec<i32>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "climatology=info,gws_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(p) => PipelineConfig::load(p).with_context(|| format!("reading config {}", p.display()))?,
        None => PipelineConfig::default(),
    };

    let cube = AnomalyCube::load(&args.input)
        .with_context(|| format!("reading anomaly cube {}", args.input.display()))?;
    let grid = cube.grid()?;
    let dates = cube.dates()?;
    let (Some(&first_date), Some(&last_date)) = (dates.first(), dates.last()) else {
        bail!("anomaly cube has an empty time axis");
    };
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let (deviation, extremes) = match &args.from_deviation {
        Some(p) => {
            info!("Reusing deviation cube {}", p.display());
            let dev = DeviationCube::load(p)
                .with_context(|| format!("reading deviation cube {}", p.display()))?;
            if dev.0.n_time != dates.len() {
                bail!(
                    "deviation cube has {} steps but the anomaly cube has {}",
                    dev.0.n_time,
                    dates.len()
                );
            }
            let extremes = gws_core::aggregation::extremes(&dev.0, &dates)?;
            (dev.0, extremes)
        }
        None => {
            let clim = run_stage(&ClimatologyStage, &cube)?;
            let monthly = MapSet::new((1..=12).zip(clim.monthly.maps).collect(), &grid)?;
            let path = args.output_dir.join("monthly.json");
            monthly.save(&path).with_context(|| format!("writing {}", path.display()))?;

            let dev = DeviationCube(clim.deviation);
            let path = args.output_dir.join("dev.json");
            dev.save(&path).with_context(|| format!("writing {}", path.display()))?;
            (dev.0, clim.extremes)
        }
    };

    let annual = run_stage(
        &AnnualStage { years: config.water_years.candidates() },
        &AnnualInput { deviation, dates },
    )?;
    let empty_water_years = annual
        .iter()
        .filter(|(_, m)| m.all_masked())
        .map(|(y, _)| *y)
        .collect();
    let annual = MapSet::new(annual, &grid)?;
    let path = args.output_dir.join("annual.json");
    annual.save(&path).with_context(|| format!("writing {}", path.display()))?;

    if let Some(ex) = &extremes {
        println!(
            "max deviation {:.3} cm in {:02}/{} | min deviation {:.3} cm in {:02}/{}",
            ex.max.value, ex.max.month, ex.max.year, ex.min.value, ex.min.month, ex.min.year
        );
    } else {
        println!("no valid deviations");
    }

    let report = Report {
        first_date,
        last_date,
        epochs: cube.time.len(),
        extremes,
        empty_water_years,
    };
    let path = args.output_dir.join("report.json");
    fs::write(&path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
