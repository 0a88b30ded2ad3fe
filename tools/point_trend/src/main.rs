/// Point trend tool: inverse-distance-weighted groundwater series at one
/// location, its mean and median, and a linear trend in cm/day and cm/year.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gws_core::artifact::AnomalyCube;
use gws_core::pipeline::{run_stage, PointQueryStage};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "point_trend",
    about = "Groundwater anomaly series and linear trend at a point"
)]
struct Args {
    /// Groundwater anomaly cube written by `fusion`
    #[arg(short, long, default_value = "dgw.json")]
    input: PathBuf,

    /// Latitude in degrees [-90, 90]
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude in degrees [0, 360)
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Write the full report (series, weights, summary, trend) as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the interpolated series to stdout
    #[arg(long)]
    print_series: bool,
}

fn format_row(date: NaiveDate, value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{date}  {v:>9.3}"),
        None => format!("{date}  {:>9}", "--"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "point_trend=info,gws_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if !(-90.0..=90.0).contains(&args.lat) {
        bail!("latitude {} outside [-90, 90]", args.lat);
    }
    if !(0.0..360.0).contains(&args.lon) {
        bail!("longitude {} outside [0, 360)", args.lon);
    }

    let cube = AnomalyCube::load(&args.input)
        .with_context(|| format!("reading anomaly cube {}", args.input.display()))?;
    let report = run_stage(&PointQueryStage { lat: args.lat, lon: args.lon }, &cube)?;

    if args.print_series {
        for (&d, &v) in report.series.dates.iter().zip(&report.series.values) {
            println!("{}", format_row(d, v));
        }
    }

    if let Some(s) = &report.summary {
        println!("mean {:.3} cm | median {:.3} cm | {} valid epochs", s.mean, s.median, s.valid);
    }
    println!(
        "trend {:.5} cm/day | {:.3} cm/year | intercept {:.3} | r² {:.3}",
        report.trend.slope_per_day,
        report.trend.slope_per_year,
        report.trend.intercept,
        report.trend.r_squared
    );

    if let Some(path) = &args.output {
        fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
