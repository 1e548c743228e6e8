use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pv_hybrid_forecast::config::Config;
use pv_hybrid_forecast::data::{read_training_csv, read_weather_csv, write_forecast_csv};
use pv_hybrid_forecast::domain::SiteGeometry;
use pv_hybrid_forecast::error::{ErrorKind, ErrorReport, ForecastError};
use pv_hybrid_forecast::lifecycle;
use pv_hybrid_forecast::telemetry::init_tracing;
use tracing::info;

#[derive(Parser)]
#[command(name = "pvf")]
#[command(about = "Hybrid PV power forecasting", long_about = None)]
struct Cli {
    /// TOML configuration file, layered over the defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model bundle from a historical table
    Train {
        /// Telemetry joined with weather, one row per timestamp
        #[arg(long)]
        data: PathBuf,
        #[command(flatten)]
        site: SiteArgs,
        /// New bundle directory
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Forecast power over a weather forecast
    Predict {
        /// Bundle directory written by `train`
        #[arg(short, long)]
        model: PathBuf,
        #[arg(long)]
        weather: PathBuf,
        /// Recent telemetry joined with observed weather
        #[arg(long)]
        history: PathBuf,
        #[command(flatten)]
        site: SiteArgs,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args)]
struct SiteArgs {
    #[arg(long, allow_negative_numbers = true)]
    latitude: f64,
    #[arg(long, allow_negative_numbers = true)]
    longitude: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    altitude: f64,
    /// Overrides `site.tilt`
    #[arg(long)]
    tilt: Option<f64>,
    /// Overrides `site.azimuth`
    #[arg(long)]
    azimuth: Option<f64>,
}

impl SiteArgs {
    fn geometry(&self, config: &Config) -> SiteGeometry {
        let mut site = config.site.geometry(self.latitude, self.longitude, self.altitude);
        if let Some(tilt) = self.tilt {
            site.tilt = tilt;
        }
        if let Some(azimuth) = self.azimuth {
            site.azimuth = azimuth;
        }
        site
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Train { data, site, output } => {
            let site = site.geometry(&config);
            site.check()?;
            let table = read_training_csv(&data, config.data.tz()?)?;
            let bundle = lifecycle::train(&table, &site, &config)?;
            lifecycle::save(&bundle, &output)?;
            info!(
                bundle_id = %bundle.id(),
                output = %output.display(),
                sequence_rmse = bundle.metadata.metrics.sequence.rmse,
                blend_rmse = bundle.metadata.metrics.blend.rmse,
                "bundle written"
            );
        }
        Command::Predict {
            model,
            weather,
            history,
            site,
            output,
        } => {
            let site = site.geometry(&config);
            site.check()?;
            let tz = config.data.tz()?;
            let bundle = lifecycle::load(&model)?;
            let history = read_training_csv(&history, tz)?;
            let weather = read_weather_csv(&weather, tz)?;
            let results = lifecycle::predict(&bundle, &history, &weather, &site, &config)?;
            write_forecast_csv(&output, &results)?;
            info!(steps = results.len(), output = %output.display(), "forecast written");
        }
        Command::Config => {
            print!("{}", config.to_toml().context("rendering configuration")?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();

    let Err(err) = run(Cli::parse()) else {
        return ExitCode::SUCCESS;
    };
    let report = match err.downcast_ref::<ForecastError>() {
        Some(e) => ErrorReport::from(e),
        None => ErrorReport {
            kind: ErrorKind::IoError,
            message: format!("{err:#}"),
        },
    };
    match serde_json::to_string(&report) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!("{}: {}", report.kind, report.message),
    }
    ExitCode::from(report.kind.exit_code() as u8)
}
