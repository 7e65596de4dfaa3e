//! Command-line client for antenas that queries the Spanish mobile tower dataset.

mod config;

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use antenas_core::{
    DEFAULT_MAP_LIMIT, DEFAULT_NEARBY_LIMIT, DEFAULT_RADIUS_M, DEFAULT_TOP_N, DatasetLoader,
    MapQuery, NearbyQuery, Page, QueryError, TowerFilter, TowerRecord, TowerService,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio::fs;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "antenas", version, about = "Query Spanish mobile network towers")]
struct Cli {
    /// TOML configuration file; built-in defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dataset size and provenance.
    Overview,
    /// List towers matching attribute and bounding-box filters.
    List(ListArgs),
    /// Towers around a point, nearest first.
    Near(NearArgs),
    /// Footprint of one operator.
    Info {
        /// Case-insensitive operator substring.
        operator: String,
    },
    /// Tower counts per operator and province.
    Coverage,
    /// Top provinces and operators by tower count.
    Rankings {
        #[arg(long, default_value_t = DEFAULT_TOP_N)]
        top_n: usize,
    },
    /// All towers with coordinates as GeoJSON.
    Geojson,
    /// Tower counts per operator and technology.
    MapStats,
    /// Towers inside a viewport as GeoJSON.
    Map(MapArgs),
    /// Write the loaded dataset to a flat JSON file with its identifiers.
    Export {
        /// Output file.
        path: PathBuf,
    },
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    province: Option<String>,
    #[arg(long)]
    municipality: Option<String>,
    #[arg(long)]
    operator: Option<String>,
    #[arg(long)]
    technology: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    lat_min: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lat_max: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lon_min: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lon_max: Option<f64>,
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long, default_value_t = 100)]
    limit: usize,
}

impl ListArgs {
    fn filter(&self) -> TowerFilter {
        TowerFilter {
            province: self.province.clone(),
            municipality: self.municipality.clone(),
            operator: self.operator.clone(),
            technology: self.technology.clone(),
            bbox: None,
        }
        .with_bounds(self.lat_min, self.lat_max, self.lon_min, self.lon_max)
    }
}

#[derive(Debug, Args)]
struct NearArgs {
    /// Latitude in decimal degrees.
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,
    /// Longitude in decimal degrees.
    #[arg(long, allow_negative_numbers = true)]
    lon: f64,
    /// Search radius in meters.
    #[arg(long, default_value_t = DEFAULT_RADIUS_M)]
    radius_m: f64,
    #[arg(long, default_value_t = DEFAULT_NEARBY_LIMIT)]
    limit: usize,
}

#[derive(Debug, Args)]
struct MapArgs {
    /// Viewport as min_lon,min_lat,max_lon,max_lat.
    #[arg(long, allow_hyphen_values = true)]
    bbox: Option<String>,
    /// Exact operator name.
    #[arg(long)]
    operator: Option<String>,
    /// Exact technology name.
    #[arg(long)]
    technology: Option<String>,
    #[arg(long, default_value_t = DEFAULT_MAP_LIMIT)]
    limit: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable JSON
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_err| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let config = match cli.config.as_deref() {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };

    let source = config.build_source()?;
    info!(
        source = %source.describe().name,
        location = %source.describe().location,
        "Using tower dataset source"
    );
    let loader = Arc::new(DatasetLoader::new(source, config.loader_config()));
    let service = TowerService::new(loader);

    match run(&service, cli.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => match err.downcast::<QueryError>() {
            Ok(query_err) => report(&query_err),
            Err(other) => Err(other),
        },
    }
}

async fn run(service: &TowerService, command: Command) -> Result<()> {
    match command {
        Command::Overview => emit(&service.overview().await?),
        Command::List(args) => {
            let page = Page {
                page: args.page,
                limit: args.limit,
            };
            emit(&service.list(&args.filter(), page).await?)
        }
        Command::Near(args) => {
            let request = NearbyQuery {
                lat: args.lat,
                lon: args.lon,
                radius_m: args.radius_m,
                limit: args.limit,
            };
            emit(&service.nearby(request).await?)
        }
        Command::Info { operator } => emit(&service.operator_info(&operator).await?),
        Command::Coverage => emit(&service.coverage().await?),
        Command::Rankings { top_n } => emit(&service.rankings(top_n).await?),
        Command::Geojson => emit(&service.geojson().await?),
        Command::MapStats => emit(&service.map_stats().await?),
        Command::Map(args) => {
            let request = MapQuery {
                bbox: args.bbox,
                operator: args.operator,
                technology: args.technology,
                limit: args.limit,
            };
            emit(&service.map_view(&request).await?)
        }
        Command::Export { path } => export(service, &path).await,
    }
}

async fn export(service: &TowerService, path: &Path) -> Result<()> {
    let snapshot = service.loader().load().await.map_err(QueryError::from)?;
    write_dataset(snapshot.records(), path).await?;

    info!(records = snapshot.len(), path = %path.display(), "Exported tower dataset");
    emit(&json!({ "exported": snapshot.len(), "path": path.display().to_string() }))
}

/// Write records in the flat format the mirror and file sources read back, ids included.
async fn write_dataset(records: &[TowerRecord], path: &Path) -> Result<()> {
    let payload = serde_json::to_vec(records).context("Failed to encode dataset")?;
    fs::write(path, payload)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn report(err: &QueryError) -> Result<ExitCode> {
    let (status, code) = match err {
        QueryError::NotFound(_) => (404, 2),
        QueryError::Unavailable(_) => (503, 3),
        QueryError::InvalidArgument(_) => (400, 4),
    };
    emit(&json!({ "error": err.to_string(), "status": status }))?;
    Ok(ExitCode::from(code))
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("Failed to write output")?;
    writeln!(stdout)?;
    Ok(())
}
