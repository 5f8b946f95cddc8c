#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the planning data ETL.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use planning_etl_cli_utils::{IndicatifProgress, init_logger};
use planning_etl_database::run_migrations;
use planning_etl_ingest::{EtlConfig, cadastre, coverage, traffic};
use planning_etl_source::registry::all_datasets;

#[derive(Parser)]
#[command(name = "planning_etl", about = "Planning data ETL pipelines")]
struct Cli {
    /// `PostgreSQL` connection URL (overrides `DATABASE_URL`)
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Records per page for every remote dataset (overrides `ETL_PAGE_SIZE`)
    #[arg(long, global = true)]
    page_size: Option<u64>,
    /// HTTP request timeout in seconds (overrides `ETL_REQUEST_TIMEOUT_SECS`)
    #[arg(long, global = true)]
    request_timeout: Option<u64>,
    /// Fail when a remote count disagrees with the stored rows
    #[arg(long, global = true)]
    strict_count: bool,
    /// Take an advisory lock per target table before upserting
    #[arg(long, global = true)]
    serialize_writers: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// List all configured remote datasets
    Datasets,
    /// Load the traffic count station list
    StationReference,
    /// Load yearly traffic summaries for every known station
    YearlySummary {
        /// Only this station
        #[arg(long)]
        station: Option<String>,
        /// Pause between stations, in milliseconds
        #[arg(long, default_value = "50")]
        delay_ms: u64,
    },
    /// Load bus stops and paths, then derive stop coverage in `PostGIS`
    BusCoverage {
        /// Buffer radius in metres
        #[arg(long, default_value = "400")]
        radius: u32,
    },
    /// Stop coverage over local `GeoJSON` files
    ServiceCoverage {
        /// Bus stop points
        #[arg(long)]
        stops: PathBuf,
        /// Path lines
        #[arg(long)]
        paths: PathBuf,
        /// Buffer radius in metres
        #[arg(long, default_value = "400")]
        radius: u32,
        #[arg(long, default_value = "output")]
        out_dir: PathBuf,
        #[arg(long, default_value = "paths_served")]
        name: String,
        /// geojson, json, geojsonl or gpkg
        #[arg(long, default_value = "geojson")]
        ext: String,
    },
    /// Clip a cadastre file to one suburb of a suburbs file
    ClipCadastre {
        #[arg(long)]
        cadastre: PathBuf,
        #[arg(long)]
        suburbs: PathBuf,
        /// Suburb name (case-insensitive)
        #[arg(long)]
        suburb: String,
        #[arg(long, default_value = "output")]
        out_dir: PathBuf,
        /// Output file name without extension (default: `{suburb}_cadastre`)
        #[arg(long)]
        name: Option<String>,
        /// geojson, json, geojsonl or gpkg
        #[arg(long, default_value = "geojson")]
        ext: String,
    },
    /// Clip the database cadastre to one suburb
    ClipCadastreDb {
        /// Suburb name (case-insensitive)
        #[arg(long)]
        suburb: String,
        /// Also export the result to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Slice cadastre lots that span more than one zone class (files)
    ZoneSlices {
        #[arg(long)]
        cadastre: PathBuf,
        #[arg(long)]
        zones: PathBuf,
        #[arg(long, default_value = "output")]
        out_dir: PathBuf,
        #[arg(long, default_value = "multi_zone_slices")]
        name: String,
        /// geojson, json, geojsonl or gpkg
        #[arg(long, default_value = "geojson")]
        ext: String,
    },
    /// Slice cadastre lots that span more than one zone class (database)
    ZoneSlicesDb {
        /// Export file
        #[arg(long, default_value = "output/multi_zone_slices.geojson")]
        out: PathBuf,
    },
}

impl Cli {
    fn config(&self) -> Result<EtlConfig, planning_etl_ingest::EtlError> {
        let mut config = EtlConfig::from_env()?;
        if let Some(url) = &self.database_url {
            config.database_url.clone_from(url);
        }
        if let Some(page_size) = self.page_size {
            config.page_size = Some(page_size);
        }
        if let Some(secs) = self.request_timeout {
            config.request_timeout = Duration::from_secs(secs);
        }
        config.strict_count = self.strict_count;
        config.serialize_writers = self.serialize_writers;
        Ok(config)
    }
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();
    let config = cli.config()?;
    let start = Instant::now();

    match cli.command {
        Commands::Migrate => {
            log::info!("Running database migrations...");
            let db = config.connect().await?;
            run_migrations(db.as_ref()).await?;
            log::info!("Migrations complete.");
        }
        Commands::Datasets => {
            println!("{:<28} {:<8} {:<28} NAME", "ID", "KIND", "TABLE");
            println!("{}", "-".repeat(90));
            for dataset in all_datasets() {
                let table = dataset.target.to_string();
                println!(
                    "{:<28} {:<8} {:<28} {}",
                    dataset.id(),
                    dataset.kind(),
                    table,
                    dataset.name()
                );
            }
        }
        Commands::StationReference => {
            let db = config.connect().await?;
            run_migrations(db.as_ref()).await?;
            let client = config.client()?;

            let report = traffic::station_reference(
                db.as_ref(),
                &config,
                &client,
                IndicatifProgress::records_bar(&multi, "stations"),
            )
            .await?;
            log::info!(
                "Station reference: fetched={} | upserted={} | count check {}",
                report.fetched,
                report.upserted,
                report.count_check
            );
        }
        Commands::YearlySummary { station, delay_ms } => {
            let db = config.connect().await?;
            run_migrations(db.as_ref()).await?;
            let client = config.client()?;

            traffic::yearly_summary(
                db.as_ref(),
                &config,
                &client,
                station.as_deref(),
                Duration::from_millis(delay_ms),
                IndicatifProgress::steps_bar(&multi, "yearly summary", 0),
            )
            .await?;
        }
        Commands::BusCoverage { radius } => {
            let db = config.connect().await?;
            run_migrations(db.as_ref()).await?;
            let client = config.client()?;

            coverage::bus_coverage(db.as_ref(), &config, &client, radius, |name| {
                IndicatifProgress::records_bar(&multi, name)
            })
            .await?;
        }
        Commands::ServiceCoverage {
            stops,
            paths,
            radius,
            out_dir,
            name,
            ext,
        } => {
            let (out, _) =
                coverage::service_coverage_files(&stops, &paths, radius, &out_dir, &name, &ext)?;
            log::info!("Served paths written to {}", out.display());
        }
        Commands::ClipCadastre {
            cadastre,
            suburbs,
            suburb,
            out_dir,
            name,
            ext,
        } => {
            let name = name.unwrap_or_else(|| default_clip_name(&suburb));
            let out =
                cadastre::clip_cadastre_files(&cadastre, &suburbs, &suburb, &out_dir, &name, &ext)?;
            log::info!("Clipped cadastre written to {}", out.display());
        }
        Commands::ClipCadastreDb { suburb, out } => {
            let db = config.connect().await?;
            let table = cadastre::clip_cadastre_db(db.as_ref(), &suburb, out.as_deref()).await?;
            log::info!("Clipped cadastre stored in {table}");
        }
        Commands::ZoneSlices {
            cadastre,
            zones,
            out_dir,
            name,
            ext,
        } => {
            let out = cadastre::zone_slices_files(&cadastre, &zones, &out_dir, &name, &ext)?;
            log::info!("Multi-zone slices written to {}", out.display());
        }
        Commands::ZoneSlicesDb { out } => {
            let db = config.connect().await?;
            let slices = cadastre::zone_slices_db(db.as_ref(), &out).await?;
            log::info!("{slices} multi-zone slices written to {}", out.display());
        }
    }

    drop(multi);
    log::info!("Runtime: {:.2} seconds", start.elapsed().as_secs_f64());
    Ok(())
}

/// `Rooty Hill` -> `Rooty_Hill_cadastre`.
fn default_clip_name(suburb: &str) -> String {
    let words: Vec<&str> = suburb.split_whitespace().collect();
    format!("{}_cadastre", words.join("_"))
}
