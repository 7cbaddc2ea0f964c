use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::TryStreamExt;
use log::info;
use serde::Serialize;

use cone_atlas::config::Settings;
use cone_atlas::data::loader::load_file;
use cone_atlas::data::model::CONE_TABLE;
use cone_atlas::legend::{counts_query, representative_query};
use cone_atlas::query::sql::{render, PlaceholderStyle};
use cone_atlas::query::Query;
use cone_atlas::service::{
    self, ConeQueryParams, ExportParams, MetadataParams, PlotParams, RangeParams,
};
use cone_atlas::store::MemoryStore;
use cone_atlas::ConeService;

#[derive(Debug, Parser)]
#[command(name = "cone-atlas", version, about = "Query and export retinal cone datasets")]
struct Cli {
    /// Dataset to serve (.csv, .json or .parquet).
    #[arg(long, required_unless_present = "sql")]
    data: Option<PathBuf>,

    /// JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    pool_size: Option<usize>,

    /// Print the statement a SQL backend would run instead of executing it.
    #[arg(long, value_enum)]
    sql: Option<PlaceholderStyle>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Default, Args)]
struct FilterArgs {
    #[arg(long)]
    subject_id: Option<String>,
    #[arg(long)]
    meridian: Option<String>,
    /// Repeat for several classes.
    #[arg(long = "cone-type")]
    cone_types: Vec<String>,
    #[arg(long)]
    eccentricity_min: Option<f64>,
    #[arg(long)]
    eccentricity_max: Option<f64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Distinct subjects with age and eye.
    Subjects,
    /// Full cone records, paginated.
    Cones {
        #[arg(long)]
        subject_id: Option<String>,
        #[arg(long)]
        meridian: Option<String>,
        #[arg(long = "cone-type")]
        cone_type: Option<String>,
        #[arg(long)]
        age_min: Option<i64>,
        #[arg(long)]
        age_max: Option<i64>,
        #[arg(long, allow_hyphen_values = true)]
        limit: Option<i64>,
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i64>,
    },
    /// Coordinates and classes for plotting.
    Plot {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, allow_hyphen_values = true)]
        limit: Option<i64>,
    },
    /// Legend record and class counts.
    Metadata {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Eccentricity display ranges for one subject and meridian.
    Ranges {
        #[arg(long)]
        subject_id: String,
        #[arg(long)]
        meridian: String,
    },
    /// Stream matching cones as CSV.
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, allow_hyphen_values = true)]
        limit: Option<i64>,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };
    if let Some(size) = cli.pool_size {
        settings.pool_size = size;
    }

    if let Some(style) = cli.sql {
        for query in plan(&settings, &cli.command)? {
            let stmt = render(&query, CONE_TABLE, style);
            println!("{}", stmt.text);
            println!("  -- args: {:?}", stmt.args);
        }
        return Ok(());
    }

    let data = cli.data.as_deref().context("--data is required")?;
    let rows = load_file(data).with_context(|| format!("loading {}", data.display()))?;
    let store = Arc::new(MemoryStore::new(rows, settings.pool_size));
    let service = ConeService::new(Arc::clone(&store), settings);

    let outcome = run(&service, &cli.command).await;
    store.close();
    outcome
}

async fn run(service: &ConeService<MemoryStore>, command: &Command) -> Result<()> {
    match command {
        Command::Subjects => print_json(&service.subjects().await?),
        Command::Cones { .. } => print_json(&service.cones(&cone_params(command)).await?),
        Command::Plot { filter, limit } => {
            print_json(&service.plot_data(&plot_params(filter, *limit)).await?)
        }
        Command::Metadata { filter } => print_json(&service.metadata(&metadata_params(filter)).await?),
        Command::Ranges { subject_id, meridian } => {
            let params = RangeParams {
                subject_id: Some(subject_id.clone()),
                meridian: Some(meridian.clone()),
            };
            print_json(&service.eccentricity_ranges(&params).await?)
        }
        Command::Export { filter, limit, out } => {
            let mut export = service.export(&export_params(filter, *limit)).await?;
            let mut sink: Box<dyn Write> = match out {
                Some(path) => Box::new(
                    File::create(path).with_context(|| format!("creating {}", path.display()))?,
                ),
                None => Box::new(io::stdout().lock()),
            };
            let mut lines = 0u64;
            while let Some(line) = export.body.try_next().await? {
                sink.write_all(&line)?;
                lines += 1;
            }
            sink.flush()?;
            info!("wrote {} ({lines} lines)", export.filename);
            Ok(())
        }
    }
}

/// Queries a SQL backend would execute for `command`.
fn plan(settings: &Settings, command: &Command) -> Result<Vec<Query>> {
    let limits = &settings.limits;
    let queries = match command {
        Command::Subjects => vec![service::subjects_query(limits)],
        Command::Cones { .. } => vec![service::cones_query(limits, &cone_params(command))?],
        Command::Plot { filter, limit } => {
            vec![service::plot_query(limits, &plot_params(filter, *limit))?]
        }
        Command::Metadata { filter } => {
            let spec = service::metadata_filter(&metadata_params(filter));
            vec![representative_query(&spec), counts_query(&spec)]
        }
        Command::Ranges { subject_id, meridian } => vec![service::ranges_query(&RangeParams {
            subject_id: Some(subject_id.clone()),
            meridian: Some(meridian.clone()),
        })?],
        Command::Export { filter, limit, .. } => {
            vec![service::export_query(limits, &export_params(filter, *limit))?]
        }
    };
    Ok(queries)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn cone_params(command: &Command) -> ConeQueryParams {
    match command {
        Command::Cones {
            subject_id,
            meridian,
            cone_type,
            age_min,
            age_max,
            limit,
            offset,
        } => ConeQueryParams {
            subject_id: subject_id.clone(),
            meridian: meridian.clone(),
            cone_type: cone_type.clone(),
            age_min: *age_min,
            age_max: *age_max,
            limit: *limit,
            offset: *offset,
        },
        _ => ConeQueryParams::default(),
    }
}

fn plot_params(filter: &FilterArgs, limit: Option<i64>) -> PlotParams {
    PlotParams {
        subject_id: filter.subject_id.clone(),
        meridian: filter.meridian.clone(),
        cone_types: filter.cone_types.clone(),
        eccentricity_min: filter.eccentricity_min,
        eccentricity_max: filter.eccentricity_max,
        limit,
    }
}

fn metadata_params(filter: &FilterArgs) -> MetadataParams {
    MetadataParams {
        subject_id: filter.subject_id.clone(),
        meridian: filter.meridian.clone(),
        cone_types: filter.cone_types.clone(),
        eccentricity_min: filter.eccentricity_min,
        eccentricity_max: filter.eccentricity_max,
    }
}

fn export_params(filter: &FilterArgs, limit: Option<i64>) -> ExportParams {
    ExportParams {
        subject_id: filter.subject_id.clone(),
        meridian: filter.meridian.clone(),
        cone_types: filter.cone_types.clone(),
        eccentricity_min: filter.eccentricity_min,
        eccentricity_max: filter.eccentricity_max,
        limit,
    }
}
