use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod db;
mod debounce;
mod fetch;
mod models;
mod normalize;
mod report;
mod search;

use config::CensusConfig;
use fetch::{DocumentStore, MemoryStore};
use models::{Collection, ParticipantRecord};
use normalize::Dimension;
use search::{Filter, ParticipantIndex, SearchQuery, SortDirection, SortSpec};

#[derive(Parser)]
#[command(name = "census")]
#[command(about = "Participant demographics aggregation and search", long_about = None)]
struct Cli {
    /// Read participants from a JSON snapshot instead of Postgres
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,
    /// Documents requested per page (overrides CENSUS_PAGE_SIZE)
    #[arg(long, global = true)]
    page_size: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Scope {
    /// Restrict to one or more collections (student, staffFaculty, community)
    #[arg(long = "collection")]
    collections: Vec<Collection>,
    /// Keep records flagged as archived
    #[arg(long)]
    include_archived: bool,
}

impl Scope {
    fn collections(&self) -> Vec<Collection> {
        if self.collections.is_empty() {
            Collection::ALL.to_vec()
        } else {
            self.collections.clone()
        }
    }

    fn label(&self) -> Option<String> {
        (!self.collections.is_empty()).then(|| {
            self.collections
                .iter()
                .map(|collection| collection.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small synthetic population
    Seed,
    /// Import already-shaped participant rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        collection: Collection,
    },
    /// Print grouped statistics
    Stats {
        #[command(flatten)]
        scope: Scope,
        /// Dimensions to break down (defaults to all)
        #[arg(long = "dimension")]
        dimensions: Vec<Dimension>,
        #[arg(long)]
        json: bool,
    },
    /// Search participants by name, id, program and other fields
    Search {
        #[arg(default_value = "")]
        query: String,
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        sex: Option<String>,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        year_level: Option<String>,
        /// Extra `dimension=value` filters
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<Filter>,
        /// relevance, name, age, created, or a dimension name
        #[arg(long)]
        sort: Option<search::SortKey>,
        /// Sort descending (relevance already defaults to best-first)
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Read queries from stdin and print results once typing pauses
    Browse {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value = "census-report.md")]
        out: PathBuf,
    },
}

fn parse_filter(value: &str) -> Result<Filter, String> {
    let (dimension, expected) = value
        .split_once('=')
        .ok_or_else(|| format!("filter `{value}` must look like dimension=value"))?;
    Ok(Filter::new(dimension.parse::<Dimension>()?, expected))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(config: &CensusConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

async fn open_store(
    snapshot: Option<&PathBuf>,
    config: &CensusConfig,
) -> anyhow::Result<Box<dyn DocumentStore>> {
    match snapshot {
        Some(path) => {
            info!(path = %path.display(), "reading participants from snapshot");
            Ok(Box::new(MemoryStore::from_snapshot(path)?))
        }
        None => Ok(Box::new(db::PgDocumentStore::new(connect(config).await?))),
    }
}

async fn load_population(
    store: &dyn DocumentStore,
    scope: &Scope,
    page_size: usize,
) -> anyhow::Result<Vec<ParticipantRecord>> {
    let mut records = fetch::fetch_population(store, &scope.collections(), page_size)
        .await
        .context("failed to fetch participant records")?;

    let excluded = models::exclude_archived(&mut records, scope.include_archived);
    debug!(excluded, "archived records excluded");
    Ok(records)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = CensusConfig::from_env()?;
    if let Some(page_size) = cli.page_size {
        anyhow::ensure!(page_size > 0, "--page-size must be at least 1");
        config.page_size = page_size;
    }

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            let inserted = db::seed(&pool).await?;
            println!("Inserted {inserted} seed participants.");
        }
        Commands::Import { csv, collection } => {
            let pool = connect(&config).await?;
            let inserted = db::import_csv(&pool, collection, &csv).await?;
            println!("Imported {inserted} new {collection} records from {}.", csv.display());
        }
        Commands::Stats {
            scope,
            dimensions,
            json,
        } => {
            let store = open_store(cli.snapshot.as_ref(), &config).await?;
            let records = load_population(store.as_ref(), &scope, config.page_size).await?;
            let specs: Vec<aggregate::BreakdownSpec> = if dimensions.is_empty() {
                aggregate::default_specs()
            } else {
                dimensions
                    .iter()
                    .map(|dimension| aggregate::BreakdownSpec::for_dimension(*dimension))
                    .collect()
            };
            let breakdowns = aggregate::aggregate_all(&aggregate::canonicalize(&records), &specs);

            if json {
                println!("{}", serde_json::to_string_pretty(&breakdowns)?);
            } else {
                print!("{}", report::render_stats(&breakdowns));
            }
        }
        Commands::Search {
            query,
            scope,
            sex,
            program,
            year_level,
            mut filters,
            sort,
            desc,
            limit,
            json,
        } => {
            let store = open_store(cli.snapshot.as_ref(), &config).await?;
            let records = load_population(store.as_ref(), &scope, config.page_size).await?;
            let index: ParticipantIndex = ParticipantIndex::build(records);

            let shortcuts = [
                (Dimension::Sex, sex),
                (Dimension::Program, program),
                (Dimension::YearLevel, year_level),
            ];
            for (dimension, value) in shortcuts {
                if let Some(value) = value {
                    filters.push(Filter::new(dimension, value));
                }
            }

            let search_query = SearchQuery {
                text: query,
                filters,
                sort: sort.map(|key| SortSpec {
                    key,
                    direction: if desc {
                        SortDirection::Descending
                    } else {
                        key.default_direction()
                    },
                }),
                limit: Some(limit),
            };
            let results = index.search(&search_query);

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print!("{}", report::render_search(&results));
            }
        }
        Commands::Browse { scope, limit } => {
            let store = open_store(cli.snapshot.as_ref(), &config).await?;
            let records = load_population(store.as_ref(), &scope, config.page_size).await?;
            let index: ParticipantIndex = ParticipantIndex::build(records);
            println!(
                "Indexed {} participants. Type a query per line; Ctrl-D to quit.",
                index.records().len()
            );

            let (sender, receiver) = mpsc::channel(64);
            let reader = async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Some(line) = lines.next_line().await? {
                    if sender.send(line).await.is_err() {
                        break;
                    }
                }
                Ok::<_, std::io::Error>(())
            };
            let render = debounce::debounce(receiver, config.debounce, |text: String| {
                let results = index.search(&SearchQuery {
                    text,
                    limit: Some(limit),
                    ..SearchQuery::default()
                });
                print!("{}", report::render_search(&results));
            });

            let (read_result, ()) = tokio::join!(reader, render);
            read_result.context("failed to read queries from stdin")?;
        }
        Commands::Report { scope, out } => {
            let store = open_store(cli.snapshot.as_ref(), &config).await?;
            let records = load_population(store.as_ref(), &scope, config.page_size).await?;
            let breakdowns = aggregate::aggregate_all(
                &aggregate::canonicalize(&records),
                &aggregate::default_specs(),
            );
            let report = report::build_report(
                scope.label().as_deref(),
                Utc::now(),
                &records,
                &breakdowns,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
