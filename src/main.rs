mod batch;
mod config;
mod db;
mod error;
mod fetch;
mod models;
mod orchestrator;
mod parser;
mod writer;

use std::sync::Arc;

use anyhow::{Context, Result};
use batch::{BatchOptions, BatchScheduler};
use clap::{Parser, Subcommand};
use config::Config;
use db::Database;
use fetch::{RetryPolicy, SearchApiClient};
use orchestrator::{QueryOutcome, SearchOrchestrator, SearchQuery};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use writer::StorageWriter;

#[derive(Parser)]
#[command(name = "jobsweep")]
#[command(about = "Ingest job listings from the Google Jobs search API into a local store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run one search, following pagination
    Search {
        /// Job title or search query
        title: String,

        /// Location appended to the query text
        #[arg(short, long)]
        location: Option<String>,

        /// Geographic target sent as the API's location parameter
        #[arg(long)]
        geo: Option<String>,

        /// Maximum pages to fetch
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u64).range(1..))]
        max_pages: u64,

        /// Attempts per HTTP request
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..))]
        max_retries: u32,
    },

    /// Search every title/location combination
    Batch {
        /// Job title to search (repeatable, defaults to the built-in list)
        #[arg(short = 't', long = "title")]
        titles: Vec<String>,

        /// Location to search (repeatable, defaults to the Bay Area list)
        #[arg(short = 'l', long = "location")]
        locations: Vec<String>,

        /// Skip the major tech hub locations
        #[arg(long)]
        no_tech_hubs: bool,

        /// Searches running at once
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u64).range(1..))]
        max_concurrent: u64,

        /// Upper bound on search submissions per minute (0 = no delay)
        #[arg(long, default_value = "30")]
        calls_per_minute: u32,

        /// Attempts per HTTP request
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..))]
        max_retries: u32,

        /// Maximum pages to fetch per search
        #[arg(long, default_value = "2", value_parser = clap::value_parser!(u64).range(1..))]
        max_pages: u64,
    },

    /// Show a stored search and the jobs it found
    ShowSearch {
        /// Search metadata id of the query's first page
        id: String,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,jobsweep=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn build_orchestrator(
    config: &Config,
    db: &Arc<Database>,
    max_retries: u32,
    max_pages: usize,
) -> Result<SearchOrchestrator> {
    let client = SearchApiClient::new(config, RetryPolicy::with_attempts(max_retries))
        .context("Failed to create HTTP client")?;
    Ok(SearchOrchestrator::new(
        Arc::new(client),
        StorageWriter::new(db.clone()),
        max_pages,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config);

    tracing::info!(
        environment = %config.environment,
        observability_token = config.logfire_token.is_some(),
        "Starting jobsweep"
    );
    if config.api_key.is_none() {
        tracing::warn!("SEARCH_API_KEY is not set; every fetch will fail");
    }

    let db = Arc::new(Database::open(&config.database_path)?);

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
            println!("Stored jobs: {}", db.count_jobs()?);
        }

        Commands::Search {
            title,
            location,
            geo,
            max_pages,
            max_retries,
        } => {
            db.ensure_initialized()?;
            let orchestrator = build_orchestrator(&config, &db, max_retries, max_pages as usize)?;
            let query = SearchQuery {
                geotarget: geo,
                ..SearchQuery::new(title, location)
            };

            let summary = orchestrator.run(&query).await;
            println!("Search: {}", query.title);
            if let Some(id) = &summary.search_id {
                println!("Search ID: {}", id);
            }
            println!("Jobs found: {}", summary.total_jobs);
            println!("Pages processed: {}", summary.pages_processed);
            println!("Storage OK: {}", summary.storage_ok);
            if let QueryOutcome::Failed(reason) = &summary.outcome {
                println!("Failed: {}", reason);
            }
        }

        Commands::Batch {
            titles,
            locations,
            no_tech_hubs,
            max_concurrent,
            calls_per_minute,
            max_retries,
            max_pages,
        } => {
            db.ensure_initialized()?;
            let defaults = BatchOptions::default();
            let options = BatchOptions {
                job_titles: if titles.is_empty() { defaults.job_titles } else { titles },
                locations: if locations.is_empty() { defaults.locations } else { locations },
                tech_hubs: defaults.tech_hubs,
                include_tech_hubs: !no_tech_hubs,
                max_concurrent: max_concurrent as usize,
                calls_per_minute,
                max_retries,
                max_pages: max_pages as usize,
            };

            let orchestrator =
                build_orchestrator(&config, &db, options.max_retries, options.max_pages)?;
            let report = BatchScheduler::new(Arc::new(orchestrator), options).run().await;

            println!("\nResults:");
            println!("  Searches:   {}", report.total);
            println!("  Successful: {}", report.successful);
            println!("  Failed:     {}", report.failed);
            println!("  Duration:   {:.1}s", report.duration.as_secs_f64());
            println!("  Throughput: {:.2} searches/s", report.throughput());
        }

        Commands::ShowSearch { id } => {
            db.ensure_initialized()?;
            match db.get_search(&id)? {
                Some(doc) => {
                    println!("Search {}", doc.id());
                    println!("Query: {}", doc.search_parameters.q);
                    println!("Status: {}", doc.search_metadata.status);
                    if !doc.search_information.detected_location.is_empty() {
                        println!("Detected location: {}", doc.search_information.detected_location);
                    }
                    println!("Total jobs: {}", doc.total_jobs);
                    println!("Pages processed: {}", doc.pages_processed);
                    println!("Jobs last seen by this search: {}", db.jobs_for_search(doc.id())?.len());
                    println!("Created: {}", doc.created_at.to_rfc3339());
                    println!("Updated: {}", doc.updated_at.to_rfc3339());
                    if !doc.jobs.is_empty() {
                        println!("\n{:<6} {:<36} {:<24}", "ID", "TITLE", "COMPANY");
                        println!("{}", "-".repeat(66));
                        for job_id in &doc.jobs {
                            if let Some(job) = db.get_job(*job_id)? {
                                println!(
                                    "{:<6} {:<36} {:<24}",
                                    job_id,
                                    truncate(&job.listing.title, 34),
                                    truncate(&job.listing.company_name, 22)
                                );
                            }
                        }
                    }
                }
                None => {
                    println!("Search '{}' not found.", id);
                }
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
