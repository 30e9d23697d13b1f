use anyhow::Result;
use clap::{Parser, Subcommand};
use engine::BookStore;
use ingest::{parse_sources, IngestConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Clean, enrich and load the book catalog", long_about = None)]
struct Cli {
    /// SQLite catalog path
    #[arg(long, default_value = "books.db")]
    db: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize ISBNs in a raw export and deduplicate by cleaned ISBN
    Clean {
        /// Raw export to read
        #[arg(long, default_value = "RC_BOOK_ISBN.csv")]
        input: PathBuf,
        /// Cleaned CSV to write
        #[arg(long, default_value = "cleaned_books.csv")]
        output: PathBuf,
    },
    /// Enrich cleaned rows against the metadata sources and insert matches
    Run {
        /// Cleaned CSV to read
        #[arg(long, default_value = "cleaned_books.csv")]
        csv: PathBuf,
        /// Maximum number of new rows to process
        #[arg(long, default_value_t = 40_000)]
        limit: usize,
        /// Concurrent fetch workers
        #[arg(long, default_value_t = 16)]
        concurrency: usize,
        /// Comma-separated source order
        #[arg(
            long,
            default_value = "google-isbn,openlibrary-isbn,google-title-author,google-title,openlibrary-title"
        )]
        sources: String,
    },
    /// Retry the sources for records still missing a description
    Refresh {
        /// Maximum number of rows to retry
        #[arg(long, default_value_t = 1000)]
        limit: usize,
        /// Concurrent fetch workers
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
        /// Comma-separated source order
        #[arg(long, default_value = "openlibrary-isbn,openlibrary-title,google-isbn")]
        sources: String,
    },
    /// Insert a single test record into an empty catalog
    Seed,
    /// Print catalog counts: total records and usable descriptions
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Clean { input, output } => {
            let report = ingest::clean_file(&input, &output)?;
            tracing::info!(
                raw = report.raw_rows,
                valid_isbn = report.valid_isbn,
                written = report.written,
                output = %output.display(),
                "csv cleaned"
            );
        }
        Commands::Run {
            csv,
            limit,
            concurrency,
            sources,
        } => {
            let store = BookStore::new(&cli.db);
            store.init_schema()?;
            let config = IngestConfig {
                csv_path: csv,
                sources: parse_sources(&sources)?,
                concurrency,
            };
            let report = ingest::run(&store, &config, limit).await?;
            tracing::info!(
                scanned = report.scanned,
                skipped = report.skipped_existing,
                processed = report.processed,
                inserted = report.inserted,
                without_description = report.without_description,
                "ingest finished; POST /reload against the service to index the new records"
            );
        }
        Commands::Refresh {
            limit,
            concurrency,
            sources,
        } => {
            let store = BookStore::new(&cli.db);
            store.init_schema()?;
            let report =
                ingest::refresh(&store, &parse_sources(&sources)?, concurrency, limit).await?;
            tracing::info!(
                scanned = report.scanned,
                refreshed = report.refreshed,
                still_missing = report.still_missing,
                "refresh finished; POST /reload against the service to index the new records"
            );
        }
        Commands::Seed => {
            let store = BookStore::new(&cli.db);
            store.init_schema()?;
            if ingest::seed(&store)? {
                tracing::info!("inserted test record");
            } else {
                tracing::info!(books = store.count_books()?, "catalog not empty, nothing seeded");
            }
        }
        Commands::Stats => {
            let store = BookStore::new(&cli.db);
            store.init_schema()?;
            let total = store.count_books()?;
            let described = store.count_described()?;
            tracing::info!(total, described, "catalog counts");
        }
    }
    Ok(())
}
