use anyhow::Result;
use clap::Parser;
use engine::{BookStore, Recommender};
use ingest::{parse_sources, IngestConfig};
use server::{build_app, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// SQLite catalog path
    #[arg(long, default_value = "books.db")]
    db: PathBuf,
    /// Cleaned CSV consumed by background sync
    #[arg(long, default_value = "cleaned_books.csv")]
    csv: PathBuf,
    /// Comma-separated metadata source order used by background sync
    #[arg(
        long,
        default_value = "google-isbn,openlibrary-isbn,google-title-author,google-title,openlibrary-title"
    )]
    sources: String,
    /// Concurrent fetch workers for background sync
    #[arg(long, default_value_t = 16)]
    sync_concurrency: usize,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let store = BookStore::new(&args.db);
    store.init_schema()?;

    let engine = Arc::new(Recommender::new(Arc::new(store.clone())));
    match engine.rebuild() {
        Ok(summary) => {
            tracing::info!(books = summary.books, terms = summary.terms, "initial snapshot built")
        }
        Err(err) => tracing::warn!(error = %err, "initial snapshot build failed, serving without one"),
    }

    let state = AppState {
        engine,
        store,
        ingest: IngestConfig {
            csv_path: args.csv,
            sources: parse_sources(&args.sources)?,
            concurrency: args.sync_concurrency,
        },
    };
    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
