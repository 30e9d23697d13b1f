pub mod csv;
pub mod sources;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use engine::{Book, BookStore, NewBook};
use tokio::task::JoinHandle;

use crate::csv::RawRow;
use crate::sources::{Enrichment, MetadataClient, Source};

pub use crate::csv::{clean_file, CleanReport};
pub use crate::sources::parse_sources;

const INSERT_BATCH: usize = 25;

/// Terminal marker written when every source came up empty, so a refreshed
/// row still records that the lookup happened.
const NO_DESCRIPTION: &str = "Description unavailable.";

/// How an enrichment pass reads its input and walks the metadata sources.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub csv_path: PathBuf,
    pub sources: Vec<Source>,
    pub concurrency: usize,
}

/// Counts reported by an enrichment pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    /// Rows present in the cleaned export.
    pub scanned: usize,
    /// Rows skipped because the catalog already has their isbn.
    pub skipped_existing: usize,
    /// Rows fetched against the sources.
    pub processed: usize,
    /// Rows inserted (a usable description was found).
    pub inserted: usize,
    /// Rows where no source produced a description.
    pub without_description: usize,
}

/// Enrich up to `limit` not-yet-stored rows from the cleaned export and
/// insert those that gained a description. The engine does not poll the
/// store, so the caller must trigger a rebuild afterwards.
pub async fn run(store: &BookStore, config: &IngestConfig, limit: usize) -> Result<IngestReport> {
    let rows = csv::read_rows(&config.csv_path)?;
    let existing = store.existing_isbns()?;

    let mut report = IngestReport {
        scanned: rows.len(),
        ..IngestReport::default()
    };
    let mut pending: VecDeque<RawRow> = VecDeque::new();
    for row in rows {
        if existing.contains(&row.isbn) {
            report.skipped_existing += 1;
            continue;
        }
        pending.push_back(row);
        if pending.len() >= limit {
            break;
        }
    }
    tracing::info!(
        to_process = pending.len(),
        skipped = report.skipped_existing,
        concurrency = config.concurrency,
        "enrichment starting"
    );

    let client = MetadataClient::new()?;
    let sources = Arc::new(config.sources.clone());
    let concurrency = config.concurrency.max(1);

    let mut inflight: Vec<JoinHandle<(RawRow, Enrichment)>> = Vec::new();
    let mut batch: Vec<NewBook> = Vec::new();

    while !pending.is_empty() || !inflight.is_empty() {
        while inflight.len() < concurrency {
            let Some(row) = pending.pop_front() else {
                break;
            };
            let client = client.clone();
            let sources = sources.clone();
            inflight.push(tokio::spawn(async move {
                let enrichment = client.fetch_details(&row, &sources).await;
                (row, enrichment)
            }));
        }
        if inflight.is_empty() {
            break;
        }

        let mut completed_any = false;
        let mut i = 0;
        while i < inflight.len() {
            if inflight[i].is_finished() {
                completed_any = true;
                let handle = inflight.swap_remove(i);
                let (row, enrichment) = handle.await?;
                report.processed += 1;
                match enrichment.description {
                    Some(description) => batch.push(NewBook {
                        isbn: row.isbn,
                        title: enrichment.title.unwrap_or(row.title),
                        description: Some(description),
                        author: row.author,
                        cover_image: enrichment.cover,
                        publish_year: row.year,
                    }),
                    None => report.without_description += 1,
                }
                if batch.len() >= INSERT_BATCH {
                    report.inserted += store.insert_books(&batch)?;
                    batch.clear();
                    tracing::info!(
                        inserted = report.inserted,
                        processed = report.processed,
                        "batch committed"
                    );
                }
            } else {
                i += 1;
            }
        }
        if !completed_any {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    if !batch.is_empty() {
        report.inserted += store.insert_books(&batch)?;
    }
    tracing::info!(
        processed = report.processed,
        inserted = report.inserted,
        without_description = report.without_description,
        "enrichment finished"
    );
    Ok(report)
}

/// Counts reported by a re-enrichment pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshReport {
    /// Rows selected because their description is missing or a placeholder.
    pub scanned: usize,
    /// Rows that gained a real description.
    pub refreshed: usize,
    /// Rows where every source came up empty again.
    pub still_missing: usize,
}

/// Retry the metadata sources for up to `limit` records whose description
/// is still missing or a placeholder, updating matches in place. Rows where
/// every source comes up empty are stamped with the terminal placeholder,
/// which the listing and the vectorizer both ignore.
pub async fn refresh(
    store: &BookStore,
    sources: &[Source],
    concurrency: usize,
    limit: usize,
) -> Result<RefreshReport> {
    let books = store.fetch_undescribed(limit)?;
    let mut report = RefreshReport {
        scanned: books.len(),
        ..RefreshReport::default()
    };
    tracing::info!(to_refresh = report.scanned, concurrency, "re-enrichment starting");

    let client = MetadataClient::new()?;
    let sources = Arc::new(sources.to_vec());
    let concurrency = concurrency.max(1);

    let mut pending: VecDeque<Book> = books.into();
    let mut inflight: Vec<JoinHandle<(i64, Enrichment)>> = Vec::new();
    while !pending.is_empty() || !inflight.is_empty() {
        while inflight.len() < concurrency {
            let Some(book) = pending.pop_front() else {
                break;
            };
            let client = client.clone();
            let sources = sources.clone();
            inflight.push(tokio::spawn(async move {
                let row = RawRow {
                    isbn: book.isbn.clone(),
                    title: book.title.clone(),
                    author: book.author.clone(),
                    year: book.publish_year,
                };
                let enrichment = client.fetch_details(&row, &sources).await;
                (book.id, enrichment)
            }));
        }
        if inflight.is_empty() {
            break;
        }

        let mut completed_any = false;
        let mut i = 0;
        while i < inflight.len() {
            if inflight[i].is_finished() {
                completed_any = true;
                let handle = inflight.swap_remove(i);
                let (id, enrichment) = handle.await?;
                if apply_refresh(store, id, enrichment)? {
                    report.refreshed += 1;
                } else {
                    report.still_missing += 1;
                }
            } else {
                i += 1;
            }
        }
        if !completed_any {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
    tracing::info!(
        refreshed = report.refreshed,
        still_missing = report.still_missing,
        "re-enrichment finished"
    );
    Ok(report)
}

/// Write one fetch outcome back to the catalog. A cover can arrive without
/// a description and is kept either way; a full miss stamps the terminal
/// placeholder. Returns whether a real description landed.
fn apply_refresh(store: &BookStore, id: i64, enrichment: Enrichment) -> Result<bool> {
    match enrichment.description {
        Some(description) => {
            store.update_enrichment(id, &description, enrichment.cover.as_deref())?;
            Ok(true)
        }
        None => {
            store.update_enrichment(id, NO_DESCRIPTION, enrichment.cover.as_deref())?;
            Ok(false)
        }
    }
}

/// Insert a single known record into an empty catalog so the API can be
/// exercised without a full ingest. Returns whether anything was inserted.
pub fn seed(store: &BookStore) -> Result<bool> {
    if store.count_books()? > 0 {
        return Ok(false);
    }
    store.insert_book(&NewBook {
        isbn: "1234567890".to_string(),
        title: "Test Book".to_string(),
        description: Some("This is a manually inserted test book to verify the API.".to_string()),
        author: Some("Test Author".to_string()),
        cover_image: None,
        publish_year: Some(2025),
    })?;
    Ok(true)
}
