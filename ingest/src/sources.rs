use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::sleep;

use crate::csv::RawRow;

const GOOGLE_BOOKS_URL: &str = "https://www.googleapis.com/books/v1/volumes";
const OPENLIBRARY_BOOKS_URL: &str = "https://openlibrary.org/api/books";
const OPENLIBRARY_SEARCH_URL: &str = "https://openlibrary.org/search.json";
const OPENLIBRARY_BASE_URL: &str = "https://openlibrary.org";
const COVERS_BASE_URL: &str = "https://covers.openlibrary.org/b/id";

const USER_AGENT: &str = "shelfmate-ingest/0.1 (+https://example.com/shelfmate)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RETRIES: u32 = 2;
const SEARCH_RESULTS: usize = 3;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"<[^>]*>").expect("valid regex");
    static ref WS_RE: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// One step of the enrichment fallback chain. The order the chain is walked
/// in is caller configuration, not hardcoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    GoogleIsbn,
    OpenLibraryIsbn,
    GoogleTitleAuthor,
    GoogleTitle,
    OpenLibraryTitle,
}

impl Source {
    /// The default chain: exact isbn lookups first, then progressively
    /// broader title searches.
    pub fn default_order() -> Vec<Source> {
        vec![
            Source::GoogleIsbn,
            Source::OpenLibraryIsbn,
            Source::GoogleTitleAuthor,
            Source::GoogleTitle,
            Source::OpenLibraryTitle,
        ]
    }

    fn needs_isbn(self) -> bool {
        matches!(self, Source::GoogleIsbn | Source::OpenLibraryIsbn)
    }

    fn name(self) -> &'static str {
        match self {
            Source::GoogleIsbn => "google-isbn",
            Source::OpenLibraryIsbn => "openlibrary-isbn",
            Source::GoogleTitleAuthor => "google-title-author",
            Source::GoogleTitle => "google-title",
            Source::OpenLibraryTitle => "openlibrary-title",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Source> {
        match s.trim() {
            "google-isbn" => Ok(Source::GoogleIsbn),
            "openlibrary-isbn" => Ok(Source::OpenLibraryIsbn),
            "google-title-author" => Ok(Source::GoogleTitleAuthor),
            "google-title" => Ok(Source::GoogleTitle),
            "openlibrary-title" => Ok(Source::OpenLibraryTitle),
            other => bail!("unknown metadata source: {other}"),
        }
    }
}

/// Parse a comma-separated source list, e.g. `google-isbn,openlibrary-title`.
pub fn parse_sources(spec: &str) -> Result<Vec<Source>> {
    spec.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Metadata found for one row. Merging keeps the first value seen per
/// field, so a cover found by an early source survives even when the
/// description arrives from a later one.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Enrichment {
    pub description: Option<String>,
    pub title: Option<String>,
    pub cover: Option<String>,
}

impl Enrichment {
    fn absorb(&mut self, other: Enrichment) {
        self.description = self.description.take().or(other.description);
        self.title = self.title.take().or(other.title);
        self.cover = self.cover.take().or(other.cover);
    }
}

/// Normalize a description payload. Open Library sometimes wraps the text
/// as `{"value": "..."}`. Tags are stripped, common entities unescaped,
/// whitespace collapsed; cleaned text of 20 characters or fewer is rejected
/// as boilerplate.
pub fn clean_description(raw: &Value) -> Option<String> {
    let text = match raw {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("value")?.as_str()?,
        _ => return None,
    };
    let stripped = TAG_RE.replace_all(text, "");
    let unescaped = stripped
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    let collapsed = WS_RE.replace_all(&unescaped, " ").trim().to_string();
    if collapsed.chars().count() > 20 {
        Some(collapsed)
    } else {
        None
    }
}

fn title_author_query(row: &RawRow) -> String {
    match row.author.as_deref() {
        Some(author) => {
            // multi-author cells are "Surname, A.; Other, B.", lead name only
            let lead = author.split(',').next().unwrap_or(author).trim();
            format!("intitle:{} inauthor:{}", row.title, lead)
        }
        None => format!("intitle:{}", row.title),
    }
}

fn scan_google_items(data: &Value) -> Enrichment {
    let mut enrichment = Enrichment::default();
    let Some(items) = data.get("items").and_then(Value::as_array) else {
        return enrichment;
    };
    for item in items {
        let Some(info) = item.get("volumeInfo") else {
            continue;
        };
        let Some(description) = info.get("description").and_then(clean_description) else {
            continue;
        };
        enrichment.description = Some(description);
        enrichment.title = info.get("title").and_then(Value::as_str).map(str::to_string);
        enrichment.cover = info
            .pointer("/imageLinks/thumbnail")
            .and_then(Value::as_str)
            .map(str::to_string);
        break;
    }
    enrichment
}

fn parse_edition_record(data: &Value, bibkey: &str) -> (Enrichment, Option<String>) {
    let mut enrichment = Enrichment::default();
    let Some(details) = data.get(bibkey).and_then(|record| record.get("details")) else {
        return (enrichment, None);
    };
    enrichment.description = details.get("description").and_then(clean_description);
    if let Some(cover_id) = details.pointer("/covers/0").and_then(Value::as_i64) {
        enrichment.cover = Some(format!("{COVERS_BASE_URL}/{cover_id}-M.jpg"));
    }
    let work_key = details
        .pointer("/works/0/key")
        .and_then(Value::as_str)
        .map(str::to_string);
    (enrichment, work_key)
}

fn search_work_keys(data: &Value) -> Vec<String> {
    data.get("docs")
        .and_then(Value::as_array)
        .map(|docs| {
            docs.iter()
                .filter_map(|doc| doc.get("key").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// HTTP client for the metadata sources.
#[derive(Clone)]
pub struct MetadataClient {
    client: Client,
}

impl MetadataClient {
    pub fn new() -> Result<MetadataClient> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(MetadataClient { client })
    }

    /// Walk the source chain for one row, stopping at the first description.
    pub async fn fetch_details(&self, row: &RawRow, sources: &[Source]) -> Enrichment {
        let mut merged = Enrichment::default();
        for &source in sources {
            if source.needs_isbn() && row.isbn.is_empty() {
                continue;
            }
            let found = match source {
                Source::GoogleIsbn => self.google_query(&format!("isbn:{}", row.isbn)).await,
                Source::OpenLibraryIsbn => self.openlibrary_isbn(&row.isbn).await,
                Source::GoogleTitleAuthor => self.google_query(&title_author_query(row)).await,
                Source::GoogleTitle => self.google_query(&row.title).await,
                Source::OpenLibraryTitle => self.openlibrary_title(&row.title).await,
            };
            merged.absorb(found);
            if merged.description.is_some() {
                tracing::debug!(isbn = %row.isbn, %source, "description found");
                break;
            }
        }
        merged
    }

    async fn google_query(&self, query: &str) -> Enrichment {
        let max_results = SEARCH_RESULTS.to_string();
        match self
            .get_json(GOOGLE_BOOKS_URL, &[("q", query), ("maxResults", &max_results)])
            .await
        {
            Some(data) => scan_google_items(&data),
            None => Enrichment::default(),
        }
    }

    async fn openlibrary_isbn(&self, isbn: &str) -> Enrichment {
        let bibkey = format!("ISBN:{isbn}");
        let Some(data) = self
            .get_json(
                OPENLIBRARY_BOOKS_URL,
                &[("bibkeys", bibkey.as_str()), ("jscmd", "details"), ("format", "json")],
            )
            .await
        else {
            return Enrichment::default();
        };
        let (mut enrichment, work_key) = parse_edition_record(&data, &bibkey);
        // editions often lack a description that the parent work carries
        if enrichment.description.is_none() {
            if let Some(key) = work_key {
                enrichment.description = self.work_description(&key).await;
            }
        }
        enrichment
    }

    async fn openlibrary_title(&self, title: &str) -> Enrichment {
        let limit = SEARCH_RESULTS.to_string();
        let Some(data) = self
            .get_json(OPENLIBRARY_SEARCH_URL, &[("title", title), ("limit", &limit)])
            .await
        else {
            return Enrichment::default();
        };
        for key in search_work_keys(&data) {
            if let Some(description) = self.work_description(&key).await {
                return Enrichment {
                    description: Some(description),
                    ..Enrichment::default()
                };
            }
        }
        Enrichment::default()
    }

    async fn work_description(&self, work_key: &str) -> Option<String> {
        let url = format!("{OPENLIBRARY_BASE_URL}{work_key}.json");
        let data = self.get_json(&url, &[]).await?;
        data.get("description").and_then(clean_description)
    }

    /// GET with bounded retries: rate limits back off progressively,
    /// transport errors wait a beat, other failures give up on the source.
    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Option<Value> {
        for attempt in 0..=RETRIES {
            match self.client.get(url).query(query).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => return resp.json().await.ok(),
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    sleep(Duration::from_secs(2 * (attempt as u64 + 1))).await;
                }
                Ok(resp) => {
                    tracing::debug!(%url, status = %resp.status(), "source request failed");
                    return None;
                }
                Err(err) => {
                    tracing::debug!(%url, error = %err, "source request error");
                    if attempt < RETRIES {
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(isbn: &str, title: &str, author: Option<&str>) -> RawRow {
        RawRow {
            isbn: isbn.to_string(),
            title: title.to_string(),
            author: author.map(str::to_string),
            year: None,
        }
    }

    #[test]
    fn parses_source_lists() {
        let sources = parse_sources("google-isbn, openlibrary-title").unwrap();
        assert_eq!(sources, vec![Source::GoogleIsbn, Source::OpenLibraryTitle]);
        assert!(parse_sources("google-isbn,bogus").is_err());
        assert_eq!(parse_sources("").unwrap(), Vec::new());
    }

    #[test]
    fn default_order_starts_with_exact_lookups() {
        let order = Source::default_order();
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], Source::GoogleIsbn);
        assert_eq!(order[1], Source::OpenLibraryIsbn);
    }

    #[test]
    fn description_cleaning_strips_markup() {
        let raw = json!("<p>A  long&amp; winding\n tale of &quot;agents&quot; and intrigue</p>");
        assert_eq!(
            clean_description(&raw).unwrap(),
            "A long& winding tale of \"agents\" and intrigue"
        );
    }

    #[test]
    fn description_cleaning_rejects_short_text() {
        assert_eq!(clean_description(&json!("<b>Too short.</b>")), None);
        assert_eq!(clean_description(&json!(42)), None);
    }

    #[test]
    fn description_cleaning_unwraps_value_objects() {
        let raw = json!({"value": "A description inside the wrapper object", "type": "/type/text"});
        assert_eq!(
            clean_description(&raw).unwrap(),
            "A description inside the wrapper object"
        );
    }

    #[test]
    fn google_scan_takes_first_described_item() {
        let data = json!({"items": [
            {"volumeInfo": {"title": "No Description Here"}},
            {"volumeInfo": {
                "title": "The Right One",
                "description": "A description comfortably longer than the threshold",
                "imageLinks": {"thumbnail": "http://img/cover.jpg"}
            }}
        ]});
        let enrichment = scan_google_items(&data);
        assert_eq!(enrichment.title.as_deref(), Some("The Right One"));
        assert_eq!(enrichment.cover.as_deref(), Some("http://img/cover.jpg"));
        assert!(enrichment.description.is_some());
    }

    #[test]
    fn google_scan_handles_empty_payload() {
        assert_eq!(scan_google_items(&json!({})), Enrichment::default());
        assert_eq!(scan_google_items(&json!({"items": []})), Enrichment::default());
    }

    #[test]
    fn edition_record_reads_details() {
        let data = json!({"ISBN:0441013597": {"details": {
            "description": "Paul Atreides and the spice that shapes an empire",
            "covers": [240727],
            "works": [{"key": "/works/OL893415W"}]
        }}});
        let (enrichment, work_key) = parse_edition_record(&data, "ISBN:0441013597");
        assert!(enrichment.description.is_some());
        assert_eq!(
            enrichment.cover.as_deref(),
            Some("https://covers.openlibrary.org/b/id/240727-M.jpg")
        );
        assert_eq!(work_key.as_deref(), Some("/works/OL893415W"));
    }

    #[test]
    fn edition_record_tolerates_unknown_isbn() {
        let (enrichment, work_key) = parse_edition_record(&json!({}), "ISBN:0000000000");
        assert_eq!(enrichment, Enrichment::default());
        assert_eq!(work_key, None);
    }

    #[test]
    fn search_payload_yields_work_keys() {
        let data = json!({"docs": [
            {"key": "/works/OL1W", "title": "First"},
            {"title": "keyless doc"},
            {"key": "/works/OL2W"}
        ]});
        assert_eq!(search_work_keys(&data), vec!["/works/OL1W", "/works/OL2W"]);
    }

    #[test]
    fn title_author_query_uses_lead_author() {
        let q = title_author_query(&row("1", "Dune", Some("Herbert, Frank; Other, A.")));
        assert_eq!(q, "intitle:Dune inauthor:Herbert");
        let bare = title_author_query(&row("1", "Dune", None));
        assert_eq!(bare, "intitle:Dune");
    }

    #[test]
    fn absorb_keeps_first_value_per_field() {
        let mut merged = Enrichment {
            cover: Some("early-cover".to_string()),
            ..Enrichment::default()
        };
        merged.absorb(Enrichment {
            description: Some("late description".to_string()),
            cover: Some("late-cover".to_string()),
            title: Some("late title".to_string()),
        });
        assert_eq!(merged.cover.as_deref(), Some("early-cover"));
        assert_eq!(merged.description.as_deref(), Some("late description"));
        assert_eq!(merged.title.as_deref(), Some("late title"));
    }
}
