use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use engine::{Book, BookStore, Recommender};
use ingest::IngestConfig;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const RECOMMEND_LIMIT: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Recommender>,
    pub store: BookStore,
    pub ingest: IngestConfig,
}

#[derive(Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_page_limit")]
    pub limit: u32,
}
fn default_page_limit() -> u32 {
    100
}

#[derive(Deserialize)]
pub struct RelatedParams {
    #[serde(default = "default_related_limit")]
    pub limit: usize,
}
fn default_related_limit() -> usize {
    5
}

#[derive(Deserialize)]
pub struct AuthorParams {
    pub skip_isbn: Option<String>,
    #[serde(default = "default_related_limit")]
    pub limit: usize,
}

#[derive(Deserialize)]
pub struct SyncParams {
    #[serde(default = "default_sync_limit")]
    pub limit: usize,
}
fn default_sync_limit() -> usize {
    100
}

#[derive(Deserialize)]
pub struct RecommendRequest {
    pub mood: String,
}

#[derive(Serialize)]
pub struct RecommendHit {
    #[serde(flatten)]
    pub book: Book,
    pub match_score: f32,
}

#[derive(Serialize)]
pub struct ReloadResponse {
    pub status: &'static str,
    pub books: usize,
    pub terms: usize,
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/books", get(list_books))
        .route("/books/:isbn", get(get_book))
        .route("/recommend", post(recommend))
        .route("/books/:isbn/similar", get(similar_books))
        .route("/books/author/:name", get(books_by_author))
        .route("/reload", post(reload))
        .route("/sync", post(sync))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn list_books(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<Book>>, (StatusCode, String)> {
    let books = state
        .store
        .list_books(params.skip, params.limit)
        .map_err(internal)?;
    Ok(Json(books))
}

async fn get_book(
    State(state): State<AppState>,
    Path(isbn): Path<String>,
) -> Result<Json<Book>, (StatusCode, String)> {
    match state.store.fetch_book_by_isbn(&isbn).map_err(internal)? {
        Some(book) => Ok(Json(book)),
        None => Err((StatusCode::NOT_FOUND, "Book not found".to_string())),
    }
}

async fn recommend(
    State(state): State<AppState>,
    Json(request): Json<RecommendRequest>,
) -> Result<Json<Vec<RecommendHit>>, (StatusCode, String)> {
    // the first query may build the snapshot, which reads the store
    let engine = state.engine.clone();
    let hits =
        tokio::task::spawn_blocking(move || engine.recommend(&request.mood, RECOMMEND_LIMIT))
            .await
            .map_err(internal)?;
    let hits = hits
        .into_iter()
        .map(|(book, match_score)| RecommendHit { book, match_score })
        .collect();
    Ok(Json(hits))
}

async fn similar_books(
    State(state): State<AppState>,
    Path(isbn): Path<String>,
    Query(params): Query<RelatedParams>,
) -> Json<Vec<Book>> {
    let books = state
        .engine
        .similar_to(&isbn, params.limit)
        .into_iter()
        .map(|(book, _)| book)
        .collect();
    Json(books)
}

async fn books_by_author(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<AuthorParams>,
) -> Json<Vec<Book>> {
    Json(
        state
            .engine
            .books_by_author(&name, params.skip_isbn.as_deref(), params.limit),
    )
}

async fn reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>, (StatusCode, String)> {
    let engine = state.engine.clone();
    let summary = tokio::task::spawn_blocking(move || engine.rebuild())
        .await
        .map_err(internal)?
        .map_err(|err| (StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;
    Ok(Json(ReloadResponse {
        status: "reloaded",
        books: summary.books,
        terms: summary.terms,
    }))
}

async fn sync(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Json<serde_json::Value> {
    let limit = params.limit;
    tokio::spawn(async move {
        match ingest::run(&state.store, &state.ingest, limit).await {
            Ok(report) => {
                tracing::info!(
                    processed = report.processed,
                    inserted = report.inserted,
                    "background sync finished"
                );
                let engine = state.engine.clone();
                match tokio::task::spawn_blocking(move || engine.rebuild()).await {
                    Ok(Ok(summary)) => {
                        tracing::info!(books = summary.books, "post-sync rebuild complete")
                    }
                    Ok(Err(err)) => tracing::warn!(error = %err, "post-sync rebuild failed"),
                    Err(err) => tracing::warn!(error = %err, "post-sync rebuild panicked"),
                }
            }
            Err(err) => tracing::error!(error = %err, "background sync failed"),
        }
    });
    Json(serde_json::json!({ "status": "sync started", "limit": limit }))
}

fn internal<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
