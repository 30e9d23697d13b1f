use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::book::Book;
use crate::error::EngineError;
use crate::index::Snapshot;
use crate::store::CorpusSource;

/// Counts reported by a successful rebuild.
#[derive(Debug, Clone, Copy)]
pub struct RebuildSummary {
    pub books: usize,
    pub terms: usize,
}

/// Content-based recommendation engine over the catalog.
///
/// Owns the currently installed [`Snapshot`] behind an `RwLock`ed `Arc`:
/// queries clone the `Arc` and run against a consistent corpus while a
/// rebuild installs its replacement with a single pointer swap. The engine
/// never polls the store; callers trigger [`rebuild`](Recommender::rebuild)
/// after bulk ingestion or on manual reload.
pub struct Recommender {
    source: Arc<dyn CorpusSource>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    build_lock: Mutex<()>,
}

impl Recommender {
    pub fn new(source: Arc<dyn CorpusSource>) -> Recommender {
        Recommender {
            source,
            snapshot: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    /// The currently installed snapshot, if any rebuild has succeeded yet.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().clone()
    }

    /// Refetch the corpus, refit the vocabulary and vectors, and install the
    /// result. Single-writer: concurrent triggers serialize, and each call
    /// returns only once a freshly built snapshot is installed. A failed
    /// store read leaves the previous snapshot serving untouched.
    pub fn rebuild(&self) -> Result<RebuildSummary, EngineError> {
        let _guard = self.build_lock.lock();
        let books = self
            .source
            .fetch_all()
            .map_err(EngineError::DataUnavailable)?;
        let snapshot = Snapshot::build(books);
        let summary = RebuildSummary {
            books: snapshot.len(),
            terms: snapshot.num_terms(),
        };
        *self.snapshot.write() = Some(Arc::new(snapshot));
        tracing::info!(
            books = summary.books,
            terms = summary.terms,
            "snapshot installed"
        );
        Ok(summary)
    }

    /// Free-text mood/problem query. Blank queries and queries with no
    /// in-vocabulary terms yield an empty result. If no snapshot has ever
    /// been installed, a synchronous rebuild is attempted first; failure is
    /// logged and degrades to an empty result rather than an error.
    pub fn recommend(&self, query_text: &str, top_n: usize) -> Vec<(Book, f32)> {
        let snapshot = match self.current() {
            Some(s) => s,
            None => {
                if let Err(err) = self.rebuild() {
                    tracing::warn!(error = %err, "rebuild before first query failed");
                }
                match self.current() {
                    Some(s) => s,
                    None => return Vec::new(),
                }
            }
        };
        snapshot.recommend(query_text, top_n)
    }

    /// Nearest neighbors of a known record. An isbn absent from the current
    /// snapshot (for instance inserted after the last rebuild) yields an
    /// empty result, not an error.
    pub fn similar_to(&self, isbn: &str, top_n: usize) -> Vec<(Book, f32)> {
        match self.current() {
            Some(s) => s.similar_to(isbn, top_n),
            None => Vec::new(),
        }
    }

    /// Case-insensitive author substring filter in corpus order, optionally
    /// excluding one isbn.
    pub fn books_by_author(
        &self,
        author_name: &str,
        skip_isbn: Option<&str>,
        top_n: usize,
    ) -> Vec<Book> {
        match self.current() {
            Some(s) => s.books_by_author(author_name, skip_isbn, top_n),
            None => Vec::new(),
        }
    }
}
