pub mod book;
pub mod error;
pub mod index;
pub mod recommend;
pub mod store;
pub mod text;

pub use book::{Book, NewBook};
pub use error::EngineError;
pub use index::{Snapshot, TermId, MAX_FEATURES};
pub use recommend::{RebuildSummary, Recommender};
pub use store::{BookStore, CorpusSource};
