use thiserror::Error;

/// Failures surfaced by the refresh lifecycle.
///
/// Query operations never return errors: an isbn missing from the snapshot
/// or a blank query degrades to an empty result instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The catalog store could not be read during a rebuild. The previously
    /// installed snapshot, if any, keeps serving.
    #[error("catalog store unavailable: {0}")]
    DataUnavailable(#[source] anyhow::Error),
}
