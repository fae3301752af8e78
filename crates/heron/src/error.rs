//
// error.rs
//
// Error types shared by the analysis core
//

use url::Url;

/// Errors surfaced by the analysis core.
///
/// Stale edits, per-file analysis failures and classpath resolution failures
/// are recovered where they happen and only logged; the variants here are what
/// is left for callers to see.
#[derive(Debug, thiserror::Error)]
pub enum HeronError {
    #[error("Unknown file: {0}")]
    UnknownFile(Url),

    #[error("Analyzer is not ready (no workspace has been initialized)")]
    AnalyzerNotReady,

    #[error("Could not instantiate analyzer: {0}")]
    AnalyzerInit(String),

    #[error("Analysis of {uri} failed: {message}")]
    Analysis { uri: Url, message: String },

    #[error("Worker '{0}' has shut down")]
    WorkerGone(&'static str),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type HeronResult<T> = Result<T, HeronError>;
