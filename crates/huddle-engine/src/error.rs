//! Error types for the media engine facade.

/// Errors a media engine can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// The engine refused the operation (bad parameters, double connect,
    /// unknown producer, ...).
    #[error("rejected by media engine: {0}")]
    Rejected(String),

    /// The router, transport or consumer was already closed.
    #[error("{0} is closed")]
    Closed(String),

    /// The media worker process is gone.
    #[error("media worker died")]
    WorkerDied,
}
