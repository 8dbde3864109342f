//! Error types shared by the engine and its collaborators.

use crate::synchronise::Phase;

/// Failure reported by a [`crate::contract::DocumentStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed the request.
    #[error("store request failed: {0}")]
    Backend(String),
    /// The backend answered with something we could not interpret.
    #[error("malformed store response: {0}")]
    Malformed(String),
}

/// Failure reported by a [`crate::contract::CatalogSource`] implementation.
///
/// Retries happen inside the transport; by the time one of these surfaces the
/// call is considered exhausted.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode upstream response: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A run aborted in `phase`; checkpoints of earlier phases stay valid.
#[derive(Debug, thiserror::Error)]
#[error("phase {phase} aborted: {error}")]
pub struct RunError {
    pub phase: Phase,
    #[source]
    pub error: SyncError,
}
