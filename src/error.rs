//! Error types for the external collaborators deckhand talks to.

use thiserror::Error;

/// Errors from the distributed store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The requested watch index has been compacted away; the watcher has
    /// to resynchronise from a fresh snapshot.
    #[error("watch index cleared, store is at index {0}")]
    IndexCleared(u64),

    #[error("store error {code}: {message}")]
    Api { code: u64, message: String },

    #[error("no store endpoint reachable (tried {0})")]
    Unavailable(usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the proxy control plane.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("control plane returned {status} for {path}: {body}")]
    Api {
        status: u16,
        path: String,
        body: String,
    },

    #[error("invalid control plane url: {0}")]
    InvalidUrl(String),
}

/// Errors from the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("event channel closed")]
    ChannelClosed,
}
