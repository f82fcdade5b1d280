//! Session persistence and the in-memory session store.
//!
//! This crate provides:
//! - [`SessionStorageBackend`] — the minimal get/set/remove capability the
//!   host environment supplies for durable session storage
//! - [`MemoryStorage`] and [`FileStorage`] — built-in backends
//! - [`SessionStore`] — the authoritative in-process copy of the current
//!   session, with a generation counter and synchronous change
//!   notification
//!
//! The store owns the session; every other component reads through it and
//! replaces it wholesale, never field by field.

mod backend;
mod store;

pub use backend::{FileStorage, MemoryStorage, SessionStorageBackend, SESSION_KEY};
pub use store::{CommitOrigin, SessionStore, SubscriptionHandle};

use thiserror::Error;

/// Error type for storage backend operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific failure (disk full, quota exceeded, ...).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// IO error from a file-based backend.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted value could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error returned when a conditional store commit loses a race.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("stale generation: expected {expected}, store is at {current}")]
pub struct StaleGeneration {
    /// Generation the writer observed when it started its work.
    pub expected: u64,
    /// Generation the store had actually advanced to.
    pub current: u64,
}
