//! Error types for the embedded store and the local transport.
//!
//! Store errors are protocol-level: the router translates each variant into
//! a status code and a JSON error body, so none of them ever reaches a
//! transport caller as an `Err`. Transport errors are the opposite: they mean
//! no endpoint could be resolved, and dispatch never starts.

use std::io;

use thiserror::Error;

/// Failures of a database or registry operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database name is not valid: {0}")]
    InvalidName(String),

    #[error("database already exists: {0}")]
    AlreadyExists(String),

    #[error("no such database: {0}")]
    NoSuchDatabase(String),

    /// The handle outlived a delete of its database.
    #[error("database was deleted: {0}")]
    Deleted(String),

    #[error("document not found: {0}")]
    Missing(String),

    /// The document exists only as a tombstone.
    #[error("document deleted: {0}")]
    DocumentDeleted(String),

    #[error("document update conflict: {0}")]
    Conflict(String),

    #[error("storage io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt database file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// A lock holder panicked mid-write.
    #[error("database lock poisoned: {0}")]
    Poisoned(String),
}

/// Failures that prevent a request from reaching the router at all.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed endpoint {url}: {reason}")]
    MalformedEndpoint { url: String, reason: String },

    #[error("scheme not registered: {0}")]
    UnregisteredScheme(String),

    #[error("router runtime failed: {0}")]
    Runtime(String),
}
