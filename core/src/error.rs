//! Error types shared by the dispatch layer and the remote fixture client.
//!
//! # Design
//! `NotFound` gets a dedicated variant in `ApiError` because fixture code
//! routinely treats "the database is already gone" as success. Every other
//! unexpected status lands in `HttpError` with the raw status and body.

use thiserror::Error;

/// Errors returned when interpreting a response from a remote server.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server returned 404.
    #[error("resource not found")]
    NotFound,

    /// The server returned a status the caller did not accept.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The endpoint could not be turned into a request URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Errors from the JSON codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The bytes were not valid JSON (or not the expected shape).
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// A value could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Errors from parsing a request path into a resource path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// A segment between two slashes was empty (`/db//doc`).
    #[error("empty path segment at position {0}")]
    EmptySegment(usize),

    /// A segment did not decode to UTF-8.
    #[error("path segment is not valid UTF-8: {0}")]
    InvalidEncoding(String),

    /// The path names a sub-resource that does not exist.
    #[error("unsupported resource path: {0}")]
    Unsupported(String),
}
