//! I/O-free core of the TouchDB local REST dispatch layer.
//!
//! # Overview
//! Everything here is plain data or pure functions: HTTP-shaped request and
//! response values, the JSON codec and its user-properties projection, the
//! typed resource path, and the remote endpoint used by test fixtures. The
//! `touchdb-server` crate executes requests; this crate only describes them.
//!
//! # Design
//! - `HttpRequest` / `HttpResponse` are shared by local dispatch and the
//!   remote fixture client, so assertions read the same either way.
//! - `ResourcePath` is an enum; routing is a `match` over it.
//! - `ReplicationEndpoint` splits remote cleanup into `build_*` and
//!   `parse_*`; the caller does the network round-trip.

pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod path;
pub mod remote;

pub use codec::{user_properties, Properties, RESERVED_PREFIX};
pub use config::ReplicationConfig;
pub use error::{ApiError, CodecError, PathError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use path::ResourcePath;
pub use remote::{Credentials, ReplicationEndpoint};

/// URL scheme that resolves to the in-process router.
pub const SCHEME: &str = "touchdb";
