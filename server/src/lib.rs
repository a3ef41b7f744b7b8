//! Embedded TouchDB server and its in-process REST transport.
//!
//! # Overview
//! A [`Server`] owns a set of named databases. The [`router`] maps
//! CouchDB-style REST requests onto them. Callers reach it either over TCP
//! ([`run`]) or in-process: open a [`Transport`] on a `touchdb:` URL, build
//! the request, and [`Transport::dispatch`] it through a [`Router`]. Both
//! paths produce the same statuses and JSON bodies.
//!
//! ```no_run
//! use std::sync::Arc;
//! use touchdb_core::HttpMethod;
//! use touchdb_server::{Router, Server, Transport};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let router = Router::new(Arc::new(Server::in_memory()))?;
//! let response = Transport::open("touchdb:///touchdb-test")?
//!     .method(HttpMethod::Put)
//!     .dispatch(&router);
//! assert_eq!(response.status(), 201);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod harness;
pub mod router;
pub mod scheme;
pub mod store;
pub mod telemetry;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;

pub use error::{StoreError, TransportError};
pub use router::{app, Router};
pub use store::{Database, DatabaseInfo, Revision, Server};
pub use transport::Transport;

/// Serves `server` over HTTP on `listener` until the process exits.
pub async fn run(listener: TcpListener, server: Arc<Server>) -> Result<(), std::io::Error> {
    axum::serve(listener, app(server)).await
}
