//! Test fixture: a throwaway server plus request helpers.
//!
//! Each [`TouchDbFixture`] owns a fresh server directory under a temp dir
//! and an empty [`DEFAULT_TEST_DB`]. Requests go through the real
//! [`Transport`] and [`Router`], so tests exercise the same path application
//! code does. Remote cleanup uses plain HTTP via `ureq`.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use touchdb_core::config::ConfigError;
use touchdb_core::{
    codec, ApiError, CodecError, HttpMethod, HttpResponse, Properties, ReplicationConfig,
    ReplicationEndpoint, SCHEME,
};
use tracing::{debug, error};
use url::Url;

use crate::error::{StoreError, TransportError};
use crate::router::Router;
use crate::store::{Database, Server};
use crate::transport::Transport;

pub const DEFAULT_TEST_DB: &str = "touchdb-test";

/// Failures of fixture setup or of an expectation in a helper.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("failed to create server directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("{method} {path}: expected status {expected}, got {actual}: {body}")]
    UnexpectedStatus {
        method: HttpMethod,
        path: String,
        expected: u16,
        actual: u16,
        body: String,
    },

    #[error("{method} {path}: expected body {expected}, got {actual}")]
    UnexpectedBody {
        method: HttpMethod,
        path: String,
        expected: Value,
        actual: Value,
    },
}

/// A started server with an empty default database.
pub struct TouchDbFixture {
    router: Router,
    database: Arc<Database>,
    replication: ReplicationConfig,
    // Dropped last: removes the server directory.
    _dir: TempDir,
}

impl TouchDbFixture {
    /// Starts a server in a new temp dir, reading replication settings from
    /// the current directory and environment.
    pub fn start() -> Result<Self, FixtureError> {
        let replication = ReplicationConfig::load(Path::new("."))?;
        Self::start_with(replication)
    }

    pub fn start_with(replication: ReplicationConfig) -> Result<Self, FixtureError> {
        let dir = tempfile::tempdir()?;
        let server = Arc::new(Server::open(dir.path().join("touchdb"))?);
        let database = server.ensure_empty_database(DEFAULT_TEST_DB)?;
        Ok(Self {
            router: Router::new(server)?,
            database,
            replication,
            _dir: dir,
        })
    }

    pub fn server(&self) -> &Arc<Server> {
        self.router.server()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Handle to [`DEFAULT_TEST_DB`] as created at start.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn ensure_empty_database(&self, name: &str) -> Result<Arc<Database>, StoreError> {
        self.server().ensure_empty_database(name)
    }

    /// Sends `method path` (path starts with `/`) with optional headers and
    /// JSON body, returning the raw response.
    pub fn send_request(
        &self,
        method: HttpMethod,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<HttpResponse, FixtureError> {
        let mut transport = Transport::open(&format!("{SCHEME}://{path}"))?.method(method);
        for (name, value) in headers {
            transport = transport.header(name, value);
        }
        if let Some(body) = body {
            transport = transport.json_body(body)?;
        }
        Ok(transport.dispatch(&self.router))
    }

    /// Sends a request and checks the status, and the body when `expected`
    /// is given. Returns the parsed body.
    pub fn send_body(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
        expected_status: u16,
        expected: Option<&Value>,
    ) -> Result<Option<Value>, FixtureError> {
        let response = self.send_request(method, path, &[], body)?;
        debug!(%method, path, status = response.status(), "fixture request");

        if response.status() != expected_status {
            return Err(FixtureError::UnexpectedStatus {
                method,
                path: path.to_string(),
                expected: expected_status,
                actual: response.status(),
                body: String::from_utf8_lossy(response.body()).into_owned(),
            });
        }
        let result = parse_json_response(&response)?;
        if let Some(expected) = expected {
            let actual = result.clone().unwrap_or(Value::Null);
            if &actual != expected {
                return Err(FixtureError::UnexpectedBody {
                    method,
                    path: path.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(result)
    }

    pub fn send(
        &self,
        method: HttpMethod,
        path: &str,
        expected_status: u16,
        expected: Option<&Value>,
    ) -> Result<Option<Value>, FixtureError> {
        self.send_body(method, path, None, expected_status, expected)
    }

    pub fn replication_endpoint(&self) -> Option<ReplicationEndpoint> {
        self.replication.endpoint()
    }

    pub fn replication_url(&self) -> Option<Result<Url, ApiError>> {
        self.replication_endpoint().map(|ep| ep.url())
    }

    pub fn replication_url_without_credentials(&self) -> Option<Result<Url, ApiError>> {
        self.replication_endpoint().map(|ep| ep.url_without_credentials())
    }
}

/// Body as JSON; `None` when the response has no body.
pub fn parse_json_response(response: &HttpResponse) -> Result<Option<Value>, CodecError> {
    if response.body().is_empty() {
        return Ok(None);
    }
    codec::decode(response.body()).map(Some)
}

/// Fields of `properties` visible to application code.
pub fn user_properties(properties: &Properties) -> Properties {
    touchdb_core::user_properties(properties)
}

/// Deletes a database on a real remote server.
///
/// A status of 300 or above other than 404 is an error. Connection failures
/// are logged and swallowed, since the remote may simply not be running.
pub fn delete_remote_db(endpoint: &ReplicationEndpoint) -> Result<(), ApiError> {
    let request = endpoint.build_delete_database()?;
    debug!(url = %request.path, "deleting remote database");

    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent();
    let mut call = agent.delete(&request.path);
    for (name, value) in &request.headers {
        call = call.header(name, value);
    }

    let mut response = match call.call() {
        Ok(response) => response,
        Err(e) => {
            error!(url = %request.path, error = %e, "failed to delete remote database");
            return Ok(());
        }
    };
    let status = response.status().as_u16();
    let body = response.body_mut().read_to_vec().unwrap_or_default();
    endpoint.parse_delete_database(HttpResponse {
        status,
        headers: Vec::new(),
        body,
    })
}
