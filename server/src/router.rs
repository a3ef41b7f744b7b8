//! Maps REST requests onto database operations.
//!
//! # Design
//! The HTTP surface is a single axum fallback handler: it parses the path
//! into a [`ResourcePath`] and `match`es on (resource, method). The same
//! `axum::Router` is served over TCP by the binary and driven in-process by
//! [`Router::dispatch`], so a local caller sees exactly the statuses and
//! bodies a remote client would.
//!
//! Every store failure becomes a status code plus a
//! `{"error": ..., "reason": ...}` body. Nothing here returns an `Err` to
//! the caller.

use std::convert::Infallible;
use std::sync::Arc;
use std::thread;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, ETAG, IF_MATCH};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use touchdb_core::codec::{self, decode_properties};
use touchdb_core::{HttpMethod, HttpRequest, HttpResponse, PathError, Properties, ResourcePath};
use tower::ServiceExt;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{StoreError, TransportError};
use crate::store::{Database, Revision, Server};

const MAX_UUIDS: usize = 1000;

/// Drives blocking dispatch for every `Router` in the process. Never
/// dropped, so routers may be dropped from async code.
static DISPATCH_RUNTIME: OnceCell<Runtime> = OnceCell::new();

fn dispatch_runtime() -> Result<&'static Runtime, TransportError> {
    DISPATCH_RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| TransportError::Runtime(e.to_string()))
    })
}

/// Builds the HTTP application over `server`.
pub fn app(server: Arc<Server>) -> axum::Router {
    axum::Router::new().fallback(handle).with_state(server)
}

/// Single-shot dispatcher bound to one server.
///
/// Holds no per-request state. `dispatch` blocks until the response is
/// complete; `dispatch_async` is the same operation for callers already on
/// an async runtime.
pub struct Router {
    server: Arc<Server>,
    app: axum::Router,
    runtime: &'static Runtime,
}

impl Router {
    pub fn new(server: Arc<Server>) -> Result<Self, TransportError> {
        Ok(Self {
            app: app(Arc::clone(&server)),
            server,
            runtime: dispatch_runtime()?,
        })
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Runs `request` to completion and returns its response.
    ///
    /// Callable from inside an async context too: the work then moves to a
    /// scoped helper thread, since a runtime cannot be blocked on from
    /// within another.
    pub fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        if tokio::runtime::Handle::try_current().is_err() {
            return self.runtime.block_on(self.dispatch_async(request));
        }
        thread::scope(|s| {
            s.spawn(|| self.runtime.block_on(self.dispatch_async(request)))
                .join()
                .unwrap_or_else(|_| {
                    plain_error(StatusCode::INTERNAL_SERVER_ERROR, "dispatch worker panicked")
                })
        })
    }

    pub async fn dispatch_async(&self, request: HttpRequest) -> HttpResponse {
        let mut builder = axum::http::Request::builder()
            .method(request.method.as_str())
            .uri(&request.path);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        let http_request = match builder.body(Body::from(request.body.unwrap_or_default())) {
            Ok(req) => req,
            Err(e) => return plain_error(StatusCode::BAD_REQUEST, &e.to_string()),
        };

        let response = self
            .app
            .clone()
            .oneshot(http_request)
            .await
            .unwrap_or_else(|never: Infallible| match never {});

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
            .collect();
        match response.into_body().collect().await {
            Ok(collected) => HttpResponse {
                status,
                headers,
                body: collected.to_bytes().to_vec(),
            },
            Err(e) => plain_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        }
    }
}

/// Why a request could not be served. Each variant maps to one status.
#[derive(Debug, thiserror::Error)]
enum RouteError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not allowed here")]
    MethodNotAllowed(String),
}

impl From<PathError> for RouteError {
    fn from(e: PathError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

/// A parsed request as the routing table sees it.
struct Call<'a> {
    method: HttpMethod,
    query: Vec<(String, String)>,
    headers: &'a HeaderMap,
    body: &'a [u8],
}

impl Call<'_> {
    fn query(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn flag(&self, key: &str) -> bool {
        self.query(key) == Some("true")
    }

    /// Base revision: `?rev=`, then `If-Match`, then the body's `_rev`.
    fn base_rev<'b>(&'b self, body: Option<&'b Properties>) -> Option<&'b str> {
        self.query("rev")
            .or_else(|| {
                self.headers
                    .get(IF_MATCH)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim_matches('"'))
            })
            .or_else(|| body.and_then(|b| b.get("_rev")).and_then(Value::as_str))
    }

    fn properties(&self) -> Result<Properties, RouteError> {
        decode_properties(self.body).map_err(|e| RouteError::BadRequest(e.to_string()))
    }
}

/// JSON outcome of a successful operation.
struct Reply {
    status: StatusCode,
    body: Value,
    etag: Option<String>,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            etag: None,
        }
    }

    fn created(body: Value) -> Self {
        Self {
            status: StatusCode::CREATED,
            body,
            etag: None,
        }
    }

    fn with_etag(mut self, rev: &str) -> Self {
        self.etag = Some(format!("\"{rev}\""));
        self
    }
}

async fn handle(
    State(server): State<Arc<Server>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let outcome = serve(&server, &method, &uri, &headers, &body);
    let reply = outcome.unwrap_or_else(|e| error_reply(&e));
    debug!(method = %method, path = %uri.path(), status = reply.status.as_u16(), "dispatched");

    let mut response = if method == Method::HEAD {
        reply.status.into_response()
    } else {
        match codec::encode(&reply.body) {
            Ok(bytes) => (reply.status, bytes).into_response(),
            Err(e) => {
                error!(error = %e, "failed to encode response body");
                let body = br#"{"error":"internal_error"}"#.to_vec();
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    };
    let response_headers = response.headers_mut();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(etag) = reply.etag.and_then(|tag| HeaderValue::from_str(&tag).ok()) {
        response_headers.insert(ETAG, etag);
    }
    response
}

fn serve(
    server: &Server,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Reply, RouteError> {
    let method: HttpMethod = method
        .as_str()
        .parse()
        .map_err(|_| RouteError::MethodNotAllowed(method.to_string()))?;
    let resource = ResourcePath::parse(uri.path())?;
    let call = Call {
        method,
        query: uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default(),
        headers,
        body,
    };
    route(server, &resource, &call)
}

fn route(server: &Server, resource: &ResourcePath, call: &Call<'_>) -> Result<Reply, RouteError> {
    use HttpMethod::{Delete, Get, Head, Post, Put};

    let method = match call.method {
        Head => Get,
        other => other,
    };

    match (resource, method) {
        (ResourcePath::Root, Get) => Ok(Reply::ok(json!({
            "couchdb": "Welcome",
            "TouchDB": "Welcome",
            "version": env!("CARGO_PKG_VERSION"),
        }))),
        (ResourcePath::AllDatabases, Get) => Ok(Reply::ok(json!(server.all_database_names()?))),
        (ResourcePath::Uuids, Get) => uuids(call),

        (ResourcePath::Database(name), Put) => {
            server.create_database(name)?;
            Ok(Reply::created(json!({"ok": true})))
        }
        (ResourcePath::Database(name), Get) => {
            let info = open(server, name)?.info()?;
            Ok(Reply::ok(json!(info)))
        }
        (ResourcePath::Database(name), Delete) => {
            server.delete_database(name)?;
            Ok(Reply::ok(json!({"ok": true})))
        }
        (ResourcePath::Database(name), Post) => {
            let db = open(server, name)?;
            let props = call.properties()?;
            let doc_id = props.get("_id").and_then(Value::as_str);
            let stored = db.put(doc_id, &props, call.base_rev(Some(&props)))?;
            Ok(Reply::created(write_result(&stored)).with_etag(&stored.rev))
        }

        (ResourcePath::AllDocs(name), Get) => {
            let db = open(server, name)?;
            all_docs(&db, call)
        }
        (ResourcePath::Changes(name), Get) => {
            let db = open(server, name)?;
            changes(&db, call)
        }

        (ResourcePath::Document { db, doc_id }, Get) => {
            let current = open(server, db)?.get(doc_id)?;
            Ok(Reply::ok(Value::Object(current.to_document())).with_etag(&current.rev))
        }
        (ResourcePath::Document { db, doc_id }, Put) => {
            let db = open(server, db)?;
            let props = call.properties()?;
            let base = call.base_rev(Some(&props));
            if props.get("_deleted") == Some(&Value::Bool(true)) {
                let tombstone = db.delete(doc_id, base)?;
                return Ok(Reply::ok(write_result(&tombstone)).with_etag(&tombstone.rev));
            }
            let stored = db.put(Some(doc_id), &props, base)?;
            Ok(Reply::created(write_result(&stored)).with_etag(&stored.rev))
        }
        (ResourcePath::Document { db, doc_id }, Delete) => {
            let tombstone = open(server, db)?.delete(doc_id, call.base_rev(None))?;
            Ok(Reply::ok(write_result(&tombstone)).with_etag(&tombstone.rev))
        }

        (_, method) => Err(RouteError::MethodNotAllowed(method.to_string())),
    }
}

fn open(server: &Server, name: &str) -> Result<Arc<Database>, StoreError> {
    server
        .database(name)?
        .ok_or_else(|| StoreError::NoSuchDatabase(name.to_string()))
}

fn write_result(revision: &Revision) -> Value {
    json!({"ok": true, "id": revision.id, "rev": revision.rev})
}

fn uuids(call: &Call<'_>) -> Result<Reply, RouteError> {
    let count = match call.query("count") {
        None => 1,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| RouteError::BadRequest(format!("invalid count: {raw}")))?
            .min(MAX_UUIDS),
    };
    let uuids: Vec<String> = (0..count).map(|_| Uuid::new_v4().simple().to_string()).collect();
    Ok(Reply::ok(json!({"uuids": uuids})))
}

fn all_docs(db: &Database, call: &Call<'_>) -> Result<Reply, RouteError> {
    let include_docs = call.flag("include_docs");
    let rows: Vec<Value> = db
        .all_docs()?
        .iter()
        .map(|rev| {
            let mut row = json!({"id": rev.id, "key": rev.id, "value": {"rev": rev.rev}});
            if include_docs {
                row["doc"] = Value::Object(rev.to_document());
            }
            row
        })
        .collect();
    Ok(Reply::ok(json!({"total_rows": rows.len(), "offset": 0, "rows": rows})))
}

fn changes(db: &Database, call: &Call<'_>) -> Result<Reply, RouteError> {
    let since = match call.query("since") {
        None => 0,
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| RouteError::BadRequest(format!("invalid since: {raw}")))?,
    };
    let changed = db.changes_since(since)?;
    let last_seq = changed.last().map_or(since, |rev| rev.seq);
    let results: Vec<Value> = changed
        .iter()
        .map(|rev| {
            let mut entry = json!({"seq": rev.seq, "id": rev.id, "changes": [{"rev": rev.rev}]});
            if rev.deleted {
                entry["deleted"] = Value::Bool(true);
            }
            entry
        })
        .collect();
    Ok(Reply::ok(json!({"results": results, "last_seq": last_seq})))
}

fn error_reply(err: &RouteError) -> Reply {
    let (status, error, reason) = match err {
        RouteError::BadRequest(reason) => (StatusCode::BAD_REQUEST, "bad_request", reason.clone()),
        RouteError::MethodNotAllowed(reason) => {
            (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", reason.clone())
        }
        RouteError::Store(store) => match store {
            StoreError::InvalidName(_) => (
                StatusCode::BAD_REQUEST,
                "illegal_database_name",
                store.to_string(),
            ),
            StoreError::AlreadyExists(_) => (
                StatusCode::PRECONDITION_FAILED,
                "file_exists",
                "The database could not be created, the file already exists.".to_string(),
            ),
            StoreError::NoSuchDatabase(_) | StoreError::Deleted(_) => {
                (StatusCode::NOT_FOUND, "not_found", "no_db_file".to_string())
            }
            StoreError::Missing(_) => (StatusCode::NOT_FOUND, "not_found", "missing".to_string()),
            StoreError::DocumentDeleted(_) => {
                (StatusCode::NOT_FOUND, "not_found", "deleted".to_string())
            }
            StoreError::Conflict(_) => (
                StatusCode::CONFLICT,
                "conflict",
                "Document update conflict.".to_string(),
            ),
            StoreError::Io(_) | StoreError::Corrupt { .. } | StoreError::Poisoned(_) => {
                error!(error = %store, "storage fault");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    store.to_string(),
                )
            }
        },
    };
    Reply {
        status,
        body: json!({"error": error, "reason": reason}),
        etag: None,
    }
}

/// A response built without going through the router, for failures on the
/// way in or out of it.
fn plain_error(status: StatusCode, reason: &str) -> HttpResponse {
    let error = if status.is_server_error() { "internal_error" } else { "bad_request" };
    let body = json!({"error": error, "reason": reason});
    HttpResponse {
        status: status.as_u16(),
        headers: vec![(CONTENT_TYPE.to_string(), "application/json".to_string())],
        body: codec::encode(&body).unwrap_or_default(),
    }
}
