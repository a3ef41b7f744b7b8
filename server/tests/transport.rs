//! In-process requests through `touchdb:` URLs.
//!
//! Every test starts a fresh fixture: a server in its own temp dir with an
//! empty `touchdb-test` database, reached only via `Transport` + `Router`.

use std::sync::Arc;

use serde_json::{json, Value};
use touchdb_core::{HttpMethod, Properties, ReplicationConfig};
use touchdb_server::harness::{self, FixtureError, TouchDbFixture, DEFAULT_TEST_DB};
use touchdb_server::{Router, Server, Transport, TransportError};

fn fixture() -> TouchDbFixture {
    TouchDbFixture::start_with(ReplicationConfig::default()).unwrap()
}

fn props(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        _ => panic!("fixture must be an object"),
    }
}

#[test]
fn end_to_end_document_lifecycle() {
    let fx = fixture();
    fx.send(HttpMethod::Delete, "/touchdb-test", 200, None).unwrap();
    fx.send(HttpMethod::Put, "/touchdb-test", 201, Some(&json!({"ok": true})))
        .unwrap();

    let created = fx
        .send_body(HttpMethod::Put, "/touchdb-test/doc1", Some(&json!({"foo": "bar"})), 201, None)
        .unwrap()
        .unwrap();
    assert_eq!(created["ok"], true);
    assert_eq!(created["id"], "doc1");

    let fetched = fx
        .send(HttpMethod::Get, "/touchdb-test/doc1", 200, None)
        .unwrap()
        .unwrap();
    assert_eq!(fetched["foo"], "bar");
    assert_eq!(fetched["_rev"], created["rev"]);

    fx.send(HttpMethod::Delete, "/touchdb-test", 200, None).unwrap();
    fx.send(HttpMethod::Get, "/touchdb-test/doc1", 404, None).unwrap();
}

#[test]
fn ensure_empty_yields_fresh_database() {
    let fx = fixture();
    fx.database().put(Some("doc1"), &props(json!({"a": 1})), None).unwrap();

    let db = fx.ensure_empty_database(DEFAULT_TEST_DB).unwrap();
    assert!(db.is_empty().unwrap());
    let info = fx
        .send(HttpMethod::Get, "/touchdb-test", 200, None)
        .unwrap()
        .unwrap();
    assert_eq!(info["doc_count"], 0);
    fx.send(HttpMethod::Get, "/touchdb-test/doc1", 404, None).unwrap();
}

#[test]
fn put_then_get_preserves_user_properties() {
    let fx = fixture();
    let bodies = [
        json!({"foo": "bar"}),
        json!({}),
        json!({"n": 1.5, "list": [1, "two", null], "nested": {"_inner": true}}),
        json!({"_id": "ignored", "_custom": 1, "kept": "yes"}),
    ];
    for (i, body) in bodies.iter().enumerate() {
        let path = format!("/touchdb-test/doc{i}");
        let expected = harness::user_properties(&props(body.clone()));
        fx.send_body(HttpMethod::Put, &path, Some(body), 201, None).unwrap();
        let fetched = fx.send(HttpMethod::Get, &path, 200, None).unwrap().unwrap();
        assert_eq!(harness::user_properties(&props(fetched)), expected, "{body}");
    }
}

#[test]
fn delete_missing_database_or_document_is_404() {
    let fx = fixture();
    let expected = json!({"error": "not_found", "reason": "no_db_file"});
    fx.send(HttpMethod::Delete, "/no-such-db", 404, Some(&expected))
        .unwrap();
    fx.send(HttpMethod::Delete, "/touchdb-test/no-such-doc", 404, None)
        .unwrap();
}

#[test]
fn delete_existing_document_then_get_is_404() {
    let fx = fixture();
    fx.send_body(HttpMethod::Put, "/touchdb-test/doc1", Some(&json!({"a": 1})), 201, None)
        .unwrap();
    let deleted = fx
        .send(HttpMethod::Delete, "/touchdb-test/doc1", 200, None)
        .unwrap()
        .unwrap();
    assert!(deleted["rev"].as_str().unwrap().starts_with("2-"));
    fx.send(HttpMethod::Get, "/touchdb-test/doc1", 404, None).unwrap();
}

#[test]
fn stale_revision_conflicts_and_keeps_stored_revision() {
    let fx = fixture();
    let first = fx
        .send_body(HttpMethod::Put, "/touchdb-test/doc1", Some(&json!({"v": 1})), 201, None)
        .unwrap()
        .unwrap();
    let rev1 = first["rev"].as_str().unwrap().to_string();
    let second = fx
        .send_body(
            HttpMethod::Put,
            "/touchdb-test/doc1",
            Some(&json!({"_rev": rev1, "v": 2})),
            201,
            None,
        )
        .unwrap()
        .unwrap();

    let conflict = fx
        .send_body(
            HttpMethod::Put,
            "/touchdb-test/doc1",
            Some(&json!({"_rev": rev1, "v": 3})),
            409,
            None,
        )
        .unwrap()
        .unwrap();
    assert_eq!(conflict["error"], "conflict");

    fx.send_body(HttpMethod::Put, "/touchdb-test/doc1", Some(&json!({"v": 4})), 409, None)
        .unwrap();

    let current = fx
        .send(HttpMethod::Get, "/touchdb-test/doc1", 200, None)
        .unwrap()
        .unwrap();
    assert_eq!(current["_rev"], second["rev"]);
    assert_eq!(current["v"], 2);
}

#[test]
fn recreate_after_delete_continues_generation() {
    let fx = fixture();
    fx.send_body(HttpMethod::Put, "/touchdb-test/doc1", Some(&json!({"v": 1})), 201, None)
        .unwrap();
    fx.send(HttpMethod::Delete, "/touchdb-test/doc1", 200, None).unwrap();
    let again = fx
        .send_body(HttpMethod::Put, "/touchdb-test/doc1", Some(&json!({"v": 2})), 201, None)
        .unwrap()
        .unwrap();
    assert!(again["rev"].as_str().unwrap().starts_with("3-"));
}

#[test]
fn malformed_body_is_400_not_a_failure() {
    let fx = fixture();
    let response = Transport::open("touchdb:///touchdb-test/doc1")
        .unwrap()
        .method(HttpMethod::Put)
        .body(b"{\"unterminated\": ".to_vec())
        .dispatch(fx.router());
    assert_eq!(response.status(), 400);
    let body: Value = response.json().unwrap();
    assert_eq!(body["error"], "bad_request");
}

#[test]
fn headers_pass_through_transport() {
    let fx = fixture();
    let created = fx
        .send_body(HttpMethod::Put, "/touchdb-test/doc1", Some(&json!({"v": 1})), 201, None)
        .unwrap()
        .unwrap();
    let rev = created["rev"].as_str().unwrap();

    let response = fx
        .send_request(
            HttpMethod::Put,
            "/touchdb-test/doc1",
            &[("If-Match", &format!("\"{rev}\""))],
            Some(&json!({"v": 2})),
        )
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert!(response.header("etag").unwrap().starts_with("\"2-"));
}

#[test]
fn head_mirrors_get_without_body() {
    let fx = fixture();
    let response = fx
        .send_request(HttpMethod::Head, "/touchdb-test", &[], None)
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.body().is_empty());
    assert_eq!(harness::parse_json_response(&response).unwrap(), None);
}

#[test]
fn unexpected_status_is_reported_by_fixture() {
    let fx = fixture();
    let err = fx
        .send(HttpMethod::Get, "/touchdb-test/missing", 200, None)
        .unwrap_err();
    assert!(matches!(err, FixtureError::UnexpectedStatus { expected: 200, actual: 404, .. }));

    let err = fx
        .send(HttpMethod::Get, "/touchdb-test", 200, Some(&json!({"wrong": true})))
        .unwrap_err();
    assert!(matches!(err, FixtureError::UnexpectedBody { .. }));
}

#[test]
fn endpoint_errors_are_hard_failures() {
    let _fx = fixture();
    assert!(matches!(
        Transport::open("::not a url::"),
        Err(TransportError::MalformedEndpoint { .. })
    ));
    assert!(matches!(
        Transport::open("elsewhere:///db"),
        Err(TransportError::UnregisteredScheme(_))
    ));
}

#[test]
fn servers_are_isolated_by_router() {
    let a = Router::new(Arc::new(Server::in_memory())).unwrap();
    let b = Router::new(Arc::new(Server::in_memory())).unwrap();

    let created = Transport::open("touchdb:///only-a")
        .unwrap()
        .method(HttpMethod::Put)
        .dispatch(&a);
    assert_eq!(created.status(), 201);

    let elsewhere = Transport::open("touchdb:///only-a").unwrap().dispatch(&b);
    assert_eq!(elsewhere.status(), 404);
}

#[test]
fn concurrent_transports_share_one_server() {
    let fx = fixture();
    let created = fx
        .send_body(HttpMethod::Put, "/touchdb-test/doc1", Some(&json!({"v": 0})), 201, None)
        .unwrap()
        .unwrap();
    let base = created["rev"].as_str().unwrap().to_string();

    let statuses: Vec<u16> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let fx = &fx;
                let base = base.as_str();
                s.spawn(move || {
                    fx.send_request(
                        HttpMethod::Put,
                        "/touchdb-test/doc1",
                        &[],
                        Some(&json!({"_rev": base, "v": i})),
                    )
                    .unwrap()
                    .status()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(statuses.iter().filter(|&&s| s == 201).count(), 1);
    assert_eq!(statuses.iter().filter(|&&s| s == 409).count(), 5);
}

#[tokio::test]
async fn dispatch_works_inside_an_async_runtime() {
    let router = Router::new(Arc::new(Server::in_memory())).unwrap();

    let sync_response = Transport::open("touchdb:///from-sync")
        .unwrap()
        .method(HttpMethod::Put)
        .dispatch(&router);
    assert_eq!(sync_response.status(), 201);

    let async_response = Transport::open("touchdb:///from-sync")
        .unwrap()
        .dispatch_async(&router)
        .await;
    assert_eq!(async_response.status(), 200);
    let info: Value = async_response.json().unwrap();
    assert_eq!(info["db_name"], "from-sync");
}

#[test]
fn storage_fault_is_500_and_leaves_database_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("server");
    let router = Router::new(Arc::new(Server::open(&root).unwrap())).unwrap();
    let created = Transport::open("touchdb:///faulty")
        .unwrap()
        .method(HttpMethod::Put)
        .dispatch(&router);
    assert_eq!(created.status(), 201);

    std::fs::remove_dir_all(&root).unwrap();

    let response = Transport::open("touchdb:///faulty/doc1")
        .unwrap()
        .method(HttpMethod::Put)
        .json_body(&json!({"foo": "bar"}))
        .unwrap()
        .dispatch(&router);
    assert_eq!(response.status(), 500);
    let body: Value = response.json().unwrap();
    assert_eq!(body["error"], "internal_error");
    assert!(body["reason"].is_string());

    let missing = Transport::open("touchdb:///faulty/doc1").unwrap().dispatch(&router);
    assert_eq!(missing.status(), 404);
    let info: Value = Transport::open("touchdb:///faulty")
        .unwrap()
        .dispatch(&router)
        .json()
        .unwrap();
    assert_eq!(info["update_seq"], 0);
    assert_eq!(info["doc_count"], 0);
}
