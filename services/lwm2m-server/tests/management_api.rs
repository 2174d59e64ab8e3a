//! Management routes driven through the router without sockets.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use bpms_core::ModelsConfig;
use bpms_identity::{rpk, ServerIdentity};
use bpms_model::StaticModelProvider;
use bpms_server::{management, state::ServerSecurityView, AppState, RegistrationRequest, RegistrationService};
use bpms_store::{BackendKind, FileRegistrationStore, FileSecurityStore, ObjectLink};

struct Harness {
    _dir: TempDir,
    identity: ServerIdentity,
    registrations: RegistrationService,
    app: Router,
}

fn harness(api_token: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let identity = ServerIdentity::RawPublicKey(rpk::demo_key().unwrap());
    let registrations = RegistrationService::new(Arc::new(
        FileRegistrationStore::open(dir.path().join("registrations.json")).unwrap(),
    ));

    let state = Arc::new(AppState {
        security: Arc::new(FileSecurityStore::open(dir.path().join("security.json")).unwrap()),
        registrations: registrations.clone(),
        models: Arc::new(StaticModelProvider::from_config(&ModelsConfig::default()).unwrap()),
        server_security: ServerSecurityView::from_identity(&identity),
        backend: BackendKind::Local,
        api_token: api_token.map(str::to_string),
    });

    Harness {
        _dir: dir,
        identity,
        registrations,
        app: management::router(state),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap()
}

fn psk(endpoint: &str, identity: &str) -> Value {
    json!({
        "endpoint": endpoint,
        "credential": { "type": "psk", "identity": identity, "key": "0102030405" }
    })
}

#[tokio::test]
async fn test_health_is_open_and_api_requires_token() {
    let h = harness(Some("s3cret"));

    let (status, body) = send(&h.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backend"], "local");

    let (status, _) = send(&h.app, get("/api/clients")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/api/clients")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&h.app, wrong).await.0, StatusCode::UNAUTHORIZED);

    let authorized = Request::builder()
        .uri("/api/clients")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, authorized).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_security_entry_crud() {
    let h = harness(None);

    let (status, body) = send(&h.app, put_json("/api/security/clients", psk("sensor-1", "id-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["credential"]["identity"], "id-1");

    // Same PSK identity on another endpoint.
    let (status, _) = send(&h.app, put_json("/api/security/clients", psk("sensor-2", "id-1"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let rpk_entry = json!({
        "endpoint": "sensor-2",
        "credential": { "type": "rpk", "public_key": "04aa" }
    });
    assert_eq!(send(&h.app, put_json("/api/security/clients", rpk_entry)).await.0, StatusCode::OK);

    let (status, body) = send(&h.app, get("/api/security/clients")).await;
    assert_eq!(status, StatusCode::OK);
    let endpoints: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["endpoint"].as_str().unwrap())
        .collect();
    assert_eq!(endpoints, ["sensor-1", "sensor-2"]);

    assert_eq!(send(&h.app, delete("/api/security/clients/sensor-1")).await.0, StatusCode::OK);
    assert_eq!(send(&h.app, delete("/api/security/clients/sensor-1")).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_security_entry_rejected() {
    let h = harness(None);

    let (status, _) = send(&h.app, put_json("/api/security/clients", psk("  ", "id-1"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&h.app, put_json("/api/security/clients", psk("sensor-1", ""))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_server_security_shows_public_key() {
    let h = harness(None);

    let (status, body) = send(&h.app, get("/api/security/server")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "raw_public_key");
    assert_eq!(body["public_key"], hex::encode(h.identity.public_key_der()));
    assert!(body.get("certificate").is_none());
    assert!(body.get("alias").is_none());
    assert_eq!(body["trusted_certificates"], 0);
}

#[tokio::test]
async fn test_clients_and_object_specs() {
    let h = harness(None);

    let (status, body) = send(&h.app, get("/api/objectspecs")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<u64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_u64().unwrap())
        .collect();
    assert!(ids.contains(&3));
    assert!(ids.contains(&3303));

    assert_eq!(send(&h.app, get("/api/clients/meter")).await.0, StatusCode::NOT_FOUND);
    assert_eq!(send(&h.app, get("/api/objectspecs/meter")).await.0, StatusCode::NOT_FOUND);

    h.registrations
        .register(RegistrationRequest {
            endpoint: "meter".to_string(),
            address: "127.0.0.1:40000".parse().unwrap(),
            lifetime_secs: 300,
            lwm2m_version: "1.1".to_string(),
            binding: "U".to_string(),
            objects: vec![ObjectLink::new(3303, Some(0))],
        })
        .await
        .unwrap();

    let (status, body) = send(&h.app, get("/api/clients/meter")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["endpoint"], "meter");

    let (status, body) = send(&h.app, get("/api/objectspecs/meter")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), ids.len());
}
