//! Management HTTP surface.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
    Router,
};
use serde_json::json;
use tracing::debug;

use crate::handlers;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/clients", get(handlers::list_clients))
        .route("/api/clients/:endpoint", get(handlers::get_client))
        .route("/event", get(handlers::registration_events))
        .route(
            "/api/security/clients",
            get(handlers::list_security).put(handlers::put_security),
        )
        .route("/api/security/clients/:endpoint", delete(handlers::delete_security))
        .route("/api/security/server", get(handlers::server_security))
        .route("/api/objectspecs", get(handlers::object_specs))
        .route("/api/objectspecs/:endpoint", get(handlers::client_object_specs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(api)
        .with_state(state)
}

/// Rejects requests without the configured bearer token. No token configured
/// means the API is open.
async fn require_token(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let Some(token) = state.api_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(token) {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), "Rejected unauthenticated management request");
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "missing or invalid bearer token" }))).into_response()
    }
}
