use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{debug, error, info, warn};

use bpms_model::ObjectDefinition;
use bpms_store::{Credential, Registration, SecurityInfo, StoreError};

use crate::state::{AppState, ServerSecurityView};

/// Error response of the management API.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_conflict() {
            return Self::Conflict(err.to_string());
        }
        if err.is_fatal() {
            error!("Store unavailable: {}", err);
        } else {
            warn!("Store operation failed: {}", err);
        }
        Self::Internal("store operation failed".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Conflict(m) => (StatusCode::CONFLICT, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "bpms-server",
        "backend": state.backend.to_string(),
        "timestamp": Utc::now().to_rfc3339()
    }))
}

pub async fn list_clients(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Registration>>, ApiError> {
    Ok(Json(state.registrations.all().await?))
}

pub async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(endpoint): Path<String>,
) -> Result<Json<Registration>, ApiError> {
    state
        .registrations
        .get_by_endpoint(&endpoint)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no registration for endpoint '{endpoint}'")))
}

/// Registration events as server-sent events, optionally for one endpoint (`?ep=`).
pub async fn registration_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let endpoint = params.get("ep").cloned();
    debug!(endpoint = ?endpoint, "Event stream opened");

    let stream = BroadcastStream::new(state.registrations.subscribe()).filter_map(move |item| {
        let event = match item {
            Ok(event) => event,
            Err(lagged) => {
                debug!("Event stream subscriber lagging: {}", lagged);
                return None;
            }
        };
        if endpoint.as_deref().is_some_and(|ep| ep != event.endpoint()) {
            return None;
        }
        Event::default()
            .event(event.name())
            .json_data(&event)
            .map(Ok)
            .ok()
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn list_security(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SecurityInfo>>, ApiError> {
    Ok(Json(state.security.all().await?))
}

fn check_security_info(info: &SecurityInfo) -> Result<(), ApiError> {
    if info.endpoint.trim().is_empty() {
        return Err(ApiError::BadRequest("endpoint must not be empty".to_string()));
    }
    match &info.credential {
        Credential::PreSharedKey { identity, key } => {
            if identity.is_empty() || key.is_empty() {
                return Err(ApiError::BadRequest("psk identity and key must not be empty".to_string()));
            }
        }
        Credential::RawPublicKey { public_key } => {
            if public_key.is_empty() {
                return Err(ApiError::BadRequest("rpk public key must not be empty".to_string()));
            }
        }
        Credential::X509 => {}
    }
    Ok(())
}

pub async fn put_security(
    State(state): State<Arc<AppState>>,
    Json(info): Json<SecurityInfo>,
) -> Result<Json<SecurityInfo>, ApiError> {
    check_security_info(&info)?;

    let previous = state.security.put(info.clone()).await?;
    info!(
        endpoint = %info.endpoint,
        replaced = previous.is_some(),
        "Security entry stored"
    );
    Ok(Json(info))
}

pub async fn delete_security(
    State(state): State<Arc<AppState>>,
    Path(endpoint): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.security.remove(&endpoint).await? {
        Some(_) => {
            info!(endpoint = %endpoint, "Security entry removed");
            Ok(StatusCode::OK)
        }
        None => Err(ApiError::NotFound(format!("no security entry for endpoint '{endpoint}'"))),
    }
}

pub async fn server_security(State(state): State<Arc<AppState>>) -> Json<ServerSecurityView> {
    Json(state.server_security.clone())
}

pub async fn object_specs(State(state): State<Arc<AppState>>) -> Json<Vec<ObjectDefinition>> {
    let model = state.models.object_model(None);
    Json(model.objects().cloned().collect())
}

pub async fn client_object_specs(
    State(state): State<Arc<AppState>>,
    Path(endpoint): Path<String>,
) -> Result<Json<Vec<ObjectDefinition>>, ApiError> {
    let registration = state
        .registrations
        .get_by_endpoint(&endpoint)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no registration for endpoint '{endpoint}'")))?;

    let model = state.models.object_model(Some(&registration));
    Ok(Json(model.objects().cloned().collect()))
}
