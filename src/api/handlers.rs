use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{header, Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::enrich::{decode_payload, extract_client_ip, Enricher};
use crate::error::TrackError;
use crate::ingest::Batcher;
use crate::models::{MetricRequest, MetricRow};
use crate::query::StatsService;

pub struct AppState {
    pub batcher: Arc<Batcher>,
    pub stats: StatsService,
    pub enricher: Enricher,
    /// How long a tracking request may wait for queue capacity
    pub accept_timeout: Duration,
    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct TrackQuery {
    #[serde(default)]
    pub data: String,
}

/// `GET /track?data=<base64 JSON>`
pub async fn track_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrackQuery>,
    extensions: Extensions,
    headers: HeaderMap,
) -> Response {
    // Unescaped '+' in the query string arrives as a space
    let data = query.data.replace(' ', "+");
    track(&state, data.as_bytes(), &extensions, &headers).await
}

/// `POST /track` with a raw or base64 encoded JSON body
pub async fn track_post(
    State(state): State<Arc<AppState>>,
    extensions: Extensions,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    track(&state, &body, &extensions, &headers).await
}

async fn track(
    state: &AppState,
    raw: &[u8],
    extensions: &Extensions,
    headers: &HeaderMap,
) -> Response {
    let payload = match decode_payload(raw) {
        Ok(payload) => payload,
        Err(e) => {
            debug!("Rejected tracking payload: {e}");
            return error_response(StatusCode::BAD_REQUEST, "Invalid data format");
        }
    };

    let socket_ip = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = extract_client_ip(headers, socket_ip, state.enricher.config());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok());

    let event = state.enricher.enrich(payload, client_ip, user_agent);
    let site_id = event.site_id.clone();

    let accepted = tokio::time::timeout(
        state.accept_timeout,
        state.batcher.accept(event, &state.shutdown),
    )
    .await
    .unwrap_or(Err(TrackError::Cancelled));

    match accepted {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(site_id = %site_id, "Could not enqueue tracking event: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not process event",
            )
        }
    }
}

/// `POST /stats`
pub async fn get_stats(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: MetricRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid request: {e}"));
        }
    };

    match state.stats.get_stats(&request).await {
        Ok(rows) => Json::<Vec<MetricRow>>(rows).into_response(),
        Err(TrackError::InvalidArgument(msg)) => error_response(StatusCode::BAD_REQUEST, msg),
        Err(e) => {
            error!("Stats request failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "OK" }))
}
