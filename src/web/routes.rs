use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::AppState;
use crate::constants::MAX_LOG_ENTRIES;
use crate::handlers::HANDLERS;
use crate::ledger::{DedupLedger, SubscriptionId};
use crate::models::MessageRef;

const DEFAULT_LOG_LIMIT: usize = 100;

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/queue", post(queue_url))
        .route("/api/retry", post(queue_retry))
        .route("/api/downloaded-ids", get(downloaded_ids))
        .route("/api/downloaded-ids/stream", get(downloaded_ids_stream))
        .route("/api/logs", get(logs))
        .route("/api/failures", get(failures))
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct QueueRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct QueueResponse {
    url: String,
    queued: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
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

async fn queue_url(State(state): State<AppState>, Json(req): Json<QueueRequest>) -> Response {
    let Some(link) = HANDLERS.classify(&req.url) else {
        return error_response(StatusCode::BAD_REQUEST, "No supported link in url");
    };

    match state.log.queue_url(&link.url).await {
        Ok(queued) => (
            StatusCode::ACCEPTED,
            Json(QueueResponse {
                url: link.url,
                queued,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to queue url: {e:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to queue url")
        }
    }
}

async fn queue_retry(State(state): State<AppState>, Json(reference): Json<MessageRef>) -> Response {
    match state.log.queue_retry(&reference).await {
        Ok(true) => StatusCode::ACCEPTED.into_response(),
        Ok(false) => StatusCode::OK.into_response(),
        Err(e) => {
            error!("Failed to queue retry: {e:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to queue retry")
        }
    }
}

async fn downloaded_ids(State(state): State<AppState>) -> Response {
    let ids: Vec<_> = state.ledger.snapshot().await.into_iter().collect();
    Json(ids).into_response()
}

/// Unsubscribes from the ledger when the SSE stream is dropped.
struct SubscriptionGuard {
    ledger: Arc<DedupLedger>,
    id: SubscriptionId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        debug!(subscriber = self.id, "SSE client disconnected");
        self.ledger.unsubscribe(self.id);
    }
}

async fn downloaded_ids_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.ledger.subscribe();
    let guard = SubscriptionGuard {
        ledger: Arc::clone(&state.ledger),
        id: subscription.id(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(ids) = subscription.recv().await {
            let data = serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string());
            yield Ok(Event::default().event("ids").data(data));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[derive(Debug, Deserialize)]
struct LogsParams {
    limit: Option<usize>,
}

async fn logs(State(state): State<AppState>, Query(params): Query<LogsParams>) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .min(MAX_LOG_ENTRIES);
    Json(state.log.recent_logs(limit).await).into_response()
}

async fn failures(State(state): State<AppState>) -> Response {
    Json(state.log.failures().await).into_response()
}
