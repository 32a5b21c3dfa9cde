//! API route handlers for the gateway.
//!
//! Validation and conflict errors surface here with enough detail to correct
//! the request; transport errors from the immediate-send paths map onto 5xx
//! statuses by retryability.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use zapline_core::error::ZaplineError;
use zapline_core::types::{Recipient, RecipientKind, validate_message};
use zapline_engine::{BulkRecipient, compute_stats};

use super::server::AppState;

fn error_response(e: &ZaplineError) -> Response {
    let status = match e {
        ZaplineError::Validation(_) => StatusCode::BAD_REQUEST,
        ZaplineError::NotFound(_) => StatusCode::NOT_FOUND,
        ZaplineError::Conflict(_) => StatusCode::CONFLICT,
        ZaplineError::Transport(t) if t.retryable() => StatusCode::SERVICE_UNAVAILABLE,
        ZaplineError::Transport(_) => StatusCode::BAD_GATEWAY,
        ZaplineError::Store(_) | ZaplineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    )
        .into_response()
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "zapline-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "transport": state.transport.name(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub recipient: String,
    pub kind: RecipientKind,
    pub message: String,
    #[serde(default)]
    pub schedule_in_minutes: i64,
}

/// `POST /api/v1/schedule` — create a deferred send.
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateScheduleRequest>,
) -> Response {
    if req.schedule_in_minutes < 0 {
        return error_response(&ZaplineError::Validation(
            "schedule_in_minutes must not be negative".into(),
        ));
    }
    let recipient = match Recipient::new(&req.recipient, req.kind) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    match state
        .store
        .create(recipient, &req.message, req.schedule_in_minutes)
    {
        Ok(schedule) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": schedule.id,
                "status": schedule.status,
                "scheduled_at": schedule.scheduled_at,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub status: Option<String>,
}

/// `GET /api/v1/schedule` — history listing, most recent first.
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        Some(s) => match s.to_ascii_lowercase().parse() {
            Ok(status) => Some(status),
            Err(_) => {
                return error_response(&ZaplineError::Validation(format!(
                    "unknown status filter: {s}"
                )));
            }
        },
        None => None,
    };
    let limit = query.limit.unwrap_or(50);
    match state.store.list_recent(limit, status) {
        Ok(schedules) => Json(serde_json::json!({
            "count": schedules.len(),
            "schedules": schedules,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/schedule/stats` — status counts over the store.
pub async fn schedule_stats(State(state): State<Arc<AppState>>) -> Response {
    match compute_stats(&state.store) {
        Ok(stats) => Json(serde_json::json!(stats)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/schedule/{id}` — full record.
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get(&id) {
        Ok(schedule) => Json(serde_json::json!(schedule)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub purge: bool,
}

/// `DELETE /api/v1/schedule/{id}` — cancel a pending schedule, or with
/// `?purge=true` remove a terminal record.
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    let result = if query.purge {
        state.store.delete(&id)
    } else {
        state.store.cancel(&id)
    };
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkEntry {
    pub recipient: String,
    pub kind: RecipientKind,
}

#[derive(Debug, Deserialize)]
pub struct BulkSendRequest {
    pub message: String,
    pub recipients: Vec<BulkEntry>,
    /// When present, degrade to N deferred schedules instead of immediate
    /// transport sends.
    pub schedule_in_minutes: Option<i64>,
}

/// `POST /api/v1/bulk-send` — immediate paced fan-out, or deferred creation.
pub async fn bulk_send(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkSendRequest>,
) -> Response {
    if req.recipients.is_empty() {
        return error_response(&ZaplineError::Validation("recipients is empty".into()));
    }
    let recipients: Vec<BulkRecipient> = req
        .recipients
        .iter()
        .map(|e| BulkRecipient {
            value: e.recipient.clone(),
            kind: e.kind,
        })
        .collect();

    match req.schedule_in_minutes {
        Some(minutes) => {
            if minutes < 0 {
                return error_response(&ZaplineError::Validation(
                    "schedule_in_minutes must not be negative".into(),
                ));
            }
            match state.bulk.schedule_bulk(&req.message, &recipients, minutes) {
                Ok(created) => (
                    StatusCode::CREATED,
                    Json(serde_json::json!({
                        "count": created.len(),
                        "ids": created.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
                    })),
                )
                    .into_response(),
                Err(e) => error_response(&e),
            }
        }
        None => match state.bulk.dispatch_bulk(&req.message, &recipients).await {
            Ok(report) => Json(serde_json::json!(report)).into_response(),
            Err(e) => error_response(&e),
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub recipient: String,
    #[serde(default = "default_kind")]
    pub kind: RecipientKind,
    pub message: String,
}

fn default_kind() -> RecipientKind {
    RecipientKind::Private
}

/// `POST /api/v1/send` — immediate single send, bypassing the store.
pub async fn send_now(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequest>,
) -> Response {
    if let Err(e) = validate_message(&req.message) {
        return error_response(&e);
    }
    let recipient = match Recipient::new(&req.recipient, req.kind) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    let deadline = std::time::Duration::from_secs(state.config.engine.send_timeout_secs);
    let send = state.transport.send(&recipient, &req.message);
    match tokio::time::timeout(deadline, send).await {
        Ok(Ok(message_id)) => Json(serde_json::json!({
            "ok": true,
            "to": recipient.value,
            "message_id": message_id,
        }))
        .into_response(),
        Ok(Err(e)) => error_response(&ZaplineError::Transport(e)),
        Err(_elapsed) => error_response(&ZaplineError::Transport(
            zapline_core::error::TransportError::Timeout,
        )),
    }
}
