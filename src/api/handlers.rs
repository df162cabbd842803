//! Table, queue and history handlers
//!
//! Every body is `{"ok": bool, "message"?: string, ...}`. A refused state
//! transition is a normal `200` with `ok: false`; validation failures map to
//! `400`/`404` and internal failures to `500`.

use crate::error::CoordinationError;
use crate::history::{Correction, CorrectionFilter};
use crate::service::coordination::CoordinationService;
use crate::types::EntityId;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

pub type ApiResponse = (StatusCode, Json<Value>);

#[derive(Debug, Deserialize)]
pub struct EntityRequest {
    #[serde(alias = "team")]
    pub entity: EntityId,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(alias = "team")]
    pub entity: EntityId,
    #[serde(default)]
    pub position: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SwapRequest {
    #[serde(alias = "teams")]
    pub entities: Vec<EntityId>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryAddRequest {
    #[serde(alias = "team")]
    pub entity: EntityId,
    pub table: String,
    #[serde(alias = "start_time")]
    pub start: i64,
    #[serde(alias = "end_time")]
    pub end: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryDeleteRequest {
    #[serde(alias = "correction_id")]
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQueryRequest {
    #[serde(default, alias = "filter")]
    pub filters: CorrectionFilter,
}

#[derive(Debug, Deserialize)]
pub struct OverviewParams {
    pub last_update: Option<u64>,
}

/// `{"ok": true}` merged with the fields of `extra`
pub fn ok_with(extra: Value) -> ApiResponse {
    let mut body = json!({ "ok": true });
    if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }
    (StatusCode::OK, Json(body))
}

fn ok() -> ApiResponse {
    (StatusCode::OK, Json(json!({ "ok": true })))
}

fn refused() -> ApiResponse {
    (StatusCode::OK, Json(json!({ "ok": false })))
}

/// Map an operation error to a status code and an `ok: false` body
pub fn failure(err: &anyhow::Error) -> ApiResponse {
    let status = match err.downcast_ref::<CoordinationError>() {
        Some(CoordinationError::UnknownTable { .. }) => StatusCode::NOT_FOUND,
        Some(e) if e.is_validation() => StatusCode::BAD_REQUEST,
        _ => {
            error!("Request failed: {:#}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(json!({ "ok": false, "message": err.to_string() })),
    )
}

fn bad_body(rejection: JsonRejection) -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "message": rejection.body_text() })),
    )
}

fn from_bool(result: anyhow::Result<bool>) -> ApiResponse {
    match result {
        Ok(true) => ok(),
        Ok(false) => refused(),
        Err(e) => failure(&e),
    }
}

fn from_correction(
    service: &CoordinationService,
    result: anyhow::Result<Option<Correction>>,
) -> ApiResponse {
    match result {
        Ok(Some(correction)) => {
            service.metrics().record_service_completed(&correction);
            ok_with(json!({ "correction": correction }))
        }
        Ok(None) => refused(),
        Err(e) => failure(&e),
    }
}

/// All tables, or `changed: false` when nothing moved since `last_update`
pub async fn list_tables(
    State(service): State<CoordinationService>,
    Query(params): Query<OverviewParams>,
) -> ApiResponse {
    let result = service
        .read(|c| c.changes_since(params.last_update))
        .await;
    match result {
        Ok(Some(overview)) => ok_with(json!({
            "changed": true,
            "last_update": overview.last_update,
            "tables": overview.tables,
        })),
        Ok(None) => ok_with(json!({ "changed": false })),
        Err(e) => failure(&e),
    }
}

pub async fn get_table(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
) -> ApiResponse {
    let result = service
        .read(|c| {
            let table = c.table(&name).ok_or_else(|| {
                anyhow::Error::from(CoordinationError::UnknownTable { name: name.clone() })
            })?;
            Ok::<_, anyhow::Error>(json!({
                "table": table.to_snapshot(),
                "expected_duration": table.expected_duration()?,
            }))
        })
        .await;
    match result {
        Ok(body) => ok_with(body),
        Err(e) => failure(&e),
    }
}

pub async fn get_queue(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
) -> ApiResponse {
    match service.read(|c| c.queue(&name)).await {
        Ok(queue) => ok_with(json!({ "queue": queue })),
        Err(e) => failure(&e),
    }
}

pub async fn get_estimate(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
) -> ApiResponse {
    match service.read(|c| c.expected_duration(&name)).await {
        Ok(seconds) => ok_with(json!({ "expected_duration": seconds })),
        Err(e) => failure(&e),
    }
}

pub async fn unavailable(State(service): State<CoordinationService>) -> ApiResponse {
    let entities = service.read(|c| c.unavailable_entities()).await;
    ok_with(json!({ "entities": entities }))
}

pub async fn enqueue(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
    payload: Result<Json<EnqueueRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    from_bool(
        service
            .mutate("enqueue", |c| {
                c.enqueue(&name, &request.entity, request.position)
            })
            .await,
    )
}

pub async fn dequeue(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
    payload: Result<Json<EntityRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    from_bool(
        service
            .mutate("dequeue", |c| c.dequeue(&name, &request.entity))
            .await,
    )
}

pub async fn swap(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
    payload: Result<Json<SwapRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let [first, second] = request.entities.as_slice() else {
        return failure(&anyhow::Error::from(CoordinationError::InvalidRequest {
            reason: "You have to give exactly two entities to be swapped.".to_string(),
        }));
    };
    from_bool(
        service
            .mutate("swap", |c| c.swap(&name, first, second))
            .await,
    )
}

pub async fn start_service(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
    payload: Result<Json<EntityRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    from_bool(
        service
            .mutate("start", |c| c.start_service(&name, &request.entity))
            .await,
    )
}

pub async fn finish_service(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
) -> ApiResponse {
    let result = service.mutate("finish", |c| c.finish_service(&name)).await;
    from_correction(&service, result)
}

pub async fn pause_service(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
) -> ApiResponse {
    let result = service.mutate("pause", |c| c.pause_service(&name)).await;
    from_correction(&service, result)
}

pub async fn switch_to_calling(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
) -> ApiResponse {
    from_bool(
        service
            .mutate("calling", |c| c.switch_to_calling(&name))
            .await,
    )
}

pub async fn switch_to_idle(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
) -> ApiResponse {
    from_bool(service.mutate("idle", |c| c.switch_to_idle(&name)).await)
}

pub async fn skip_to_next(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
) -> ApiResponse {
    from_bool(service.mutate("skip", |c| c.skip_to_next(&name)).await)
}

pub async fn call_entity(
    State(service): State<CoordinationService>,
    Path(name): Path<String>,
    payload: Result<Json<EntityRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    from_bool(
        service
            .mutate("call", |c| c.call_entity(&name, &request.entity))
            .await,
    )
}

pub async fn history_add(
    State(service): State<CoordinationService>,
    payload: Result<Json<HistoryAddRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let result = service
        .mutate("history_add", |c| {
            c.history_add(&request.entity, &request.table, request.start, request.end)
        })
        .await;
    match result {
        Ok(correction) => ok_with(json!({ "correction": correction })),
        Err(e) => failure(&e),
    }
}

pub async fn history_delete(
    State(service): State<CoordinationService>,
    payload: Result<Json<HistoryDeleteRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    from_bool(
        service
            .mutate("history_delete", |c| c.history_delete(&request.id))
            .await,
    )
}

pub async fn history_query(
    State(service): State<CoordinationService>,
    payload: Result<Json<HistoryQueryRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match service.read(|c| c.history_query(&request.filters)).await {
        Ok(corrections) => ok_with(json!({ "corrections": corrections })),
        Err(e) => failure(&e),
    }
}
