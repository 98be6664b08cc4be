//! Review queue: list, inspect, approve and requeue generated replies.

use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use engage_core::InteractionStatus;
use engage_pipeline::PipelineError;
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

const MAX_APPROVE_DELAY_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Deserialize)]
pub(super) struct InteractionsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ApproveRequest {
    pub scheduled_at: Option<DateTime<Utc>>,
    pub delay_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct InteractionItem {
    id: i64,
    tenant_id: i64,
    parent_item_id: i64,
    target_platform_user: String,
    content: String,
    status: String,
    retry_count: i32,
    scheduled_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    posted_external_id: Option<String>,
    posted_at: Option<DateTime<Utc>>,
    lead_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<engage_db::InteractionRow> for InteractionItem {
    fn from(row: engage_db::InteractionRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            parent_item_id: row.parent_item_id,
            target_platform_user: row.target_platform_user,
            content: row.content,
            status: row.status,
            retry_count: row.retry_count,
            scheduled_at: row.scheduled_at,
            error_message: row.error_message,
            posted_external_id: row.posted_external_id,
            posted_at: row.posted_at,
            lead_id: row.lead_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ApproveResponse {
    id: i64,
    status: &'static str,
    scheduled_at: DateTime<Utc>,
}

fn parse_status(rid: &str, raw: Option<&str>) -> Result<Option<InteractionStatus>, ApiError> {
    raw.map(|s| {
        InteractionStatus::from_str(s)
            .map_err(|e| ApiError::new(rid, "validation_error", e.to_string()))
    })
    .transpose()
}

/// Resolves the post time for an approval. An explicit timestamp wins;
/// otherwise `now + delay_minutes` (default zero).
fn resolve_schedule(
    rid: &str,
    body: &ApproveRequest,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ApiError> {
    match (body.scheduled_at, body.delay_minutes) {
        (Some(_), Some(_)) => Err(ApiError::new(
            rid,
            "validation_error",
            "give either scheduled_at or delay_minutes, not both",
        )),
        (Some(at), None) => Ok(at),
        (None, delay) => {
            let minutes = delay.unwrap_or(0);
            if !(0..=MAX_APPROVE_DELAY_MINUTES).contains(&minutes) {
                return Err(ApiError::new(
                    rid,
                    "validation_error",
                    format!("delay_minutes must be between 0 and {MAX_APPROVE_DELAY_MINUTES}"),
                ));
            }
            Ok(now + Duration::minutes(minutes))
        }
    }
}

fn map_pipeline_error(rid: &str, error: &PipelineError) -> ApiError {
    if let PipelineError::Db(e) = error {
        return map_db_error(rid.to_owned(), e);
    }
    tracing::error!(error = %error, "approve failed");
    ApiError::new(rid, "internal_error", "approve failed")
}

/// GET /api/v1/interactions
pub(super) async fn list_interactions(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<InteractionsQuery>,
) -> Result<Json<ApiResponse<Vec<InteractionItem>>>, ApiError> {
    let status = parse_status(&req_id.0, query.status.as_deref())?;

    let rows = engage_db::list_interactions(&state.pool, status, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: rows.into_iter().map(InteractionItem::from).collect(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// GET /api/v1/interactions/:id
pub(super) async fn get_interaction(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<InteractionItem>>, ApiError> {
    let row = engage_db::get_interaction(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: row.into(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// POST /api/v1/interactions/:id/approve
pub(super) async fn approve_interaction(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<ApproveRequest>,
) -> Result<Json<ApiResponse<ApproveResponse>>, ApiError> {
    let rid = &req_id.0;
    let scheduled_at = resolve_schedule(rid, &body, Utc::now())?;

    engage_pipeline::approve(&state.pool, id, scheduled_at)
        .await
        .map_err(|e| map_pipeline_error(rid, &e))?;

    Ok(Json(ApiResponse {
        data: ApproveResponse {
            id,
            status: InteractionStatus::Scheduled.as_str(),
            scheduled_at,
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// POST /api/v1/interactions/:id/requeue
pub(super) async fn requeue_interaction(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    engage_db::requeue_interaction(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    tracing::info!(interaction_id = id, "interaction requeued for review");

    Ok(Json(ApiResponse {
        data: serde_json::json!({ "id": id, "status": InteractionStatus::New.as_str() }),
        meta: ResponseMeta::new(req_id.0),
    }))
}
