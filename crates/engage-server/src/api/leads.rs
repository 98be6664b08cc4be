use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct LeadsQuery {
    pub tenant: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct LeadItem {
    id: i64,
    tenant_id: i64,
    target_platform_user: String,
    score: i32,
    summary: String,
    buying_signals: Vec<String>,
    pain_points: Vec<String>,
    interaction_count: i32,
    first_interaction_at: Option<DateTime<Utc>>,
    last_interaction_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

/// GET /api/v1/leads, highest score first.
pub(super) async fn list_leads(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<LeadsQuery>,
) -> Result<Json<ApiResponse<Vec<LeadItem>>>, ApiError> {
    let rows = engage_db::list_leads(
        &state.pool,
        query.tenant.as_deref(),
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = rows
        .into_iter()
        .map(|row| LeadItem {
            id: row.id,
            tenant_id: row.tenant_id,
            target_platform_user: row.target_platform_user,
            score: row.score,
            summary: row.summary,
            buying_signals: row.buying_signals,
            pain_points: row.pain_points,
            interaction_count: row.interaction_count,
            first_interaction_at: row.first_interaction_at,
            last_interaction_at: row.last_interaction_at,
            updated_at: row.updated_at,
        })
        .collect();

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}
