//! Ephemeral disclosure endpoints.
//!
//! The frontend adapter registers secret-bearing messages here right after
//! sending them; the daemon deletes them when the exposure window closes.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::services::{DisclosureTarget, DisclosureToken};

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub token: u64,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Schedules deletion of a sent message after the disclosure TTL.
///
/// # Endpoint
/// `POST /api/disclosures`
pub async fn schedule(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ScheduleRequest>,
) -> Result<Json<ApiResponse<ScheduleResponse>>, ApiError> {
    let token = state
        .disclosures()
        .schedule(DisclosureTarget {
            chat_id: payload.chat_id,
            message_id: payload.message_id,
        })
        .await;

    Ok(Json(ApiResponse::success(ScheduleResponse {
        token: token.as_u64(),
    })))
}

/// Cancels a scheduled deletion.
///
/// # Endpoint
/// `DELETE /api/disclosures/{token}`
///
/// `cancelled: false` means the timer already fired or the token was never
/// issued; both are harmless.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(token): Path<u64>,
) -> Result<Json<ApiResponse<CancelResponse>>, ApiError> {
    let cancelled = state
        .disclosures()
        .cancel(DisclosureToken::from_raw(token))
        .await;

    Ok(Json(ApiResponse::success(CancelResponse { cancelled })))
}
