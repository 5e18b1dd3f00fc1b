//! System API endpoints.
//!
//! Status reporting for operators and the frontend adapter: daemon health,
//! privileged-user counts and the current watchdog window.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::db::UserRole;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: u64,
    pub database_ok: bool,
    pub users: UserCounts,
    pub watchdog: WatchdogStatus,
    pub pending_disclosures: usize,
}

#[derive(Debug, Serialize)]
pub struct UserCounts {
    pub total: u64,
    pub admins: usize,
    pub curators: usize,
}

#[derive(Debug, Serialize)]
pub struct WatchdogStatus {
    pub enabled: bool,
    pub threshold: usize,
    pub window_seconds: u64,
    pub warnings_in_window: usize,
}

/// Returns daemon status.
///
/// # Endpoint
/// `GET /api/system/status`
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<SystemStatus>>, ApiError> {
    let database_ok = state.store().ping().await.is_ok();

    let total = state.store().user_count().await?;
    let admins = state.store().list_users_by_role(UserRole::Admin).await?.len();
    let curators = state
        .store()
        .list_users_by_role(UserRole::Curator)
        .await?
        .len();

    let watchdog_config = {
        let config = state.config().read().await;
        config.watchdog.clone()
    };
    let warnings_in_window = state
        .watchdog()
        .warning_count(chrono::Utc::now().timestamp())
        .await;

    let status = SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database_ok,
        users: UserCounts {
            total,
            admins,
            curators,
        },
        watchdog: WatchdogStatus {
            enabled: watchdog_config.enabled,
            threshold: watchdog_config.threshold,
            window_seconds: watchdog_config.window_seconds,
            warnings_in_window,
        },
        pending_disclosures: state.disclosures().pending().await,
    };

    Ok(Json(ApiResponse::success(status)))
}
