use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::SharedState;

pub mod auth;
mod disclosures;
mod error;
mod guard;
mod observability;
mod system;
mod two_factor;
mod types;
mod users;

pub use error::ApiError;
pub use types::*;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    #[must_use]
    pub fn policy(&self) -> &crate::services::PasswordPolicy {
        &self.shared.policy
    }

    #[must_use]
    pub fn guard(&self) -> &Arc<crate::services::AccessGuard> {
        &self.shared.guard
    }

    #[must_use]
    pub fn two_factor(&self) -> &Arc<dyn crate::services::TwoFactorService> {
        &self.shared.two_factor
    }

    #[must_use]
    pub fn disclosures(&self) -> &Arc<crate::services::EphemeralDisclosure> {
        &self.shared.disclosures
    }

    #[must_use]
    pub fn watchdog(&self) -> &Arc<crate::services::WarningWatchdog> {
        &self.shared.watchdog
    }

    #[must_use]
    pub fn event_bus(&self) -> &tokio::sync::broadcast::Sender<crate::events::SecurityEvent> {
        &self.shared.event_bus
    }
}

#[must_use]
pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let (shared, _restart_rx) = SharedState::new(config).await?;
    Ok(create_app_state(Arc::new(shared), prometheus_handle))
}

pub async fn router(state: Arc<AppState>) -> Router {
    let cors_origins = {
        let config = state.config().read().await;
        config.server.cors_allowed_origins.clone()
    };

    let api_router = create_protected_router(state.clone()).with_state(state);

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
}

fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/guard/authorize", post(guard::authorize))
        .route("/guard/password", post(guard::submit_password))
        .route("/guard/second-factor", post(guard::submit_second_factor))
        .route("/guard/new-password", post(guard::submit_new_password))
        .route("/two-factor/enroll", post(two_factor::enroll))
        .route("/two-factor/confirm", post(two_factor::confirm))
        .route("/two-factor/disable", post(two_factor::disable))
        .route("/users", get(users::list_users))
        .route("/users/grant", post(users::grant))
        .route("/disclosures", post(disclosures::schedule))
        .route("/disclosures/{token}", delete(disclosures::cancel))
        .route("/system/status", get(system::get_status))
        .route("/system/metrics", get(observability::get_metrics))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}
