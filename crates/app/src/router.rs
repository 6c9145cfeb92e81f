use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use stallplass_storage::Database;

use crate::auth::TokenValidator;
use crate::{budget, horses, pricing, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    token_validator: TokenValidator,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    budget_max_range_months: u32,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        jwt_secret: &[u8],
        budget_max_range_months: u32,
    ) -> Self {
        Self {
            metrics,
            storage,
            token_validator: TokenValidator::new(jwt_secret),
            clock: Arc::new(Utc::now),
            budget_max_range_months,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn token_validator(&self) -> &TokenValidator {
        &self.token_validator
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn budget_max_range_months(&self) -> u32 {
        self.budget_max_range_months
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/horses", get(horses::list).post(horses::create))
        .route("/api/horses/:horse_id", get(horses::fetch))
        .route("/api/horses/:horse_id/budget", get(budget::read_range))
        .route(
            "/api/horses/:horse_id/budget/items",
            get(budget::list_items).post(budget::create_item),
        )
        .route(
            "/api/horses/:horse_id/budget/items/:item_id",
            put(budget::update_item).delete(budget::delete_item),
        )
        .route(
            "/api/horses/:horse_id/budget/overrides",
            put(budget::upsert_override).delete(budget::delete_override),
        )
        .route(
            "/api/pricing/discounts/:category",
            get(pricing::list_active_discounts),
        )
        .route("/api/pricing/quote", post(pricing::quote))
        .route(
            "/api/admin/discount-tiers",
            get(pricing::list_tiers).post(pricing::create_tier),
        )
        .route(
            "/api/admin/discount-tiers/:tier_id",
            put(pricing::update_tier).delete(pricing::delete_tier),
        )
        .route("/api/admin/base-prices", get(pricing::list_base_prices))
        .route(
            "/api/admin/base-prices/:category",
            put(pricing::set_base_price),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}
