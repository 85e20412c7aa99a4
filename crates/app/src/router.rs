use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::domains::DomainService;
use crate::push::PushOrchestrator;
use crate::{api, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    orchestrator: PushOrchestrator,
    domains: DomainService,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        orchestrator: PushOrchestrator,
        domains: DomainService,
    ) -> Self {
        Self {
            metrics,
            orchestrator,
            domains,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn orchestrator(&self) -> &PushOrchestrator {
        &self.orchestrator
    }

    pub fn domains(&self) -> &DomainService {
        &self.domains
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/sites/:site_id", axum::routing::put(api::save_site))
        .route(
            "/sites/:site_id/domains",
            get(api::list_domains).post(api::create_domain),
        )
        .route(
            "/domains/:domain_id",
            axum::routing::patch(api::update_domain).delete(api::delete_domain),
        )
        .route("/domains/:domain_id/primary", post(api::make_primary))
        .route(
            "/domains/:domain_id/push",
            post(api::push_domain).get(api::push_status),
        )
        .route("/domains/:domain_id/push/history", get(api::push_history))
        .route("/resolve", get(api::resolve))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Response {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}
