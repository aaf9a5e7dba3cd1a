use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::problem::ProblemResponse;
use crate::recorder::PollService;
use crate::{api, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    polls: PollService,
    admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, polls: PollService, admin_token: Option<String>) -> Self {
        Self {
            metrics,
            polls,
            admin_token: admin_token.map(Arc::from),
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn polls(&self) -> &PollService {
        &self.polls
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/latest", get(api::latest))
        .route("/vote", post(api::vote))
        .route("/admin/question", post(api::create_question))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Result<StatusCode, ProblemResponse> {
    if state.polls().is_dirty() {
        return Err(ProblemResponse::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "snapshot_dirty",
            "latest changes have not been written to the snapshot file",
        ));
    }
    Ok(StatusCode::OK)
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
