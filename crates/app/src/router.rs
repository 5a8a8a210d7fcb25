use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use job_location_core::{
    compose, AddressField, JobLocationPatch, LocationInheritanceResolver, LocationRecord,
    Resolution,
};

use crate::problem::{ProblemResponse, INVALID_ACTOR, INVALID_BODY};
use crate::telemetry;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    resolver: LocationInheritanceResolver,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle) -> Self {
        Self {
            metrics,
            resolver: LocationInheritanceResolver::new(),
        }
    }

    #[cfg(test)]
    pub fn with_resolver(mut self, resolver: LocationInheritanceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn resolver(&self) -> &LocationInheritanceResolver {
        &self.resolver
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/address/compose", post(compose_address))
        .route("/v1/jobs/location/create", post(resolve_create))
        .route("/v1/jobs/location/update", post(resolve_update))
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

#[derive(Debug, Serialize)]
struct ComposeResponse {
    address: Option<String>,
}

async fn compose_address(
    payload: Result<Json<LocationRecord>, JsonRejection>,
) -> Result<Json<ComposeResponse>, ProblemResponse> {
    let Json(location) = payload.map_err(|err| rejected("compose", err))?;
    counter!("derive_requests_total", "kind" => "compose", "result" => "ok").increment(1);
    Ok(Json(ComposeResponse {
        address: compose(Some(&location)),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    #[serde(default)]
    business_address: Option<String>,
    #[serde(default)]
    business_location: Option<LocationRecord>,
    actor: String,
}

async fn resolve_create(
    State(state): State<AppState>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Json<Resolution>, ProblemResponse> {
    let Json(request) = payload.map_err(|err| rejected("create", err))?;
    let actor = required_actor("create", &request.actor)?;

    let resolution = state.resolver().resolve(
        request.business_address.as_deref(),
        request.business_location.as_ref(),
        actor,
    );
    debug!(stage = "http", actor, composed = resolution.address.is_some(), "create resolution served");
    counter!("derive_requests_total", "kind" => "create", "result" => "ok").increment(1);
    Ok(Json(resolution))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    #[serde(default, with = "::serde_with::rust::double_option")]
    business_address: Option<Option<String>>,
    #[serde(default)]
    business_location: Option<LocationRecord>,
    actor: String,
}

#[derive(Debug, Serialize)]
struct UpdateResponse {
    applied: bool,
    patch: JobLocationPatch,
}

async fn resolve_update(
    State(state): State<AppState>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Json<UpdateResponse>, ProblemResponse> {
    let Json(request) = payload.map_err(|err| rejected("update", err))?;
    let actor = required_actor("update", &request.actor)?;

    let address = AddressField::from_update(request.business_address);
    let patch = state
        .resolver()
        .resolve_update(&address, request.business_location.as_ref(), actor)
        .into_patch();
    counter!("derive_requests_total", "kind" => "update", "result" => "ok").increment(1);
    Ok(Json(UpdateResponse {
        applied: !patch.is_empty(),
        patch,
    }))
}

fn required_actor<'a>(kind: &'static str, actor: &'a str) -> Result<&'a str, ProblemResponse> {
    let trimmed = actor.trim();
    if trimmed.is_empty() {
        counter!("derive_requests_total", "kind" => kind, "result" => "invalid").increment(1);
        return Err(ProblemResponse::bad_request(
            INVALID_ACTOR,
            "actor must be a non-empty identifier",
        ));
    }
    Ok(trimmed)
}

fn rejected(kind: &'static str, err: JsonRejection) -> ProblemResponse {
    warn!(stage = "http", kind, error = %err, "rejected derivation request");
    counter!("derive_requests_total", "kind" => kind, "result" => "invalid").increment(1);
    ProblemResponse::bad_request(INVALID_BODY, err.body_text())
}
