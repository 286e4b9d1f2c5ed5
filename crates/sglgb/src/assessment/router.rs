use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{AssessmentId, FieldValueMap, IndicatorId, Role};
use super::repository::{AssessmentRepository, EvidenceSource, NotificationPublisher};
use super::service::{AssessmentService, AssessmentServiceError, NewAssessment, ReviewInput};
use super::workflow::TransitionRequest;

type SharedService<R, N, E> = Arc<AssessmentService<R, N, E>>;

/// Body for `PUT .../indicators/:indicator_id/responses`.
#[derive(Debug, Deserialize)]
pub struct ResponsesPayload {
    pub actor: Role,
    pub values: FieldValueMap,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Body for `PUT .../indicators/:indicator_id/review`.
#[derive(Debug, Deserialize)]
pub struct ReviewPayload {
    pub actor: Role,
    #[serde(flatten)]
    pub review: ReviewInput,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Body for `POST .../transitions`.
#[derive(Debug, Deserialize)]
pub struct TransitionPayload {
    #[serde(flatten)]
    pub request: TransitionRequest,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Router exposing assessment intake, review, evaluation, and workflow endpoints.
pub fn assessment_router<R, N, E>(service: SharedService<R, N, E>) -> Router
where
    R: AssessmentRepository + 'static,
    N: NotificationPublisher + 'static,
    E: EvidenceSource + 'static,
{
    Router::new()
        .route("/api/v1/assessments", post(create_handler::<R, N, E>))
        .route(
            "/api/v1/assessments/:assessment_id",
            get(detail_handler::<R, N, E>),
        )
        .route(
            "/api/v1/assessments/:assessment_id/indicators/:indicator_id/responses",
            put(responses_handler::<R, N, E>),
        )
        .route(
            "/api/v1/assessments/:assessment_id/indicators/:indicator_id/review",
            put(review_handler::<R, N, E>),
        )
        .route(
            "/api/v1/assessments/:assessment_id/evaluate",
            post(evaluate_handler::<R, N, E>),
        )
        .route(
            "/api/v1/assessments/:assessment_id/transitions",
            post(transition_handler::<R, N, E>),
        )
        .with_state(service)
}

pub(crate) async fn create_handler<R, N, E>(
    State(service): State<SharedService<R, N, E>>,
    axum::Json(request): axum::Json<NewAssessment>,
) -> Response
where
    R: AssessmentRepository + 'static,
    N: NotificationPublisher + 'static,
    E: EvidenceSource + 'static,
{
    match service.create(request) {
        Ok(record) => (StatusCode::CREATED, axum::Json(record.summary())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn detail_handler<R, N, E>(
    State(service): State<SharedService<R, N, E>>,
    Path(assessment_id): Path<String>,
) -> Response
where
    R: AssessmentRepository + 'static,
    N: NotificationPublisher + 'static,
    E: EvidenceSource + 'static,
{
    match service.get(&AssessmentId(assessment_id)) {
        Ok(record) => (StatusCode::OK, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn responses_handler<R, N, E>(
    State(service): State<SharedService<R, N, E>>,
    Path((assessment_id, indicator_id)): Path<(String, String)>,
    axum::Json(payload): axum::Json<ResponsesPayload>,
) -> Response
where
    R: AssessmentRepository + 'static,
    N: NotificationPublisher + 'static,
    E: EvidenceSource + 'static,
{
    let result = service.record_responses(
        &AssessmentId(assessment_id),
        &IndicatorId(indicator_id),
        payload.actor,
        payload.values,
        payload.expected_version,
    );
    match result {
        Ok(record) => (StatusCode::OK, axum::Json(record.summary())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn review_handler<R, N, E>(
    State(service): State<SharedService<R, N, E>>,
    Path((assessment_id, indicator_id)): Path<(String, String)>,
    axum::Json(payload): axum::Json<ReviewPayload>,
) -> Response
where
    R: AssessmentRepository + 'static,
    N: NotificationPublisher + 'static,
    E: EvidenceSource + 'static,
{
    let result = service.record_review(
        &AssessmentId(assessment_id),
        &IndicatorId(indicator_id),
        payload.actor,
        payload.review,
        payload.expected_version,
    );
    match result {
        Ok(record) => (StatusCode::OK, axum::Json(record.summary())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn evaluate_handler<R, N, E>(
    State(service): State<SharedService<R, N, E>>,
    Path(assessment_id): Path<String>,
) -> Response
where
    R: AssessmentRepository + 'static,
    N: NotificationPublisher + 'static,
    E: EvidenceSource + 'static,
{
    match service.evaluate(&AssessmentId(assessment_id)) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn transition_handler<R, N, E>(
    State(service): State<SharedService<R, N, E>>,
    Path(assessment_id): Path<String>,
    axum::Json(payload): axum::Json<TransitionPayload>,
) -> Response
where
    R: AssessmentRepository + 'static,
    N: NotificationPublisher + 'static,
    E: EvidenceSource + 'static,
{
    let id = AssessmentId(assessment_id);
    match service.transition(&id, payload.request, payload.expected_version) {
        Ok(record) => {
            let payload = json!({
                "assessment": record.summary(),
                "transition": record.transitions.last(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

fn error_response(error: AssessmentServiceError) -> Response {
    let (status, payload) = match &error {
        AssessmentServiceError::NotFound(_) | AssessmentServiceError::UnknownIndicator(_) => {
            (StatusCode::NOT_FOUND, json!({ "error": error.to_string() }))
        }
        AssessmentServiceError::Guard(violation) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": violation.to_string(),
                "kind": violation.kind(),
                "violation": violation,
            }),
        ),
        AssessmentServiceError::InvalidResponse { .. }
        | AssessmentServiceError::InvalidRequest(_)
        | AssessmentServiceError::CalculatedStatus(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": error.to_string() }),
        ),
        AssessmentServiceError::ConcurrentModification { .. } => (
            StatusCode::CONFLICT,
            json!({ "error": error.to_string(), "retryable": true }),
        ),
        AssessmentServiceError::Evidence(_) | AssessmentServiceError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": error.to_string() }),
        ),
    };
    (status, axum::Json(payload)).into_response()
}
