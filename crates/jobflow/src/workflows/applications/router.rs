use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{ActorRole, ApplicantId, ApplicationId, JobId, Status, StatusParseError};
use super::gateway::{GatewayError, LifecycleGateway};
use super::lifecycle::{DraftError, WithdrawError};
use super::policy::PolicyError;
use super::repository::{
    ApplicationRecord, ApplicationRepository, RepositoryError, StatusNotifier,
};

/// Header carrying the caller's role as resolved by the identity layer.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
/// Header carrying the authenticated caller's user id.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

#[derive(Debug, Deserialize)]
pub struct OpenApplicationRequest {
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DraftRequest {
    #[serde(default)]
    pub cover_letter: Option<String>,
    #[serde(default)]
    pub answers: Option<BTreeMap<String, String>>,
}

/// Body of a code challenge hand-in. Scores are only ever produced by the code runner, so a
/// client-supplied `score` is refused.
#[derive(Debug, Default, Deserialize)]
pub struct AssessmentRequest {
    #[serde(default)]
    pub score: Option<serde_json::Value>,
}

/// Router exposing the application lifecycle over HTTP.
pub fn application_router<R, N>(gateway: Arc<LifecycleGateway<R, N>>) -> Router
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    Router::new()
        .route("/api/v1/applications", post(open_handler::<R, N>))
        .route(
            "/api/v1/applications/:application_id",
            get(status_handler::<R, N>),
        )
        .route(
            "/api/v1/applications/:application_id/transitions",
            post(transition_handler::<R, N>),
        )
        .route(
            "/api/v1/applications/:application_id/draft",
            put(draft_handler::<R, N>),
        )
        .route(
            "/api/v1/applications/:application_id/assessment",
            post(assessment_handler::<R, N>),
        )
        .route(
            "/api/v1/applications/:application_id/withdraw",
            post(withdraw_handler::<R, N>),
        )
        .with_state(gateway)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({ "error": message.into() });
    (status, axum::Json(payload)).into_response()
}

fn actor_role(headers: &HeaderMap) -> Result<ActorRole, Response> {
    let raw = headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            error_body(
                StatusCode::UNAUTHORIZED,
                format!("missing {ACTOR_ROLE_HEADER} header"),
            )
        })?;
    raw.parse::<ActorRole>()
        .map_err(|err| error_body(StatusCode::BAD_REQUEST, err.to_string()))
}

fn requester(headers: &HeaderMap) -> Result<ApplicantId, Response> {
    headers
        .get(ACTOR_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| ApplicantId(value.to_string()))
        .ok_or_else(|| {
            error_body(
                StatusCode::UNAUTHORIZED,
                format!("missing {ACTOR_ID_HEADER} header"),
            )
        })
}

pub(crate) fn gateway_error_response(error: GatewayError) -> Response {
    let status = match &error {
        GatewayError::Policy(PolicyError::Unauthorized { .. })
        | GatewayError::Withdraw(WithdrawError::Unauthorized(_))
        | GatewayError::Draft(DraftError::Unauthorized(_))
        | GatewayError::NotOwner(_)
        | GatewayError::RequesterRequired => StatusCode::FORBIDDEN,
        GatewayError::Policy(PolicyError::InvalidScore { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GatewayError::Policy(_) | GatewayError::Withdraw(_) | GatewayError::Draft(_) => {
            StatusCode::CONFLICT
        }
        GatewayError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        GatewayError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        GatewayError::Execution(_) => StatusCode::BAD_GATEWAY,
        GatewayError::Repository(RepositoryError::Unavailable(_))
        | GatewayError::Persistence { .. }
        | GatewayError::Timer(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, error.to_string())
}

fn record_response(
    status: StatusCode,
    result: Result<ApplicationRecord, GatewayError>,
) -> Response {
    match result {
        Ok(record) => (status, axum::Json(record.status_view())).into_response(),
        Err(error) => gateway_error_response(error),
    }
}

pub(crate) async fn open_handler<R, N>(
    State(gateway): State<Arc<LifecycleGateway<R, N>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<OpenApplicationRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let role = match actor_role(&headers) {
        Ok(role) => role,
        Err(response) => return response,
    };
    if role != ActorRole::Applicant {
        return error_body(StatusCode::FORBIDDEN, "only applicants may open applications");
    }
    let applicant = match requester(&headers) {
        Ok(applicant) => applicant,
        Err(response) => return response,
    };

    record_response(
        StatusCode::CREATED,
        gateway.open(JobId(request.job_id), applicant),
    )
}

pub(crate) async fn status_handler<R, N>(
    State(gateway): State<Arc<LifecycleGateway<R, N>>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    record_response(StatusCode::OK, gateway.get(&ApplicationId(application_id)))
}

pub(crate) async fn transition_handler<R, N>(
    State(gateway): State<Arc<LifecycleGateway<R, N>>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<TransitionRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let role = match actor_role(&headers) {
        Ok(role) => role,
        Err(response) => return response,
    };
    let target = match request.status.parse::<Status>() {
        Ok(status) => status,
        Err(StatusParseError::Withdrawn) => {
            return error_body(
                StatusCode::BAD_REQUEST,
                "withdrawal is not a status; POST to the withdraw endpoint instead",
            )
        }
        Err(err) => return error_body(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let id = ApplicationId(application_id);

    let result = match role {
        ActorRole::Applicant => match requester(&headers) {
            Ok(applicant) => gateway.transition_as_applicant(&id, target, &applicant),
            Err(response) => return response,
        },
        ActorRole::SystemTimer => {
            return error_body(
                StatusCode::FORBIDDEN,
                "system-timer transitions only come from assessment deadlines",
            )
        }
        ActorRole::Employer => gateway.transition(&id, target, role),
    };
    record_response(StatusCode::OK, result)
}

pub(crate) async fn draft_handler<R, N>(
    State(gateway): State<Arc<LifecycleGateway<R, N>>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<DraftRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let role = match actor_role(&headers) {
        Ok(role) => role,
        Err(response) => return response,
    };
    let applicant = match requester(&headers) {
        Ok(applicant) => applicant,
        Err(response) => return response,
    };

    record_response(
        StatusCode::OK,
        gateway.update_draft(
            &ApplicationId(application_id),
            role,
            &applicant,
            request.cover_letter,
            request.answers,
        ),
    )
}

pub(crate) async fn assessment_handler<R, N>(
    State(gateway): State<Arc<LifecycleGateway<R, N>>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<AssessmentRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let role = match actor_role(&headers) {
        Ok(role) => role,
        Err(response) => return response,
    };
    if role != ActorRole::Applicant {
        return error_body(
            StatusCode::FORBIDDEN,
            "only the applicant may hand in a code challenge",
        );
    }
    let applicant = match requester(&headers) {
        Ok(applicant) => applicant,
        Err(response) => return response,
    };
    if request.score.is_some() {
        return error_body(
            StatusCode::BAD_REQUEST,
            "scores are recorded by the code runner, not by the client",
        );
    }

    record_response(
        StatusCode::OK,
        gateway.submit_assessment(&ApplicationId(application_id), &applicant),
    )
}

pub(crate) async fn withdraw_handler<R, N>(
    State(gateway): State<Arc<LifecycleGateway<R, N>>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let role = match actor_role(&headers) {
        Ok(role) => role,
        Err(response) => return response,
    };
    let applicant = match requester(&headers) {
        Ok(applicant) => applicant,
        Err(response) => return response,
    };

    record_response(
        StatusCode::OK,
        gateway.withdraw(&ApplicationId(application_id), role, &applicant),
    )
}
