use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::workflows::applications::domain::{ActorRole, Status};
use crate::workflows::applications::gateway::{GatewayError, LifecycleGateway};
use crate::workflows::applications::policy::PolicyError;
use crate::workflows::applications::router::{
    application_router, gateway_error_response, status_handler, transition_handler,
    TransitionRequest, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER,
};

fn json_request(method: &str, uri: &str, role: &str, body: Value) -> Request<Body> {
    caller_request(method, uri, role, &applicant().0, body)
}

fn caller_request(method: &str, uri: &str, role: &str, caller: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header(ACTOR_ROLE_HEADER, role)
        .header(ACTOR_ID_HEADER, caller)
        .body(Body::from(
            serde_json::to_vec(&body).expect("serialize payload"),
        ))
        .expect("request")
}

fn role_headers(role: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_static(role));
    headers
}

fn applicant_headers() -> HeaderMap {
    let mut headers = role_headers("applicant");
    headers.insert(
        ACTOR_ID_HEADER,
        HeaderValue::from_str(&applicant().0).expect("header value"),
    );
    headers
}

#[tokio::test]
async fn open_route_creates_an_application() {
    let (gateway, repository, _notifier, _clock) = build_gateway();
    let router = application_router(Arc::new(gateway));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/applications",
            "applicant",
            json!({ "job_id": "job-rust-backend" }),
        ))
        .await
        .expect("router dispatch");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("status"), Some(&json!("applying")));
    assert_eq!(payload.get("allowed_next"), Some(&json!(["applied"])));
    assert_eq!(payload.get("withdrawn"), Some(&json!(false)));

    let id = payload
        .get("application_id")
        .and_then(Value::as_str)
        .expect("application id");
    let stored = repository
        .stored(&crate::workflows::applications::ApplicationId(id.to_string()))
        .expect("persisted");
    assert_eq!(stored.applicant_id, applicant());
}

#[tokio::test]
async fn open_route_is_reserved_for_applicants() {
    let (gateway, _repository, _notifier, _clock) = build_gateway();
    let router = application_router(Arc::new(gateway));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/applications",
            "employer",
            json!({ "job_id": "job-rust-backend" }),
        ))
        .await
        .expect("router dispatch");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn transition_route_walks_the_happy_path() {
    let (gateway, _repository, notifier, _clock) = build_gateway();
    let gateway = Arc::new(gateway);
    let id = gateway.open(job(), applicant()).expect("open").id;
    let router = application_router(gateway.clone());
    let uri = format!("/api/v1/applications/{}/transitions", id.0);

    let steps = [
        ("applicant", "applied"),
        ("employer", "In Review"),
        ("employer", "shortlisted"),
    ];
    for (role, status) in steps {
        let response = router
            .clone()
            .oneshot(json_request("POST", &uri, role, json!({ "status": status })))
            .await
            .expect("router dispatch");
        assert_eq!(response.status(), StatusCode::OK, "{role} -> {status}");
    }

    let response = router
        .oneshot(json_request(
            "POST",
            &uri,
            "employer",
            json!({ "status": "code_challenge" }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("status"), Some(&json!("code_challenge")));
    assert!(payload
        .get("assessment_deadline")
        .and_then(Value::as_str)
        .is_some());

    assert_eq!(notifier.events().len(), 4);
    assert_eq!(gateway.armed_timers(), 1);
}

#[tokio::test]
async fn illegal_skip_returns_conflict() {
    let (gateway, _repository, _notifier, _clock) = build_gateway();
    let gateway = Arc::new(gateway);
    let id = gateway.open(job(), applicant()).expect("open").id;
    gateway
        .transition_as_applicant(&id, Status::Applied, &applicant())
        .expect("submit");

    let response = transition_handler::<MemoryRepository, MemoryNotifier>(
        State(gateway),
        Path(id.0.clone()),
        role_headers("employer"),
        axum::Json(TransitionRequest {
            status: "accepted".to_string(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert!(payload
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .contains("applied"));
}

#[tokio::test]
async fn unauthorized_actor_returns_forbidden() {
    let (gateway, _repository, _notifier, _clock) = build_gateway();
    let gateway = Arc::new(gateway);
    let id = gateway.open(job(), applicant()).expect("open").id;
    gateway
        .transition_as_applicant(&id, Status::Applied, &applicant())
        .expect("submit");

    let response = transition_handler::<MemoryRepository, MemoryNotifier>(
        State(gateway),
        Path(id.0.clone()),
        applicant_headers(),
        axum::Json(TransitionRequest {
            status: "in_review".to_string(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn applicant_transitions_require_the_owner() {
    let (gateway, repository, _notifier, _clock) = build_gateway();
    let gateway = Arc::new(gateway);
    let id = gateway.open(job(), applicant()).expect("open").id;
    let router = application_router(gateway);
    let uri = format!("/api/v1/applications/{}/transitions", id.0);

    let response = router
        .clone()
        .oneshot(caller_request(
            "POST",
            &uri,
            "applicant",
            "someone-else",
            json!({ "status": "applied" }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let anonymous = Request::builder()
        .method("POST")
        .uri(&uri)
        .header("content-type", "application/json")
        .header(ACTOR_ROLE_HEADER, "applicant")
        .body(Body::from(r#"{"status":"applied"}"#))
        .expect("request");
    let response = router.oneshot(anonymous).await.expect("router dispatch");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(
        repository.stored(&id).expect("stored").status,
        Status::Applying
    );
}

#[tokio::test]
async fn system_timer_role_is_not_accepted_over_http() {
    let (gateway, repository, _notifier, _clock) = build_gateway();
    let id = open_challenge(&gateway);
    let gateway = Arc::new(gateway);

    let response = transition_handler::<MemoryRepository, MemoryNotifier>(
        State(gateway),
        Path(id.0.clone()),
        role_headers("system-timer"),
        axum::Json(TransitionRequest {
            status: "in_review".to_string(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        repository.stored(&id).expect("stored").status,
        Status::CodeChallenge
    );
}

#[tokio::test]
async fn withdrawn_is_not_accepted_as_a_target_status() {
    let (gateway, _repository, _notifier, _clock) = build_gateway();
    let gateway = Arc::new(gateway);
    let id = gateway.open(job(), applicant()).expect("open").id;

    let response = transition_handler::<MemoryRepository, MemoryNotifier>(
        State(gateway.clone()),
        Path(id.0.clone()),
        role_headers("applicant"),
        axum::Json(TransitionRequest {
            status: "Withdrawn".to_string(),
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert!(payload
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .contains("withdraw endpoint"));

    let response = transition_handler::<MemoryRepository, MemoryNotifier>(
        State(gateway),
        Path(id.0.clone()),
        role_headers("applicant"),
        axum::Json(TransitionRequest {
            status: "hired".to_string(),
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_or_invalid_role_header_is_rejected() {
    let (gateway, _repository, _notifier, _clock) = build_gateway();
    let gateway = Arc::new(gateway);
    let id = gateway.open(job(), applicant()).expect("open").id;

    let response = transition_handler::<MemoryRepository, MemoryNotifier>(
        State(gateway.clone()),
        Path(id.0.clone()),
        HeaderMap::new(),
        axum::Json(TransitionRequest {
            status: "applied".to_string(),
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = transition_handler::<MemoryRepository, MemoryNotifier>(
        State(gateway),
        Path(id.0.clone()),
        role_headers("recruiter-bot"),
        axum::Json(TransitionRequest {
            status: "applied".to_string(),
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_handler_returns_not_found_for_unknown_ids() {
    let (gateway, _repository, _notifier, _clock) = build_gateway();

    let response = status_handler::<MemoryRepository, MemoryNotifier>(
        State(Arc::new(gateway)),
        Path("app-does-not-exist".to_string()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_handler_surfaces_storage_outage() {
    let gateway = Arc::new(LifecycleGateway::with_clock(
        Arc::new(UnavailableRepository),
        Arc::new(MemoryNotifier::default()),
        lifecycle_config(),
        Arc::new(crate::workflows::applications::ManualClock::new(start())),
    ));

    let response = status_handler::<UnavailableRepository, MemoryNotifier>(
        State(gateway),
        Path("app-000001".to_string()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn withdraw_route_checks_the_requester() {
    let (gateway, _repository, _notifier, _clock) = build_gateway();
    let gateway = Arc::new(gateway);
    let id = gateway.open(job(), applicant()).expect("open").id;
    let router = application_router(gateway.clone());
    let uri = format!("/api/v1/applications/{}/withdraw", id.0);

    let intruder = Request::builder()
        .method("POST")
        .uri(&uri)
        .header(ACTOR_ROLE_HEADER, "applicant")
        .header(ACTOR_ID_HEADER, "someone-else")
        .body(Body::empty())
        .expect("request");
    let response = router
        .clone()
        .oneshot(intruder)
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let owner = Request::builder()
        .method("POST")
        .uri(&uri)
        .header(ACTOR_ROLE_HEADER, "applicant")
        .header(ACTOR_ID_HEADER, applicant().0)
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(owner).await.expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("withdrawn"), Some(&json!(true)));
    assert_eq!(payload.get("allowed_next"), Some(&json!([])));
}

#[tokio::test]
async fn draft_route_updates_content_while_applying() {
    let (gateway, repository, _notifier, _clock) = build_gateway();
    let gateway = Arc::new(gateway);
    let id = gateway.open(job(), applicant()).expect("open").id;
    let router = application_router(gateway);

    let response = router
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/applications/{}/draft", id.0),
            "applicant",
            json!({ "cover_letter": "Ferris sent me", "answers": { "visa": "no" } }),
        ))
        .await
        .expect("router dispatch");

    assert_eq!(response.status(), StatusCode::OK);
    let stored = repository.stored(&id).expect("stored");
    assert_eq!(stored.cover_letter, "Ferris sent me");
    assert_eq!(stored.answers.get("visa").map(String::as_str), Some("no"));
}

#[tokio::test]
async fn assessment_route_outside_challenge_conflicts() {
    let (gateway, _repository, _notifier, _clock) = build_gateway();
    let gateway = Arc::new(gateway);
    let id = gateway.open(job(), applicant()).expect("open").id;
    let router = application_router(gateway);

    let response = router
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/applications/{}/assessment", id.0),
            "applicant",
            json!({}),
        ))
        .await
        .expect("router dispatch");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn assessment_route_hands_in_for_the_owner() {
    let (gateway, _repository, notifier, _clock) = build_gateway();
    let id = open_challenge(&gateway);
    let gateway = Arc::new(gateway);
    let router = application_router(gateway.clone());

    let response = router
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/applications/{}/assessment", id.0),
            "applicant",
            json!({}),
        ))
        .await
        .expect("router dispatch");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("status"), Some(&json!("in_review")));
    assert!(payload.get("assessment_score").is_none());
    assert_eq!(gateway.armed_timers(), 0);
    assert_eq!(
        notifier.events().last().map(|event| event.actor),
        Some(ActorRole::Applicant)
    );
}

#[tokio::test]
async fn assessment_route_refuses_other_applicants_and_client_scores() {
    let (gateway, repository, _notifier, _clock) = build_gateway();
    let id = open_challenge(&gateway);
    let gateway = Arc::new(gateway);
    let router = application_router(gateway);
    let uri = format!("/api/v1/applications/{}/assessment", id.0);

    let response = router
        .clone()
        .oneshot(caller_request(
            "POST",
            &uri,
            "applicant",
            "someone-else",
            json!({}),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            "applicant",
            json!({ "score": { "passed": 99, "total": 1 } }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .oneshot(json_request("POST", &uri, "employer", json!({})))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let stored = repository.stored(&id).expect("stored");
    assert_eq!(stored.status, Status::CodeChallenge);
    assert_eq!(stored.assessment_score, None);
}

#[test]
fn impossible_scores_map_to_unprocessable_entity() {
    let response = gateway_error_response(GatewayError::Policy(PolicyError::InvalidScore {
        passed: 99,
        total: 1,
    }));
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = gateway_error_response(GatewayError::RequesterRequired);
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
