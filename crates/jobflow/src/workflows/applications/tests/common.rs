use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::LifecycleConfig;
use crate::workflows::applications::assessment::{
    CodeExecutor, CodeSubmission, ExecutionError, ExecutionReport, TestCase,
};
use crate::workflows::applications::clock::ManualClock;
use crate::workflows::applications::domain::{
    ActorRole, ApplicantId, ApplicationId, JobId, Status,
};
use crate::workflows::applications::gateway::LifecycleGateway;
use crate::workflows::applications::lifecycle::ApplicationLifecycle;
use crate::workflows::applications::repository::{
    ApplicationRecord, ApplicationRepository, NotifyError, RepositoryError, StatusChangeEvent,
    StatusNotifier,
};

pub(super) const WINDOW_SECS: u64 = 3600;

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn applicant() -> ApplicantId {
    ApplicantId("seeker-42".to_string())
}

pub(super) fn job() -> JobId {
    JobId("job-rust-backend".to_string())
}

pub(super) fn lifecycle_config() -> LifecycleConfig {
    LifecycleConfig {
        assessment_window: Duration::from_secs(WINDOW_SECS),
        persist_attempts: 3,
    }
}

pub(super) fn new_lifecycle() -> ApplicationLifecycle {
    ApplicationLifecycle::create(job(), applicant(), start())
        .with_assessment_window(Duration::from_secs(WINDOW_SECS))
}

/// Drive a fresh lifecycle up to (and including) `target` along the happy path.
pub(super) fn lifecycle_in(target: Status) -> ApplicationLifecycle {
    let mut lifecycle = new_lifecycle();
    let path = [
        (Status::Applied, ActorRole::Applicant),
        (Status::InReview, ActorRole::Employer),
        (Status::Shortlisted, ActorRole::Employer),
        (Status::CodeChallenge, ActorRole::Employer),
    ];
    if target == Status::Applying {
        return lifecycle;
    }
    for (status, actor) in path {
        lifecycle
            .request_transition(status, actor, start())
            .expect("happy path transition");
        if status == target {
            return lifecycle;
        }
    }
    match target {
        Status::Accepted | Status::Rejected => {
            lifecycle
                .request_transition(Status::InReview, ActorRole::Applicant, start())
                .expect("leave challenge");
            lifecycle
                .request_transition(target, ActorRole::Employer, start())
                .expect("terminal decision");
            lifecycle
        }
        other => panic!("no happy path to {other}"),
    }
}

pub(super) type TestGateway = LifecycleGateway<MemoryRepository, MemoryNotifier>;

pub(super) fn build_gateway() -> (
    TestGateway,
    Arc<MemoryRepository>,
    Arc<MemoryNotifier>,
    Arc<ManualClock>,
) {
    let repository = Arc::new(MemoryRepository::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let clock = Arc::new(ManualClock::new(start()));
    let gateway = LifecycleGateway::with_clock(
        repository.clone(),
        notifier.clone(),
        lifecycle_config(),
        clock.clone(),
    );
    (gateway, repository, notifier, clock)
}

/// Open an application and walk it into `CodeChallenge` through the gateway.
pub(super) fn open_challenge<R, N>(gateway: &LifecycleGateway<R, N>) -> ApplicationId
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let record = gateway.open(job(), applicant()).expect("open application");
    let id = record.id;
    gateway
        .transition_as_applicant(&id, Status::Applied, &applicant())
        .expect("submit");
    gateway
        .transition(&id, Status::InReview, ActorRole::Employer)
        .expect("review");
    gateway
        .transition(&id, Status::Shortlisted, ActorRole::Employer)
        .expect("shortlist");
    gateway
        .transition(&id, Status::CodeChallenge, ActorRole::Employer)
        .expect("issue challenge");
    id
}

/// Let spawned timer tasks run to completion under a paused clock.
pub(super) async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    pub(super) records: Arc<Mutex<HashMap<ApplicationId, ApplicationRecord>>>,
    pub(super) saves: Arc<AtomicUsize>,
}

impl MemoryRepository {
    pub(super) fn stored(&self, id: &ApplicationId) -> Option<ApplicationRecord> {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
    }

    pub(super) fn put(&self, record: ApplicationRecord) {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .insert(record.id.clone(), record);
    }
}

impl ApplicationRepository for MemoryRepository {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn save(&self, record: &ApplicationRecord) -> Result<(), RepositoryError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        guard.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn in_status(&self, status: Status) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect())
    }
}

/// Repository whose `save` reports `Unavailable` for the first `failures` calls.
#[derive(Default)]
pub(super) struct FlakyRepository {
    pub(super) inner: MemoryRepository,
    pub(super) failures: AtomicU32,
    pub(super) attempts: AtomicU32,
}

impl FlakyRepository {
    pub(super) fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryRepository::default(),
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }
}

impl ApplicationRepository for FlakyRepository {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        self.inner.insert(record)
    }

    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        self.inner.load(id)
    }

    fn save(&self, record: &ApplicationRecord) -> Result<(), RepositoryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Unavailable("database offline".to_string()));
        }
        self.inner.save(record)
    }

    fn in_status(&self, status: Status) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        self.inner.in_status(status)
    }
}

pub(super) struct UnavailableRepository;

impl ApplicationRepository for UnavailableRepository {
    fn insert(&self, _record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn load(&self, _id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn save(&self, _record: &ApplicationRecord) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn in_status(&self, _status: Status) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryNotifier {
    events: Arc<Mutex<Vec<StatusChangeEvent>>>,
}

impl MemoryNotifier {
    pub(super) fn events(&self) -> Vec<StatusChangeEvent> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn events_to(&self, status: Status) -> Vec<StatusChangeEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.to == status)
            .collect()
    }
}

impl StatusNotifier for MemoryNotifier {
    fn publish(&self, event: StatusChangeEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct BrokenNotifier;

impl StatusNotifier for BrokenNotifier {
    fn publish(&self, _event: StatusChangeEvent) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("socket closed".to_string()))
    }
}

pub(super) struct StubExecutor {
    pub(super) result: Result<ExecutionReport, String>,
    pub(super) calls: AtomicUsize,
}

impl StubExecutor {
    pub(super) fn passing(passed: u32, failed: u32) -> Self {
        Self {
            result: Ok(ExecutionReport { passed, failed }),
            calls: AtomicUsize::new(0),
        }
    }

    pub(super) fn offline() -> Self {
        Self {
            result: Err("judge offline".to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl CodeExecutor for StubExecutor {
    fn execute(&self, _submission: &CodeSubmission) -> Result<ExecutionReport, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .clone()
            .map_err(ExecutionError::Unavailable)
    }
}

pub(super) fn submission() -> CodeSubmission {
    CodeSubmission {
        language: "rust".to_string(),
        source: "fn main() { println!(\"4\"); }".to_string(),
        test_cases: vec![TestCase {
            input: "2 2".to_string(),
            expected_output: "4".to_string(),
        }],
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 4096)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
