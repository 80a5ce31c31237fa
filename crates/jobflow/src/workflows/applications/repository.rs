use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assessment::AssessmentScore;
use super::catalog::StatusCatalog;
use super::domain::{
    ActorRole, ApplicantId, ApplicationId, JobId, Status, StatusChange, Withdrawal,
};

/// Persisted form of an application. Mutate it through `ApplicationLifecycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub job_id: JobId,
    pub applicant_id: ApplicantId,
    pub status: Status,
    pub status_history: Vec<StatusChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_deadline: Option<DateTime<Utc>>,
    pub assessment_window_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_score: Option<AssessmentScore>,
    #[serde(default)]
    pub cover_letter: String,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawn: Option<Withdrawal>,
}

impl ApplicationRecord {
    pub fn status_view(&self) -> ApplicationStatusView {
        let allowed_next = if self.withdrawn.is_some() {
            Vec::new()
        } else {
            StatusCatalog::allowed_transitions(self.status)
                .into_iter()
                .map(Status::label)
                .collect()
        };

        ApplicationStatusView {
            application_id: self.id.clone(),
            job_id: self.job_id.clone(),
            status: self.status.label(),
            allowed_next,
            assessment_deadline: self.assessment_deadline,
            assessment_score: self.assessment_score,
            withdrawn: self.withdrawn.is_some(),
        }
    }
}

/// Storage abstraction so the gateway can be exercised in isolation.
pub trait ApplicationRepository: Send + Sync {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError>;
    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError>;
    fn save(&self, record: &ApplicationRecord) -> Result<(), RepositoryError>;
    fn in_status(&self, status: Status) -> Result<Vec<ApplicationRecord>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound hook that lets UIs and mailers react to status changes.
pub trait StatusNotifier: Send + Sync {
    fn publish(&self, event: StatusChangeEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub application_id: ApplicationId,
    pub from: Status,
    pub to: Status,
    pub actor: ActorRole,
    pub at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Public representation of an application's status.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub job_id: JobId,
    pub status: &'static str,
    pub allowed_next: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_score: Option<AssessmentScore>,
    pub withdrawn: bool,
}
