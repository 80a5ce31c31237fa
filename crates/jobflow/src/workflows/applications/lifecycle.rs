use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::assessment::AssessmentScore;
use super::catalog::StatusCatalog;
use super::domain::{
    ActorRole, ApplicantId, ApplicationId, JobId, Status, StatusChange, Withdrawal,
};
use super::policy::{PolicyError, TransitionPolicy};
use super::repository::ApplicationRecord;
use crate::config::DEFAULT_ASSESSMENT_WINDOW_SECS;

/// Why a withdrawal was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WithdrawError {
    #[error("application can no longer be withdrawn while {0}")]
    TooLate(Status),
    #[error("{0} may not withdraw an application")]
    Unauthorized(ActorRole),
    #[error("application was already withdrawn")]
    AlreadyWithdrawn,
}

/// Why cover letter or answer edits were refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("application content is locked once {0}")]
    Locked(Status),
    #[error("{0} may not edit application content")]
    Unauthorized(ActorRole),
    #[error("application was withdrawn")]
    Withdrawn,
}

/// Authoritative in-memory state of one application.
///
/// Every mutation validates first and writes second, so a refused request leaves the
/// record exactly as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationLifecycle {
    record: ApplicationRecord,
}

impl ApplicationLifecycle {
    /// Start a new application in `Applying`.
    pub fn create(job_id: JobId, applicant_id: ApplicantId, now: DateTime<Utc>) -> Self {
        let record = ApplicationRecord {
            id: ApplicationId::next(),
            job_id,
            applicant_id,
            status: Status::Applying,
            status_history: vec![StatusChange {
                status: Status::Applying,
                at: now,
                actor: ActorRole::Applicant,
            }],
            assessment_deadline: None,
            assessment_window_secs: DEFAULT_ASSESSMENT_WINDOW_SECS,
            assessment_score: None,
            cover_letter: String::new(),
            answers: BTreeMap::new(),
            withdrawn: None,
        };
        Self { record }
    }

    /// Set how long the applicant gets once a code challenge is issued.
    pub fn with_assessment_window(mut self, window: Duration) -> Self {
        self.record.assessment_window_secs = window.as_secs().max(1);
        self
    }

    pub fn from_record(record: ApplicationRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &ApplicationRecord {
        &self.record
    }

    pub fn into_record(self) -> ApplicationRecord {
        self.record
    }

    pub fn id(&self) -> &ApplicationId {
        &self.record.id
    }

    pub fn status(&self) -> Status {
        self.record.status
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.record.status_history
    }

    pub fn assessment_deadline(&self) -> Option<DateTime<Utc>> {
        self.record.assessment_deadline
    }

    pub fn is_withdrawn(&self) -> bool {
        self.record.withdrawn.is_some()
    }

    pub fn request_transition(
        &mut self,
        to: Status,
        actor: ActorRole,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyError> {
        self.apply(to, actor, now, None)
    }

    /// Leave the code challenge for review, optionally recording the graded result.
    pub fn submit_assessment(
        &mut self,
        actor: ActorRole,
        score: Option<AssessmentScore>,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyError> {
        if self.record.withdrawn.is_none() && self.record.status != Status::CodeChallenge {
            if StatusCatalog::is_terminal(self.record.status) {
                return Err(PolicyError::TerminalState(self.record.status));
            }
            return Err(PolicyError::IllegalTransition {
                from: self.record.status,
                to: Status::InReview,
            });
        }
        self.apply(Status::InReview, actor, now, score)
    }

    pub fn withdraw(&mut self, actor: ActorRole, now: DateTime<Utc>) -> Result<(), WithdrawError> {
        if self.record.withdrawn.is_some() {
            return Err(WithdrawError::AlreadyWithdrawn);
        }
        if actor != ActorRole::Applicant {
            return Err(WithdrawError::Unauthorized(actor));
        }
        let status = self.record.status;
        if StatusCatalog::is_terminal(status) || status == Status::CodeChallenge {
            return Err(WithdrawError::TooLate(status));
        }

        self.record.withdrawn = Some(Withdrawal { at: now, actor });
        Ok(())
    }

    /// Replace the applicant-authored content. `None` leaves a field untouched.
    pub fn update_draft(
        &mut self,
        actor: ActorRole,
        cover_letter: Option<String>,
        answers: Option<BTreeMap<String, String>>,
    ) -> Result<(), DraftError> {
        if self.record.withdrawn.is_some() {
            return Err(DraftError::Withdrawn);
        }
        if actor != ActorRole::Applicant {
            return Err(DraftError::Unauthorized(actor));
        }
        if self.record.status != Status::Applying {
            return Err(DraftError::Locked(self.record.status));
        }

        if let Some(cover_letter) = cover_letter {
            self.record.cover_letter = cover_letter;
        }
        if let Some(answers) = answers {
            self.record.answers = answers;
        }
        Ok(())
    }

    fn apply(
        &mut self,
        to: Status,
        actor: ActorRole,
        now: DateTime<Utc>,
        score: Option<AssessmentScore>,
    ) -> Result<(), PolicyError> {
        if self.record.withdrawn.is_some() {
            return Err(PolicyError::Withdrawn);
        }
        TransitionPolicy::validate(self.record.status, to, actor)?;
        if let Some(score) = score.filter(|score| score.passed > score.total) {
            return Err(PolicyError::InvalidScore {
                passed: score.passed,
                total: score.total,
            });
        }

        let deadline = (to == Status::CodeChallenge).then(|| self.deadline_from(now));

        self.record.status_history.push(StatusChange {
            status: to,
            at: now,
            actor,
        });
        self.record.status = to;
        self.record.assessment_deadline = deadline;
        if score.is_some() {
            self.record.assessment_score = score;
        }
        Ok(())
    }

    fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.record.assessment_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
