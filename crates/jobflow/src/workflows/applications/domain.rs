use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for job applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl ApplicationId {
    /// Draw the next identifier from the process-wide sequence.
    pub fn next() -> Self {
        let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        ApplicationId(format!("app-{id:06}"))
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a job posting owned by the external job store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

/// Reference to a job seeker owned by the external user store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicantId(pub String);

/// Where an application sits in the hiring workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Applying,
    Applied,
    InReview,
    Shortlisted,
    CodeChallenge,
    Rejected,
    Accepted,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Applying,
        Status::Applied,
        Status::InReview,
        Status::Shortlisted,
        Status::CodeChallenge,
        Status::Rejected,
        Status::Accepted,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Status::Applying => "applying",
            Status::Applied => "applied",
            Status::InReview => "in_review",
            Status::Shortlisted => "shortlisted",
            Status::CodeChallenge => "code_challenge",
            Status::Rejected => "rejected",
            Status::Accepted => "accepted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reasons a status label could not be mapped onto [`Status`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusParseError {
    #[error("withdrawal is not a status; use the withdraw operation instead")]
    Withdrawn,
    #[error("unknown application status '{0}'")]
    Unknown(String),
}

/// Collapse case, whitespace, `-` and `_` so `In Review`, `in-review` and `InReview` agree.
fn normalize_label(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for Status {
    type Err = StatusParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match normalize_label(raw).as_str() {
            "applying" => Ok(Status::Applying),
            "applied" => Ok(Status::Applied),
            "inreview" => Ok(Status::InReview),
            "shortlisted" => Ok(Status::Shortlisted),
            "codechallenge" => Ok(Status::CodeChallenge),
            "rejected" => Ok(Status::Rejected),
            "accepted" => Ok(Status::Accepted),
            "withdrawn" => Err(StatusParseError::Withdrawn),
            _ => Err(StatusParseError::Unknown(raw.trim().to_string())),
        }
    }
}

/// Permission class of whoever requests a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActorRole {
    Applicant,
    Employer,
    SystemTimer,
}

impl ActorRole {
    pub const ALL: [ActorRole; 3] = [
        ActorRole::Applicant,
        ActorRole::Employer,
        ActorRole::SystemTimer,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ActorRole::Applicant => "applicant",
            ActorRole::Employer => "employer",
            ActorRole::SystemTimer => "system-timer",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown actor role '{0}'")]
pub struct ActorParseError(pub String);

impl FromStr for ActorRole {
    type Err = ActorParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match normalize_label(raw).as_str() {
            "applicant" => Ok(ActorRole::Applicant),
            "employer" => Ok(ActorRole::Employer),
            "systemtimer" => Ok(ActorRole::SystemTimer),
            _ => Err(ActorParseError(raw.trim().to_string())),
        }
    }
}

/// One entry of an application's append-only status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: Status,
    pub at: DateTime<Utc>,
    pub actor: ActorRole,
}

/// Marker recorded when the applicant pulls out of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub at: DateTime<Utc>,
    pub actor: ActorRole,
}
