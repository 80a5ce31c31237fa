//! Job application lifecycle: the status graph, who may walk it, the per-application
//! aggregate, code-challenge deadlines, and the gateway that persists and publishes
//! every accepted change.

pub mod assessment;
pub mod catalog;
pub mod clock;
pub mod domain;
pub mod gateway;
pub mod lifecycle;
pub mod policy;
pub mod repository;
pub mod router;
pub mod timer;

#[cfg(test)]
mod tests;

pub use assessment::{
    AssessmentScore, CodeExecutor, CodeSubmission, ExecutionError, ExecutionReport, TestCase,
};
pub use catalog::{StatusCatalog, TransitionRule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    ActorParseError, ActorRole, ApplicantId, ApplicationId, JobId, Status, StatusChange,
    StatusParseError, Withdrawal,
};
pub use gateway::{GatewayError, LifecycleGateway};
pub use lifecycle::{ApplicationLifecycle, DraftError, WithdrawError};
pub use policy::{PolicyError, TransitionPolicy};
pub use repository::{
    ApplicationRecord, ApplicationRepository, ApplicationStatusView, NotifyError,
    RepositoryError, StatusChangeEvent, StatusNotifier,
};
pub use router::{application_router, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use timer::{ArmOutcome, AssessmentTimer, DeadlineHandler, TimerError, TimerState};
