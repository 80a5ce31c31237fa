use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::assessment::{AssessmentScore, CodeExecutor, CodeSubmission, ExecutionError};
use super::catalog::StatusCatalog;
use super::clock::{Clock, SystemClock};
use super::domain::{ActorRole, ApplicantId, ApplicationId, JobId, Status};
use super::lifecycle::{ApplicationLifecycle, DraftError, WithdrawError};
use super::policy::PolicyError;
use super::repository::{
    ApplicationRecord, ApplicationRepository, RepositoryError, StatusChangeEvent, StatusNotifier,
};
use super::timer::{AssessmentTimer, DeadlineHandler, TimerError, TimerState};
use crate::config::LifecycleConfig;

/// Error raised by the lifecycle gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Withdraw(#[from] WithdrawError),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Timer(#[from] TimerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("failed to persist application {id} after {attempts} attempt(s)")]
    Persistence {
        id: ApplicationId,
        attempts: u32,
        #[source]
        source: RepositoryError,
    },
    #[error("requester does not own application {0}")]
    NotOwner(ApplicationId),
    #[error("applicant requests must name the requesting applicant")]
    RequesterRequired,
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// First wait before a deadline whose automatic submit failed is tried again.
const DEADLINE_RETRY_BASE: Duration = Duration::from_secs(5);
const DEADLINE_RETRY_MAX: Duration = Duration::from_secs(300);

fn deadline_backoff(failures: u32) -> Duration {
    DEADLINE_RETRY_BASE
        .saturating_mul(1 << failures.saturating_sub(1).min(6))
        .min(DEADLINE_RETRY_MAX)
}

/// Per-application serialization point; holds the last persisted lifecycle when known.
#[derive(Default)]
struct Slot {
    cached: Option<ApplicationLifecycle>,
}

/// Only applications that can still change stay cached.
fn is_live(lifecycle: &ApplicationLifecycle) -> bool {
    !lifecycle.is_withdrawn() && !StatusCatalog::is_terminal(lifecycle.status())
}

fn ensure_owner(
    lifecycle: &ApplicationLifecycle,
    requester: &ApplicantId,
) -> Result<(), GatewayError> {
    if &lifecycle.record().applicant_id != requester {
        return Err(GatewayError::NotOwner(lifecycle.id().clone()));
    }
    Ok(())
}

struct GatewayInner<R, N> {
    repository: Arc<R>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    slots: Mutex<HashMap<ApplicationId, Arc<Mutex<Slot>>>>,
    deadline_failures: Mutex<HashMap<ApplicationId, u32>>,
    timer: AssessmentTimer,
}

/// Boundary adapter turning requests and timer expiries into lifecycle transitions.
///
/// Operations on one application id are serialized; different ids proceed independently.
pub struct LifecycleGateway<R, N> {
    inner: Arc<GatewayInner<R, N>>,
}

impl<R, N> LifecycleGateway<R, N>
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    pub fn new(repository: Arc<R>, notifier: Arc<N>, config: LifecycleConfig) -> Self {
        Self::with_clock(repository, notifier, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repository: Arc<R>,
        notifier: Arc<N>,
        config: LifecycleConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<GatewayInner<R, N>>| {
            let handler: Weak<GatewayInner<R, N>> = weak.clone();
            GatewayInner {
                timer: AssessmentTimer::new(clock.clone(), handler),
                repository,
                notifier,
                clock,
                config,
                slots: Mutex::new(HashMap::new()),
                deadline_failures: Mutex::new(HashMap::new()),
            }
        });
        Self { inner }
    }

    /// Start an application for `applicant_id` on `job_id`.
    pub fn open(
        &self,
        job_id: JobId,
        applicant_id: ApplicantId,
    ) -> Result<ApplicationRecord, GatewayError> {
        let lifecycle = ApplicationLifecycle::create(job_id, applicant_id, self.inner.clock.now())
            .with_assessment_window(self.inner.config.assessment_window);

        let stored = self.inner.repository.insert(lifecycle.record().clone())?;
        let slot = self.inner.slot(&stored.id);
        let guard = self.inner.lock_slot(&slot);
        self.inner.release(
            &stored.id,
            &slot,
            guard,
            Some(ApplicationLifecycle::from_record(stored.clone())),
        );

        info!(application_id = %stored.id, job_id = %stored.job_id.0, "application opened");
        Ok(stored)
    }

    pub fn get(&self, id: &ApplicationId) -> Result<ApplicationRecord, GatewayError> {
        let slot = self.inner.slot(id);
        let mut guard = self.inner.lock_slot(&slot);
        let lifecycle = match guard.cached.take() {
            Some(lifecycle) => lifecycle,
            None => match self.inner.load(id) {
                Ok(lifecycle) => lifecycle,
                Err(err) => {
                    self.inner.release(id, &slot, guard, None);
                    return Err(err);
                }
            },
        };
        let record = lifecycle.record().clone();
        self.inner.release(id, &slot, guard, Some(lifecycle));
        Ok(record)
    }

    /// Move an application on behalf of an employer or the system. Applicant moves go
    /// through [`LifecycleGateway::transition_as_applicant`] so ownership is checked.
    pub fn transition(
        &self,
        id: &ApplicationId,
        to: Status,
        actor: ActorRole,
    ) -> Result<ApplicationRecord, GatewayError> {
        if actor == ActorRole::Applicant {
            return Err(GatewayError::RequesterRequired);
        }
        self.inner.mutate(id, |lifecycle, now| {
            lifecycle
                .request_transition(to, actor, now)
                .map_err(GatewayError::from)
        })
    }

    pub fn transition_as_applicant(
        &self,
        id: &ApplicationId,
        to: Status,
        requester: &ApplicantId,
    ) -> Result<ApplicationRecord, GatewayError> {
        self.inner.mutate(id, |lifecycle, now| {
            ensure_owner(lifecycle, requester)?;
            lifecycle
                .request_transition(to, ActorRole::Applicant, now)
                .map_err(GatewayError::from)
        })
    }

    /// Hand in the code challenge without a graded result.
    pub fn submit_assessment(
        &self,
        id: &ApplicationId,
        requester: &ApplicantId,
    ) -> Result<ApplicationRecord, GatewayError> {
        self.hand_in(id, requester, None)
    }

    /// Run the submission through the execution sandbox, then hand in the challenge with
    /// the resulting score.
    pub fn grade_submission<E>(
        &self,
        id: &ApplicationId,
        requester: &ApplicantId,
        executor: &E,
        submission: &CodeSubmission,
    ) -> Result<ApplicationRecord, GatewayError>
    where
        E: CodeExecutor + ?Sized,
    {
        let current = self.get(id)?;
        if &current.applicant_id != requester {
            return Err(GatewayError::NotOwner(current.id));
        }
        if current.status != Status::CodeChallenge {
            return Err(PolicyError::IllegalTransition {
                from: current.status,
                to: Status::InReview,
            }
            .into());
        }

        let report = executor.execute(submission)?;
        self.hand_in(id, requester, Some(report.into()))
    }

    fn hand_in(
        &self,
        id: &ApplicationId,
        requester: &ApplicantId,
        score: Option<AssessmentScore>,
    ) -> Result<ApplicationRecord, GatewayError> {
        self.inner.mutate(id, |lifecycle, now| {
            ensure_owner(lifecycle, requester)?;
            lifecycle
                .submit_assessment(ActorRole::Applicant, score, now)
                .map_err(GatewayError::from)
        })
    }

    pub fn withdraw(
        &self,
        id: &ApplicationId,
        actor: ActorRole,
        requester: &ApplicantId,
    ) -> Result<ApplicationRecord, GatewayError> {
        let record = self.inner.mutate(id, |lifecycle, now| {
            ensure_owner(lifecycle, requester)?;
            lifecycle.withdraw(actor, now).map_err(GatewayError::from)
        })?;
        info!(application_id = %id, status = %record.status, "application withdrawn");
        Ok(record)
    }

    pub fn update_draft(
        &self,
        id: &ApplicationId,
        actor: ActorRole,
        requester: &ApplicantId,
        cover_letter: Option<String>,
        answers: Option<BTreeMap<String, String>>,
    ) -> Result<ApplicationRecord, GatewayError> {
        self.inner.mutate(id, |lifecycle, _now| {
            ensure_owner(lifecycle, requester)?;
            lifecycle
                .update_draft(actor, cover_letter, answers)
                .map_err(GatewayError::from)
        })
    }

    /// Re-arm deadlines for every stored code challenge, e.g. after a restart. Deadlines
    /// that already passed fire straight away. Returns how many timers were armed.
    pub fn resume_timers(&self) -> Result<usize, GatewayError> {
        let records = self.inner.repository.in_status(Status::CodeChallenge)?;
        let mut armed = 0;
        for record in records {
            let lifecycle = ApplicationLifecycle::from_record(record);
            if lifecycle.assessment_deadline().is_none() || lifecycle.is_withdrawn() {
                warn!(application_id = %lifecycle.id(), "stored code challenge has no usable deadline");
                continue;
            }
            let id = lifecycle.id().clone();
            let slot = self.inner.slot(&id);
            let guard = self.inner.lock_slot(&slot);
            let armed_now = self.inner.timer.arm(&lifecycle);
            self.inner.release(&id, &slot, guard, Some(lifecycle));
            armed_now?;
            armed += 1;
        }
        info!(armed, "assessment timers resumed");
        Ok(armed)
    }

    pub fn timer_state(&self, id: &ApplicationId) -> TimerState {
        self.inner.timer.state(id)
    }

    pub fn armed_timers(&self) -> usize {
        self.inner.timer.armed_count()
    }

    #[cfg(test)]
    pub(crate) fn tracked_slots(&self) -> usize {
        self.inner.slots().len()
    }
}

impl<R, N> GatewayInner<R, N>
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    fn slots(&self) -> MutexGuard<'_, HashMap<ApplicationId, Arc<Mutex<Slot>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, id: &ApplicationId) -> Arc<Mutex<Slot>> {
        self.slots().entry(id.clone()).or_default().clone()
    }

    /// Hand the slot back, caching `lifecycle` only while it can still change. A slot left
    /// empty is dropped from the map once no other caller holds it.
    fn release(
        &self,
        id: &ApplicationId,
        slot: &Arc<Mutex<Slot>>,
        mut guard: MutexGuard<'_, Slot>,
        lifecycle: Option<ApplicationLifecycle>,
    ) {
        guard.cached = lifecycle.filter(is_live);
        if guard.cached.is_some() {
            return;
        }
        drop(guard);

        let mut slots = self.slots();
        // The map and `slot` are the only holders; any other caller would have cloned it
        // through this same lock.
        let unused = Arc::strong_count(slot) == 2
            && slots.get(id).is_some_and(|held| Arc::ptr_eq(held, slot))
            && slot.try_lock().is_ok_and(|held| held.cached.is_none());
        if unused {
            slots.remove(id);
        }
    }

    fn deadline_failures(&self) -> MutexGuard<'_, HashMap<ApplicationId, u32>> {
        self.deadline_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slot<'a>(&self, slot: &'a Arc<Mutex<Slot>>) -> MutexGuard<'a, Slot> {
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self, id: &ApplicationId) -> Result<ApplicationLifecycle, GatewayError> {
        let record = self
            .repository
            .load(id)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(ApplicationLifecycle::from_record(record))
    }

    /// Load, apply `op`, persist, then re-sync the timer and notify, all under the id's slot
    /// lock. A failed save evicts the cached copy so the next call reloads from storage.
    fn mutate<F>(&self, id: &ApplicationId, op: F) -> Result<ApplicationRecord, GatewayError>
    where
        F: FnOnce(&mut ApplicationLifecycle, DateTime<Utc>) -> Result<(), GatewayError>,
    {
        let slot = self.slot(id);
        let mut guard = self.lock_slot(&slot);

        let mut lifecycle = match guard.cached.take() {
            Some(lifecycle) => lifecycle,
            None => match self.load(id) {
                Ok(lifecycle) => lifecycle,
                Err(err) => {
                    self.release(id, &slot, guard, None);
                    return Err(err);
                }
            },
        };
        let before = lifecycle.record().clone();

        if let Err(err) = op(&mut lifecycle, self.clock.now()) {
            self.release(id, &slot, guard, Some(lifecycle));
            return Err(err);
        }

        if lifecycle.record() == &before {
            self.release(id, &slot, guard, Some(lifecycle));
            return Ok(before);
        }

        if let Err(err) = self.persist(lifecycle.record()) {
            self.release(id, &slot, guard, None);
            return Err(err);
        }

        let changed_status = lifecycle.status() != before.status;
        if changed_status {
            self.sync_timer(&lifecycle);
        }
        let record = lifecycle.record().clone();
        self.release(id, &slot, guard, Some(lifecycle));

        if changed_status {
            if let Some(change) = record.status_history.last() {
                info!(
                    application_id = %record.id,
                    from = %before.status,
                    to = %change.status,
                    actor = %change.actor,
                    "application status changed"
                );
                self.notify(StatusChangeEvent {
                    application_id: record.id.clone(),
                    from: before.status,
                    to: change.status,
                    actor: change.actor,
                    at: change.at,
                });
            }
        }

        Ok(record)
    }

    fn persist(&self, record: &ApplicationRecord) -> Result<(), GatewayError> {
        let max_attempts = self.config.persist_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.repository.save(record) {
                Ok(()) => return Ok(()),
                Err(RepositoryError::Unavailable(reason)) if attempt < max_attempts => {
                    warn!(application_id = %record.id, attempt, %reason, "save failed; retrying");
                }
                Err(source) => {
                    error!(application_id = %record.id, attempt, error = %source, "save failed; evicting cached state");
                    return Err(GatewayError::Persistence {
                        id: record.id.clone(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    fn sync_timer(&self, lifecycle: &ApplicationLifecycle) {
        if lifecycle.status() == Status::CodeChallenge {
            if let Err(err) = self.timer.arm(lifecycle) {
                error!(application_id = %lifecycle.id(), error = %err, "failed to arm assessment timer");
            }
        } else {
            self.timer.disarm(lifecycle.id());
        }
    }

    /// Queue another firing of `deadline` after a storage failure, backing off on each
    /// consecutive failure. Skipped when a newer deadline is already armed for the id.
    fn retry_deadline(&self, id: &ApplicationId, deadline: DateTime<Utc>, err: &GatewayError) {
        let slot = self.slot(id);
        let mut guard = self.lock_slot(&slot);

        let failures = {
            let mut failures = self.deadline_failures();
            let count = failures.entry(id.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let backoff = deadline_backoff(failures);

        if self.timer.state(id) == TimerState::Idle {
            warn!(
                application_id = %id,
                error = %err,
                failures,
                backoff_secs = backoff.as_secs(),
                "automatic assessment submit failed; retrying"
            );
            if let Err(timer_err) = self.timer.retry(id, deadline, backoff) {
                error!(application_id = %id, error = %timer_err, "failed to re-queue assessment deadline");
            }
        } else {
            self.deadline_failures().remove(id);
        }

        let cached = guard.cached.take();
        self.release(id, &slot, guard, cached);
    }

    fn notify(&self, event: StatusChangeEvent) {
        let application_id = event.application_id.clone();
        if let Err(err) = self.notifier.publish(event) {
            warn!(application_id = %application_id, error = %err, "status notification dropped");
        }
    }
}

impl<R, N> DeadlineHandler for GatewayInner<R, N>
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    fn deadline_reached(&self, application_id: &ApplicationId, deadline: DateTime<Utc>) {
        let outcome = self.mutate(application_id, |lifecycle, now| {
            let still_due = lifecycle.status() == Status::CodeChallenge
                && lifecycle.assessment_deadline() == Some(deadline);
            if !still_due {
                return Ok(());
            }
            lifecycle
                .submit_assessment(ActorRole::SystemTimer, None, now)
                .map_err(GatewayError::from)
        });

        match outcome {
            Ok(_) => {
                self.deadline_failures().remove(application_id);
            }
            Err(
                err @ (GatewayError::Persistence { .. }
                | GatewayError::Repository(RepositoryError::Unavailable(_))),
            ) => self.retry_deadline(application_id, deadline, &err),
            Err(err) => {
                self.deadline_failures().remove(application_id);
                warn!(application_id = %application_id, error = %err, "automatic assessment submit failed");
            }
        }
    }
}
