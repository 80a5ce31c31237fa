//! Deadline enforcement for the `CodeChallenge` status.
//!
//! Each armed application owns one tokio task that sleeps until the deadline. Firing and
//! disarming both go through the slot map under a single lock, and a slot is only claimed
//! by the task whose generation still matches, so exactly one of them wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::clock::Clock;
use super::domain::{ApplicationId, Status};
use super::lifecycle::ApplicationLifecycle;

/// Receives the single firing of an armed deadline.
pub trait DeadlineHandler: Send + Sync + 'static {
    fn deadline_reached(&self, application_id: &ApplicationId, deadline: DateTime<Utc>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed { deadline: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Scheduled {
        deadline: DateTime<Utc>,
        fires_in: Duration,
    },
    /// The deadline had already passed; the firing is queued right away.
    FiringImmediately { deadline: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("application {id} is {status}, not in a code challenge")]
    NotInChallenge { id: ApplicationId, status: Status },
    #[error("application {0} has no assessment deadline")]
    MissingDeadline(ApplicationId),
    #[error("assessment timers need a running tokio runtime")]
    NoRuntime,
}

/// Returned to whichever side loses a fire/disarm race; never surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerRaceLost;

struct ArmedSlot {
    generation: u64,
    deadline: DateTime<Utc>,
    task: JoinHandle<()>,
}

struct TimerInner {
    slots: Mutex<HashMap<ApplicationId, ArmedSlot>>,
    generation: AtomicU64,
    clock: Arc<dyn Clock>,
    handler: Weak<dyn DeadlineHandler>,
}

impl TimerInner {
    fn slots(&self) -> MutexGuard<'_, HashMap<ApplicationId, ArmedSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(
        &self,
        application_id: &ApplicationId,
        generation: u64,
    ) -> Result<DateTime<Utc>, TimerRaceLost> {
        let mut slots = self.slots();
        match slots.get(application_id) {
            Some(slot) if slot.generation == generation => slots
                .remove(application_id)
                .map(|slot| slot.deadline)
                .ok_or(TimerRaceLost),
            _ => Err(TimerRaceLost),
        }
    }

    fn fire(&self, application_id: &ApplicationId, generation: u64) {
        match self.claim(application_id, generation) {
            Ok(deadline) => {
                info!(application_id = %application_id, %deadline, "assessment deadline reached");
                if let Some(handler) = self.handler.upgrade() {
                    handler.deadline_reached(application_id, deadline);
                }
            }
            Err(TimerRaceLost) => {
                debug!(application_id = %application_id, generation, "timer race lost; skipping fire");
            }
        }
    }
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, slot) in slots.drain() {
            slot.task.abort();
        }
    }
}

/// Arm/disarm/fire coordinator for code-challenge deadlines.
pub struct AssessmentTimer {
    inner: Arc<TimerInner>,
}

impl AssessmentTimer {
    pub fn new(clock: Arc<dyn Clock>, handler: Weak<dyn DeadlineHandler>) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(1),
                clock,
                handler,
            }),
        }
    }

    /// Convenience constructor for handlers owned elsewhere.
    pub fn with_handler<H: DeadlineHandler>(clock: Arc<dyn Clock>, handler: &Arc<H>) -> Self {
        let handler: Weak<H> = Arc::downgrade(handler);
        Self::new(clock, handler)
    }

    /// Schedule the deadline of an application sitting in `CodeChallenge`. Re-arming replaces
    /// any earlier deadline for the same id.
    pub fn arm(&self, lifecycle: &ApplicationLifecycle) -> Result<ArmOutcome, TimerError> {
        let id = lifecycle.id();
        if lifecycle.status() != Status::CodeChallenge {
            return Err(TimerError::NotInChallenge {
                id: id.clone(),
                status: lifecycle.status(),
            });
        }
        let deadline = lifecycle
            .assessment_deadline()
            .ok_or_else(|| TimerError::MissingDeadline(id.clone()))?;
        let delay = (deadline - self.inner.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.schedule(id, deadline, delay)?;

        info!(application_id = %id, %deadline, delay_secs = delay.as_secs(), "assessment timer armed");

        if delay.is_zero() {
            Ok(ArmOutcome::FiringImmediately { deadline })
        } else {
            Ok(ArmOutcome::Scheduled {
                deadline,
                fires_in: delay,
            })
        }
    }

    /// Fire `deadline` again after `backoff`, for a handler that could not act on the first
    /// firing. Replaces whatever is armed for the id.
    pub fn retry(
        &self,
        application_id: &ApplicationId,
        deadline: DateTime<Utc>,
        backoff: Duration,
    ) -> Result<(), TimerError> {
        self.schedule(application_id, deadline, backoff)?;
        debug!(
            application_id = %application_id,
            %deadline,
            backoff_secs = backoff.as_secs(),
            "assessment deadline re-queued"
        );
        Ok(())
    }

    fn schedule(
        &self,
        application_id: &ApplicationId,
        deadline: DateTime<Utc>,
        delay: Duration,
    ) -> Result<(), TimerError> {
        let runtime = Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        // Spawn under the lock so the task cannot look for its slot before it exists.
        let mut slots = self.inner.slots();
        if let Some(previous) = slots.remove(application_id) {
            previous.task.abort();
        }
        let weak = Arc::downgrade(&self.inner);
        let task_id = application_id.clone();
        let task = runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(inner) = weak.upgrade() {
                inner.fire(&task_id, generation);
            }
        });
        slots.insert(
            application_id.clone(),
            ArmedSlot {
                generation,
                deadline,
                task,
            },
        );
        Ok(())
    }

    /// Cancel a pending deadline. Returns whether one was armed; calling it again is a no-op.
    pub fn disarm(&self, application_id: &ApplicationId) -> bool {
        let removed = self.inner.slots().remove(application_id);
        match removed {
            Some(slot) => {
                slot.task.abort();
                debug!(application_id = %application_id, "assessment timer disarmed");
                true
            }
            None => false,
        }
    }

    pub fn state(&self, application_id: &ApplicationId) -> TimerState {
        self.inner
            .slots()
            .get(application_id)
            .map_or(TimerState::Idle, |slot| TimerState::Armed {
                deadline: slot.deadline,
            })
    }

    pub fn armed_count(&self) -> usize {
        self.inner.slots().len()
    }

    #[cfg(test)]
    pub(crate) fn generation_of(&self, application_id: &ApplicationId) -> Option<u64> {
        self.inner
            .slots()
            .get(application_id)
            .map(|slot| slot.generation)
    }

    #[cfg(test)]
    pub(crate) fn fire_now(&self, application_id: &ApplicationId, generation: u64) {
        self.inner.fire(application_id, generation);
    }
}
