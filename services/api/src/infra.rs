use jobflow::workflows::applications::{
    ApplicationId, ApplicationRecord, ApplicationRepository, CodeExecutor, CodeSubmission,
    ExecutionError, ExecutionReport, NotifyError, RepositoryError, Status, StatusChangeEvent,
    StatusNotifier,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryApplicationRepository {
    records: Arc<Mutex<HashMap<ApplicationId, ApplicationRecord>>>,
}

impl InMemoryApplicationRepository {
    fn records(&self) -> MutexGuard<'_, HashMap<ApplicationId, ApplicationRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ApplicationRepository for InMemoryApplicationRepository {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        let mut guard = self.records();
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        Ok(self.records().get(id).cloned())
    }

    fn save(&self, record: &ApplicationRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records();
        match guard.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn in_status(&self, status: Status) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        Ok(self
            .records()
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect())
    }
}

/// Notifier that writes every status change to the log and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingNotifier;

impl StatusNotifier for TracingNotifier {
    fn publish(&self, event: StatusChangeEvent) -> Result<(), NotifyError> {
        info!(
            application_id = %event.application_id,
            from = %event.from,
            to = %event.to,
            actor = %event.actor,
            at = %event.at,
            "status change published"
        );
        Ok(())
    }
}

/// Offline stand-in for the sandboxed runner: a test case passes when its expected output
/// appears verbatim in the submitted source.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TranscriptExecutor;

impl CodeExecutor for TranscriptExecutor {
    fn execute(&self, submission: &CodeSubmission) -> Result<ExecutionReport, ExecutionError> {
        if submission.test_cases.is_empty() {
            return Err(ExecutionError::Rejected(
                "submission carries no test cases".to_string(),
            ));
        }
        let passed = submission
            .test_cases
            .iter()
            .filter(|case| submission.source.contains(case.expected_output.trim()))
            .count();
        let passed = u32::try_from(passed).unwrap_or(u32::MAX);
        let total = u32::try_from(submission.test_cases.len()).unwrap_or(u32::MAX);
        Ok(ExecutionReport {
            passed,
            failed: total.saturating_sub(passed),
        })
    }
}
