use serde::{Deserialize, Serialize};

/// Graded result of a code challenge, recorded when the challenge is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentScore {
    pub passed: u32,
    pub total: u32,
}

impl AssessmentScore {
    pub fn ratio(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f32 / self.total as f32
        }
    }
}

/// Source handed to the remote execution sandbox along with its test cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSubmission {
    pub language: String,
    pub source: String,
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// Pass/fail counts reported back by the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub passed: u32,
    pub failed: u32,
}

impl From<ExecutionReport> for AssessmentScore {
    fn from(report: ExecutionReport) -> Self {
        AssessmentScore {
            passed: report.passed,
            total: report.passed.saturating_add(report.failed),
        }
    }
}

/// Code-execution collaborator (a remote judge in production).
pub trait CodeExecutor: Send + Sync {
    fn execute(&self, submission: &CodeSubmission) -> Result<ExecutionReport, ExecutionError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("execution sandbox unavailable: {0}")]
    Unavailable(String),
    #[error("submission rejected by sandbox: {0}")]
    Rejected(String),
}
