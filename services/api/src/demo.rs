use crate::infra::{InMemoryApplicationRepository, TracingNotifier, TranscriptExecutor};
use clap::Args;
use jobflow::config::LifecycleConfig;
use jobflow::error::AppError;
use jobflow::workflows::applications::{
    ActorRole, ApplicantId, ApplicationId, ApplicationRecord, CodeSubmission, GatewayError, JobId,
    LifecycleGateway, NotifyError, Status, StatusChangeEvent, StatusNotifier, TestCase,
    TimerState,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const DEMO_WINDOW_SECS: u64 = 2;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Seconds the applicant gets to finish the code challenge.
    #[arg(long, default_value_t = DEMO_WINDOW_SECS)]
    pub(crate) assessment_window_secs: u64,
    /// Hand the challenge in right away instead of waiting for the deadline to expire.
    #[arg(long)]
    pub(crate) skip_timer: bool,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            assessment_window_secs: DEMO_WINDOW_SECS,
            skip_timer: false,
        }
    }
}

/// Logs like the service notifier and also keeps the events so the demo can print them.
#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<StatusChangeEvent>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<StatusChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatusNotifier for RecordingNotifier {
    fn publish(&self, event: StatusChangeEvent) -> Result<(), NotifyError> {
        TracingNotifier.publish(event.clone())?;
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

type DemoGateway = LifecycleGateway<InMemoryApplicationRepository, RecordingNotifier>;

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        assessment_window_secs,
        skip_timer,
    } = args;

    let config = LifecycleConfig {
        assessment_window: Duration::from_secs(assessment_window_secs.max(1)),
        ..LifecycleConfig::default()
    };
    let notifier = Arc::new(RecordingNotifier::default());
    let gateway = LifecycleGateway::new(
        Arc::new(InMemoryApplicationRepository::default()),
        notifier.clone(),
        config.clone(),
    );

    println!("Job application lifecycle demo");
    let applicant = ApplicantId("demo-applicant".to_string());
    let record = gateway.open(JobId("job-backend-rust".to_string()), applicant.clone())?;
    let id = record.id.clone();
    render_step("opened", &record);

    let answers = BTreeMap::from([
        ("years_of_rust".to_string(), "4".to_string()),
        ("remote".to_string(), "yes".to_string()),
    ]);
    let record = gateway.update_draft(
        &id,
        ActorRole::Applicant,
        &applicant,
        Some("I enjoy building reliable services.".to_string()),
        Some(answers),
    )?;
    println!(
        "- Draft saved ({} answers, cover letter {} chars)",
        record.answers.len(),
        record.cover_letter.len()
    );

    let record = gateway.transition_as_applicant(&id, Status::Applied, &applicant)?;
    render_step(ActorRole::Applicant.label(), &record);
    for status in [Status::InReview, Status::Shortlisted] {
        let record = gateway.transition(&id, status, ActorRole::Employer)?;
        render_step(ActorRole::Employer.label(), &record);
    }

    match gateway.transition(&id, Status::Accepted, ActorRole::Employer) {
        Ok(record) => render_step("unexpected accept", &record),
        Err(err) => println!("- Skipping straight to accepted refused: {err}"),
    }

    let record = gateway.transition(&id, Status::CodeChallenge, ActorRole::Employer)?;
    render_step(ActorRole::Employer.label(), &record);
    if let TimerState::Armed { deadline } = gateway.timer_state(&id) {
        println!("  Assessment timer armed until {deadline}");
    }

    if skip_timer {
        let record =
            gateway.grade_submission(&id, &applicant, &TranscriptExecutor, &demo_submission())?;
        render_step(ActorRole::Applicant.label(), &record);
        if let Some(score) = record.assessment_score {
            println!(
                "  Graded {}/{} test cases ({:.0}%)",
                score.passed,
                score.total,
                score.ratio() * 100.0
            );
        }
    } else {
        println!(
            "  Waiting {}s for the challenge deadline to lapse...",
            config.assessment_window.as_secs()
        );
        let record = wait_for_deadline(&gateway, &id, config.assessment_window).await?;
        render_step("deadline", &record);
    }

    let record = gateway.transition(&id, Status::Accepted, ActorRole::Employer)?;
    render_step(ActorRole::Employer.label(), &record);

    let second = gateway.open(JobId("job-platform".to_string()), applicant.clone())?;
    gateway.transition_as_applicant(&second.id, Status::Applied, &applicant)?;
    let withdrawn = gateway.withdraw(&second.id, ActorRole::Applicant, &applicant)?;
    println!(
        "- Second application {} withdrawn while {}",
        withdrawn.id, withdrawn.status
    );

    match serde_json::to_string_pretty(&record.status_view()) {
        Ok(json) => println!("  Final status payload:\n{json}"),
        Err(err) => println!("  Final status payload unavailable: {err}"),
    }

    println!("  Published status changes:");
    for event in notifier.events() {
        println!(
            "    - {} {} -> {} by {}",
            event.application_id, event.from, event.to, event.actor
        );
    }

    Ok(())
}

async fn wait_for_deadline(
    gateway: &DemoGateway,
    id: &ApplicationId,
    window: Duration,
) -> Result<ApplicationRecord, GatewayError> {
    tokio::time::sleep(window).await;
    let mut record = gateway.get(id)?;
    for _ in 0..50 {
        if record.status != Status::CodeChallenge {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        record = gateway.get(id)?;
    }
    Ok(record)
}

fn render_step(label: &str, record: &ApplicationRecord) {
    let view = record.status_view();
    let next = if view.allowed_next.is_empty() {
        "none".to_string()
    } else {
        view.allowed_next.join(", ")
    };
    println!(
        "- [{label}] {} -> {} (next: {next})",
        view.application_id, view.status
    );
}

fn demo_submission() -> CodeSubmission {
    CodeSubmission {
        language: "rust".to_string(),
        source: "fn main() { let n: u32 = 6; println!(\"{}\", n * 7); } // prints 42".to_string(),
        test_cases: vec![
            TestCase {
                input: String::new(),
                expected_output: "42".to_string(),
            },
            TestCase {
                input: String::new(),
                expected_output: "prints".to_string(),
            },
        ],
    }
}
