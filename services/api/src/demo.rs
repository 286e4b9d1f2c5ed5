use crate::infra::{
    demo_framework, load_framework, InMemoryAssessmentRepository, LoggingNotifier,
    NoEvidenceStore,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::Args;
use sglgb::assessment::{
    AssessmentFramework, AssessmentId, AssessmentRecord, AssessmentService,
    AssessmentServiceError, Clock, ComplianceStatus, CyclePolicy, EvaluationReport,
    FieldValueMap, IndicatorId, NewAssessment, Notification, NotificationError,
    NotificationPublisher, ReviewInput, Role, TransitionAction,
    TransitionOutcome, TransitionRequest, TypedValue,
};
use sglgb::error::AppError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type DemoService = AssessmentService<InMemoryAssessmentRepository, DemoOutbox, NoEvidenceStore>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Barangay whose assessment is walked through
    #[arg(long, default_value = "San Isidro")]
    pub(crate) barangay: String,
    /// Print the final evaluation report as JSON
    #[arg(long)]
    pub(crate) show_report: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ValidateArgs {
    /// Framework JSON file to validate
    pub(crate) path: PathBuf,
}

/// Logs like the server's notifier and keeps each notification for the closing summary.
#[derive(Default)]
struct DemoOutbox {
    sent: Mutex<Vec<Notification>>,
}

impl NotificationPublisher for DemoOutbox {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        LoggingNotifier.notify(notification.clone())?;
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        Ok(())
    }
}

impl DemoOutbox {
    fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Deterministic clock for the walkthrough: each reading is one minute after the last.
struct DemoClock {
    start: DateTime<Utc>,
    ticks: AtomicI64,
}

impl DemoClock {
    fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2025, 3, 3, 8, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            start,
            ticks: AtomicI64::new(0),
        }
    }
}

impl Clock for DemoClock {
    fn now(&self) -> DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        self.start + Duration::minutes(tick)
    }
}

pub(crate) fn run_validate(args: ValidateArgs) -> Result<(), AppError> {
    let framework = load_framework(Some(args.path.as_path()))?;
    print_framework(&framework);
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        barangay,
        show_report,
    } = args;

    let framework = demo_framework()?;
    println!("SGLGB assessment walkthrough");
    print_framework(&framework);

    let outbox = Arc::new(DemoOutbox::default());
    let service = AssessmentService::with_clock(
        Arc::new(framework),
        Arc::new(InMemoryAssessmentRepository::default()),
        outbox.clone(),
        Arc::new(NoEvidenceStore),
        CyclePolicy::default(),
        Arc::new(DemoClock::new()),
    );

    let record = match walkthrough(&service, &barangay) {
        Ok(record) => record,
        Err(err) => {
            println!("  Walkthrough halted: {err}");
            return Ok(());
        }
    };

    println!("\nTransition log for {}", record.id);
    for entry in record.transitions.records() {
        let outcome = match &entry.outcome {
            TransitionOutcome::Committed => "committed".to_string(),
            TransitionOutcome::Rejected { violation } => format!("rejected: {violation}"),
        };
        println!(
            "  - {} by {}: {} -> {} [{}]",
            entry.action.label(),
            entry.actor.label(),
            entry.from.label(),
            entry.to.label(),
            outcome
        );
    }

    println!("Notifications:");
    for event in outbox.sent() {
        println!(
            "  - {} now {}; notify {}",
            event.assessment_id,
            event.status.label(),
            event.recipient.label()
        );
    }

    if let Some(report) = record.evaluation.as_ref() {
        print_report(report);
        if show_report {
            match serde_json::to_string_pretty(report) {
                Ok(json) => println!("Evaluation report:\n{json}"),
                Err(err) => println!("Evaluation report unavailable: {err}"),
            }
        }
    }

    Ok(())
}

fn walkthrough(
    service: &DemoService,
    barangay: &str,
) -> Result<AssessmentRecord, AssessmentServiceError> {
    let record = service.create(NewAssessment {
        barangay: barangay.to_string(),
    })?;
    let assessment = record.id.clone();
    println!("\nOpened {} for barangay {}", assessment, record.barangay);

    for (indicator, values) in initial_answers() {
        service.record_responses(&assessment, &indicator, Role::Blgu, values, None)?;
    }
    let report = service.evaluate(&assessment)?;
    println!(
        "  BLGU answers recorded; failing indicators: {}",
        join(&report.failing())
    );

    act(service, &assessment, TransitionAction::Submit, Role::Blgu)?;
    act(service, &assessment, TransitionAction::BeginReview, Role::Assessor)?;

    // Shows a guard rejection; the manual indicator has no recorded status yet.
    if let Err(err) = act(service, &assessment, TransitionAction::Finalize, Role::Assessor) {
        println!("  Finalize rejected: {err}");
    }

    review(service, &assessment, "5.1", Some(ComplianceStatus::Pass), None)?;
    review(
        service,
        &assessment,
        "1.1",
        None,
        Some("Photo documentation of the bulletin board posting is missing"),
    )?;
    review(
        service,
        &assessment,
        "1.3",
        None,
        Some("Collection rate below 80%; considered under the 60% allowance"),
    )?;

    let reworked = act(service, &assessment, TransitionAction::SendRework, Role::Assessor)?;
    let flagged: Vec<IndicatorId> = reworked.state.flagged_indicators.iter().cloned().collect();
    println!("  Flagged for rework: {}", join(&flagged));

    service.record_responses(
        &assessment,
        &IndicatorId::from("1.1"),
        Role::Blgu,
        FieldValueMap::new()
            .with("bulletin_board_posted", TypedValue::Boolean(true))
            .with("posting_photos", TypedValue::Boolean(true)),
        None,
    )?;

    act(service, &assessment, TransitionAction::Resubmit, Role::Blgu)?;
    act(service, &assessment, TransitionAction::Finalize, Role::Assessor)?;
    act(service, &assessment, TransitionAction::Approve, Role::Validator)?;
    act(service, &assessment, TransitionAction::Approve, Role::Admin)
}

fn act(
    service: &DemoService,
    assessment: &AssessmentId,
    action: TransitionAction,
    actor: Role,
) -> Result<AssessmentRecord, AssessmentServiceError> {
    let record = service.transition(assessment, TransitionRequest::new(action, actor), None)?;
    println!(
        "  {} ({}) -> {}",
        action.label(),
        actor.label(),
        record.status().label()
    );
    Ok(record)
}

fn review(
    service: &DemoService,
    assessment: &AssessmentId,
    indicator: &str,
    status: Option<ComplianceStatus>,
    comment: Option<&str>,
) -> Result<AssessmentRecord, AssessmentServiceError> {
    service.record_review(
        assessment,
        &IndicatorId::from(indicator),
        Role::Assessor,
        ReviewInput {
            status,
            comment: comment.map(str::to_string),
        },
        None,
    )
}

fn initial_answers() -> Vec<(IndicatorId, FieldValueMap)> {
    let text = TypedValue::text;
    vec![
        (
            "1.1".into(),
            FieldValueMap::new()
                .with("bulletin_board_posted", TypedValue::Boolean(true))
                .with("posting_photos", TypedValue::Boolean(false)),
        ),
        (
            "1.2".into(),
            FieldValueMap::new().with("budget_approved_on_time", text("yes")),
        ),
        (
            "1.3".into(),
            FieldValueMap::new().with("collection_rate", TypedValue::Number(72.0)),
        ),
        (
            "2.1".into(),
            FieldValueMap::new()
                .with("plan_approved", TypedValue::Boolean(true))
                .with("fund_allocation", text("yes"))
                .with("early_warning", text("yes"))
                .with("evacuation_center", text("no")),
        ),
        (
            "3.1.1".into(),
            FieldValueMap::new().with("bpoc_organized", TypedValue::Boolean(true)),
        ),
        (
            "3.1.2".into(),
            FieldValueMap::new()
                .with("patrol_logs", text("2024 patrol logbook"))
                .with("tanod_roster", text("roster-2024.pdf")),
        ),
        (
            "3.1.3".into(),
            FieldValueMap::new().with(
                "badac_programs",
                TypedValue::set(["drug-awareness", "rehabilitation-referral"]),
            ),
        ),
        (
            "4.1".into(),
            FieldValueMap::new()
                .with("bcpc_organized", text("yes"))
                .with("bcpc_plan", text("yes"))
                .with("vaw_desk", text("yes"))
                .with("seniors_list", text("no")),
        ),
        (
            "6.1".into(),
            FieldValueMap::new()
                .with("materials_recovery", text("operational"))
                .with("segregation_ordinance", text("drafted")),
        ),
    ]
}

fn print_framework(framework: &AssessmentFramework) {
    println!(
        "Framework '{}': {} indicators, {} BBIs, {} governance areas",
        framework.name(),
        framework.indicators().count(),
        framework.bbi_names().len(),
        framework.areas().len()
    );
}

fn print_report(report: &EvaluationReport) {
    println!("Indicator results:");
    for (indicator, verdict) in &report.verdicts {
        println!("  - {indicator}: {}", verdict.label);
    }
    for (bbi, status) in &report.bbis {
        println!("  - {bbi}: {} ({})", status.label, status.explanation);
    }
    match report.compliance.as_ref() {
        Some(verdict) => {
            for area in &verdict.areas {
                println!(
                    "  {} {}: {}/{} passed",
                    area.area_id, area.name, area.passed_count, area.total_count
                );
            }
            let outcome = if verdict.passed { "PASSED" } else { "FAILED" };
            println!("SGLGB verdict: {outcome} ({})", verdict.decided_by);
        }
        None => println!(
            "SGLGB verdict: pending ({})",
            report.compliance_blocked_by.as_deref().unwrap_or("undetermined indicators")
        ),
    }
}

fn join(ids: &[IndicatorId]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(IndicatorId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
