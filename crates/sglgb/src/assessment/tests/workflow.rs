use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};

use super::common::*;
use crate::assessment::domain::{ComplianceStatus, FieldId, IndicatorId, Role};
use crate::assessment::workflow::{
    allowed_transitions, decide, AssessmentState, AssessmentStatus, CycleKind, CyclePolicy,
    GuardInputs, GuardViolation, IndicatorReviewState, TransitionAction, TransitionRequest,
};

fn state_in(status: AssessmentStatus) -> AssessmentState {
    let created = Utc
        .with_ymd_and_hms(2025, 3, 3, 8, 0, 0)
        .single()
        .expect("valid timestamp");
    let mut state = AssessmentState::new(created);
    state.status = status;
    state
}

fn review(status: ComplianceStatus, comment: Option<&str>) -> IndicatorReviewState {
    IndicatorReviewState {
        status,
        undetermined: false,
        comment: comment.map(str::to_string),
        has_new_evidence: false,
    }
}

fn guards(entries: Vec<(&str, IndicatorReviewState)>) -> GuardInputs {
    GuardInputs {
        indicators: entries
            .into_iter()
            .map(|(indicator, review)| (id(indicator), review))
            .collect::<BTreeMap<IndicatorId, IndicatorReviewState>>(),
        missing_required_fields: Vec::new(),
        compliance_recorded: false,
    }
}

fn request(action: TransitionAction, actor: Role) -> TransitionRequest {
    TransitionRequest::new(action, actor)
}

fn one_commented_failure() -> GuardInputs {
    guards(vec![
        ("1.1", review(ComplianceStatus::Pass, None)),
        ("1.2", review(ComplianceStatus::Fail, Some("two ordinances lack minutes"))),
    ])
}

#[test]
fn calibration_is_never_reachable_from_submitted() {
    let state = state_in(AssessmentStatus::Submitted);
    for actor in [Role::Blgu, Role::Assessor, Role::Validator, Role::Admin] {
        match decide(
            &state,
            &request(TransitionAction::RequestCalibration, actor),
            &one_commented_failure(),
            &CyclePolicy::default(),
        ) {
            Err(GuardViolation::IllegalTransition { from, action }) => {
                assert_eq!(from, AssessmentStatus::Submitted);
                assert_eq!(action, TransitionAction::RequestCalibration);
            }
            other => panic!("expected illegal transition for {actor:?}, got {other:?}"),
        }
    }
}

#[test]
fn role_is_checked_after_the_route() {
    let state = state_in(AssessmentStatus::Submitted);
    match decide(
        &state,
        &request(TransitionAction::BeginReview, Role::Blgu),
        &GuardInputs::default(),
        &CyclePolicy::default(),
    ) {
        Err(GuardViolation::RoleNotPermitted { allowed, .. }) => {
            assert_eq!(allowed, vec![Role::Assessor])
        }
        other => panic!("expected role violation, got {other:?}"),
    }
}

#[test]
fn submit_requires_every_required_field() {
    let state = state_in(AssessmentStatus::Draft);
    let mut inputs = GuardInputs::default();
    inputs
        .missing_required_fields
        .push((id("4.1"), FieldId::from("program_status")));

    match decide(
        &state,
        &request(TransitionAction::Submit, Role::Blgu),
        &inputs,
        &CyclePolicy::default(),
    ) {
        Err(GuardViolation::MissingRequiredFields { fields }) => {
            assert_eq!(fields, vec!["4.1/program_status".to_string()])
        }
        other => panic!("expected missing fields, got {other:?}"),
    }
}

#[test]
fn rework_requires_comment_on_every_failure() {
    let state = state_in(AssessmentStatus::InReview);
    let inputs = guards(vec![
        ("1.1", review(ComplianceStatus::Fail, Some("photos missing"))),
        ("1.2", review(ComplianceStatus::Fail, None)),
        ("4.1", review(ComplianceStatus::Conditional, Some("program still ongoing"))),
    ]);

    match decide(
        &state,
        &request(TransitionAction::SendRework, Role::Assessor),
        &inputs,
        &CyclePolicy::default(),
    ) {
        Err(GuardViolation::MissingReviewerComments { indicators }) => {
            assert_eq!(indicators, vec![id("1.2")])
        }
        other => panic!("expected missing comments, got {other:?}"),
    }
}

#[test]
fn rework_flags_failures_and_counts_the_cycle() {
    let mut state = state_in(AssessmentStatus::InReview);

    let decision = decide(
        &state,
        &request(TransitionAction::SendRework, Role::Assessor),
        &one_commented_failure(),
        &CyclePolicy::default(),
    )
    .expect("rework allowed");

    assert_eq!(decision.to, AssessmentStatus::Rework);
    assert_eq!(decision.cycle, Some(CycleKind::Rework));
    assert!(decision.flag.contains(&id("1.2")));

    let entered = Utc
        .with_ymd_and_hms(2025, 3, 4, 9, 0, 0)
        .single()
        .expect("valid timestamp");
    state.apply(&decision, Role::Assessor, entered);
    assert_eq!(state.cycles.rework, 1);
    assert_eq!(state.current_phase_started(), Some(entered));
    assert_eq!(state.actor_of_record, Role::Assessor);
}

#[test]
fn rework_without_failures_is_rejected() {
    let state = state_in(AssessmentStatus::InReview);
    let inputs = guards(vec![("1.1", review(ComplianceStatus::Pass, None))]);

    assert!(matches!(
        decide(
            &state,
            &request(TransitionAction::SendRework, Role::Assessor),
            &inputs,
            &CyclePolicy::default(),
        ),
        Err(GuardViolation::NoFailingIndicators)
    ));
}

#[test]
fn second_rework_exceeds_the_default_limit() {
    let mut state = state_in(AssessmentStatus::InReview);
    state.cycles.rework = 1;

    match decide(
        &state,
        &request(TransitionAction::SendRework, Role::Assessor),
        &one_commented_failure(),
        &CyclePolicy::default(),
    ) {
        Err(GuardViolation::CycleLimitReached { cycle, limit }) => {
            assert_eq!(cycle, CycleKind::Rework);
            assert_eq!(limit, 1);
        }
        other => panic!("expected cycle limit, got {other:?}"),
    }

    let lenient = CyclePolicy {
        max_rework: 2,
        ..CyclePolicy::default()
    };
    assert!(decide(
        &state,
        &request(TransitionAction::SendRework, Role::Assessor),
        &one_commented_failure(),
        &lenient,
    )
    .is_ok());
}

#[test]
fn finalize_with_failure_needs_a_completed_rework() {
    let mut state = state_in(AssessmentStatus::InReview);
    let finalize = request(TransitionAction::Finalize, Role::Assessor);

    assert!(matches!(
        decide(&state, &finalize, &one_commented_failure(), &CyclePolicy::default()),
        Err(GuardViolation::UnresolvedFailures { .. })
    ));

    state.cycles.rework = 1;
    let decision = decide(&state, &finalize, &one_commented_failure(), &CyclePolicy::default())
        .expect("failures allowed after rework");
    assert_eq!(decision.to, AssessmentStatus::AwaitingValidation);
}

#[test]
fn finalize_blocks_on_undetermined_and_unreviewed() {
    let state = state_in(AssessmentStatus::InReview);
    let finalize = request(TransitionAction::Finalize, Role::Assessor);

    let mut undetermined = review(ComplianceStatus::NotEvaluated, None);
    undetermined.undetermined = true;
    assert!(matches!(
        decide(
            &state,
            &finalize,
            &guards(vec![("2.1", undetermined)]),
            &CyclePolicy::default()
        ),
        Err(GuardViolation::UndeterminedIndicators { .. })
    ));

    assert!(matches!(
        decide(
            &state,
            &finalize,
            &guards(vec![("5.1", review(ComplianceStatus::NotEvaluated, None))]),
            &CyclePolicy::default()
        ),
        Err(GuardViolation::UnreviewedIndicators { .. })
    ));
}

#[test]
fn resubmission_needs_new_evidence_for_flagged_indicators() {
    let mut state = state_in(AssessmentStatus::Rework);
    state.flagged_indicators.insert(id("1.2"));
    let resubmit = request(TransitionAction::Resubmit, Role::Blgu);

    match decide(&state, &resubmit, &one_commented_failure(), &CyclePolicy::default()) {
        Err(GuardViolation::MissingNewEvidence { indicators }) => {
            assert_eq!(indicators, vec![id("1.2")])
        }
        other => panic!("expected missing evidence, got {other:?}"),
    }

    let mut inputs = one_commented_failure();
    if let Some(entry) = inputs.indicators.get_mut(&id("1.2")) {
        entry.has_new_evidence = true;
    }
    let decision =
        decide(&state, &resubmit, &inputs, &CyclePolicy::default()).expect("evidence supplied");
    assert_eq!(decision.to, AssessmentStatus::InReview);
    assert!(decision.flag.is_empty());
}

#[test]
fn validator_approval_with_failure_waits_for_a_cycle() {
    let mut state = state_in(AssessmentStatus::AwaitingValidation);
    let approve = request(TransitionAction::Approve, Role::Validator);

    assert!(matches!(
        decide(&state, &approve, &one_commented_failure(), &CyclePolicy::default()),
        Err(GuardViolation::UnresolvedFailures { .. })
    ));

    state.cycles.rework = 1;
    let decision = decide(&state, &approve, &one_commented_failure(), &CyclePolicy::default())
        .expect("approval allowed after a rework cycle");
    assert_eq!(decision.to, AssessmentStatus::AwaitingMlgooApproval);
}

#[test]
fn calibration_resubmission_accepts_assessor_or_blgu() {
    let state = state_in(AssessmentStatus::Calibration);
    for actor in [Role::Assessor, Role::Blgu] {
        let decision = decide(
            &state,
            &request(TransitionAction::Resubmit, actor),
            &GuardInputs::default(),
            &CyclePolicy::default(),
        )
        .expect("nothing flagged");
        assert_eq!(decision.to, AssessmentStatus::AwaitingValidation);
    }
}

#[test]
fn recalibration_is_bounded_and_completion_needs_compliance() {
    let mut state = state_in(AssessmentStatus::AwaitingMlgooApproval);

    let decision = decide(
        &state,
        &request(TransitionAction::RequestRecalibration, Role::Admin),
        &GuardInputs::default(),
        &CyclePolicy::default(),
    )
    .expect("first recalibration allowed");
    assert_eq!(decision.to, AssessmentStatus::MlgooRecalibration);

    state.cycles.recalibration = 1;
    assert!(matches!(
        decide(
            &state,
            &request(TransitionAction::RequestRecalibration, Role::Admin),
            &GuardInputs::default(),
            &CyclePolicy::default(),
        ),
        Err(GuardViolation::CycleLimitReached {
            cycle: CycleKind::Recalibration,
            ..
        })
    ));

    let approve = request(TransitionAction::Approve, Role::Admin);
    assert!(matches!(
        decide(&state, &approve, &GuardInputs::default(), &CyclePolicy::default()),
        Err(GuardViolation::ComplianceNotComputed)
    ));
    let computed = GuardInputs {
        compliance_recorded: true,
        ..GuardInputs::default()
    };
    let decision =
        decide(&state, &approve, &computed, &CyclePolicy::default()).expect("completes");
    assert_eq!(decision.to, AssessmentStatus::Completed);
}

#[test]
fn completed_is_terminal() {
    assert!(allowed_transitions(AssessmentStatus::Completed).is_empty());
    assert!(AssessmentStatus::Completed.is_terminal());
    let in_review: Vec<TransitionAction> = allowed_transitions(AssessmentStatus::InReview)
        .into_iter()
        .map(|(action, _, _)| action)
        .collect();
    assert_eq!(
        in_review,
        vec![TransitionAction::SendRework, TransitionAction::Finalize]
    );
}

#[test]
fn guard_violations_serialize_with_kind() {
    let violation = GuardViolation::CycleLimitReached {
        cycle: CycleKind::Calibration,
        limit: 1,
    };
    let value = serde_json::to_value(&violation).expect("serializes");
    assert_eq!(value["kind"], "cycle_limit_reached");
    assert_eq!(value["cycle"], "calibration");
    assert_eq!(violation.kind(), "cycle_limit_reached");
}
