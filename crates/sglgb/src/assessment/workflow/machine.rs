use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::state::{AssessmentState, AssessmentStatus, CycleKind};
use crate::assessment::domain::{ComplianceStatus, FieldId, IndicatorId, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Submit,
    BeginReview,
    SendRework,
    Finalize,
    Resubmit,
    RequestCalibration,
    Approve,
    RequestRecalibration,
}

impl TransitionAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::BeginReview => "begin_review",
            Self::SendRework => "send_rework",
            Self::Finalize => "finalize",
            Self::Resubmit => "resubmit",
            Self::RequestCalibration => "request_calibration",
            Self::Approve => "approve",
            Self::RequestRecalibration => "request_recalibration",
        }
    }
}

/// Transition requested by an explicit actor; no ambient session state is consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub action: TransitionAction,
    pub actor: Role,
    #[serde(default)]
    pub reason: String,
}

impl TransitionRequest {
    pub fn new(action: TransitionAction, actor: Role) -> Self {
        Self {
            action,
            actor,
            reason: String::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Upper bound on how many times each review cycle may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclePolicy {
    pub max_rework: u32,
    pub max_calibration: u32,
    pub max_recalibration: u32,
}

impl CyclePolicy {
    pub const fn limit(&self, kind: CycleKind) -> u32 {
        match kind {
            CycleKind::Rework => self.max_rework,
            CycleKind::Calibration => self.max_calibration,
            CycleKind::Recalibration => self.max_recalibration,
        }
    }
}

impl Default for CyclePolicy {
    fn default() -> Self {
        Self {
            max_rework: 1,
            max_calibration: 1,
            max_recalibration: 1,
        }
    }
}

/// Review facts about one indicator, taken from a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorReviewState {
    pub status: ComplianceStatus,
    /// The engine could not decide this indicator.
    pub undetermined: bool,
    pub comment: Option<String>,
    /// New answers or files exist since the current phase started.
    pub has_new_evidence: bool,
}

impl IndicatorReviewState {
    fn lacks_comment(&self) -> bool {
        self.status.requires_comment()
            && self
                .comment
                .as_deref()
                .map_or(true, |comment| comment.trim().is_empty())
    }
}

/// Verdict-derived facts the guards are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardInputs {
    pub indicators: BTreeMap<IndicatorId, IndicatorReviewState>,
    pub missing_required_fields: Vec<(IndicatorId, FieldId)>,
    pub compliance_recorded: bool,
}

impl GuardInputs {
    fn with_status(&self, status: ComplianceStatus) -> Vec<IndicatorId> {
        self.indicators
            .iter()
            .filter(|(_, review)| review.status == status && !review.undetermined)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn failing(&self) -> Vec<IndicatorId> {
        self.with_status(ComplianceStatus::Fail)
    }
}

/// Accepted transition; applied and persisted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDecision {
    pub from: AssessmentStatus,
    pub to: AssessmentStatus,
    pub action: TransitionAction,
    /// Cycle counter to increment on entry.
    pub cycle: Option<CycleKind>,
    /// Indicators that must show new evidence before resubmission.
    pub flag: BTreeSet<IndicatorId>,
}

/// Typed reason a transition (or phase-bound edit) was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardViolation {
    #[error("{action:?} is not a valid transition from {from:?}")]
    IllegalTransition {
        from: AssessmentStatus,
        action: TransitionAction,
    },
    #[error("{actor:?} may not {action:?}; allowed roles: {allowed:?}")]
    RoleNotPermitted {
        action: TransitionAction,
        actor: Role,
        allowed: Vec<Role>,
    },
    #[error("required fields are missing: {}", fields.join(", "))]
    MissingRequiredFields { fields: Vec<String> },
    #[error("rework needs at least one failed indicator")]
    NoFailingIndicators,
    #[error("{} cycle limit of {limit} already reached", cycle.label())]
    CycleLimitReached { cycle: CycleKind, limit: u32 },
    #[error("failed or conditional indicators need reviewer comments: {}", join(indicators))]
    MissingReviewerComments { indicators: Vec<IndicatorId> },
    #[error("indicators have no recorded verdict: {}", join(indicators))]
    UnreviewedIndicators { indicators: Vec<IndicatorId> },
    #[error("indicators could not be evaluated: {}", join(indicators))]
    UndeterminedIndicators { indicators: Vec<IndicatorId> },
    #[error("failed indicators have not been through a review cycle: {}", join(indicators))]
    UnresolvedFailures { indicators: Vec<IndicatorId> },
    #[error("flagged indicators have no new evidence: {}", join(indicators))]
    MissingNewEvidence { indicators: Vec<IndicatorId> },
    #[error("overall compliance verdict has not been computed")]
    ComplianceNotComputed,
    #[error("{actor:?} may not {operation} while the assessment is {status:?}")]
    EditNotPermitted {
        operation: String,
        actor: Role,
        status: AssessmentStatus,
    },
}

impl GuardViolation {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::RoleNotPermitted { .. } => "role_not_permitted",
            Self::MissingRequiredFields { .. } => "missing_required_fields",
            Self::NoFailingIndicators => "no_failing_indicators",
            Self::CycleLimitReached { .. } => "cycle_limit_reached",
            Self::MissingReviewerComments { .. } => "missing_reviewer_comments",
            Self::UnreviewedIndicators { .. } => "unreviewed_indicators",
            Self::UndeterminedIndicators { .. } => "undetermined_indicators",
            Self::UnresolvedFailures { .. } => "unresolved_failures",
            Self::MissingNewEvidence { .. } => "missing_new_evidence",
            Self::ComplianceNotComputed => "compliance_not_computed",
            Self::EditNotPermitted { .. } => "edit_not_permitted",
        }
    }
}

fn join(indicators: &[IndicatorId]) -> String {
    indicators
        .iter()
        .map(IndicatorId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The enumerated transition table: target state and permitted roles.
fn route(
    from: AssessmentStatus,
    action: TransitionAction,
) -> Option<(AssessmentStatus, &'static [Role])> {
    use AssessmentStatus as S;
    use TransitionAction as A;

    match (from, action) {
        (S::Draft, A::Submit) => Some((S::Submitted, &[Role::Blgu])),
        (S::Submitted, A::BeginReview) => Some((S::InReview, &[Role::Assessor])),
        (S::InReview, A::SendRework) => Some((S::Rework, &[Role::Assessor])),
        (S::InReview, A::Finalize) => Some((S::AwaitingValidation, &[Role::Assessor])),
        (S::Rework, A::Resubmit) => Some((S::InReview, &[Role::Blgu])),
        (S::AwaitingValidation, A::RequestCalibration) => {
            Some((S::Calibration, &[Role::Validator]))
        }
        (S::AwaitingValidation, A::Approve) => {
            Some((S::AwaitingMlgooApproval, &[Role::Validator]))
        }
        (S::Calibration, A::Resubmit) => {
            Some((S::AwaitingValidation, &[Role::Assessor, Role::Blgu]))
        }
        (S::AwaitingMlgooApproval, A::RequestRecalibration) => {
            Some((S::MlgooRecalibration, &[Role::Admin]))
        }
        (S::MlgooRecalibration, A::Resubmit) => {
            Some((S::AwaitingMlgooApproval, &[Role::Blgu, Role::Assessor]))
        }
        (S::AwaitingMlgooApproval, A::Approve) => Some((S::Completed, &[Role::Admin])),
        _ => None,
    }
}

/// Transitions leaving `from`, with their targets and permitted roles.
pub fn allowed_transitions(
    from: AssessmentStatus,
) -> Vec<(TransitionAction, AssessmentStatus, &'static [Role])> {
    [
        TransitionAction::Submit,
        TransitionAction::BeginReview,
        TransitionAction::SendRework,
        TransitionAction::Finalize,
        TransitionAction::Resubmit,
        TransitionAction::RequestCalibration,
        TransitionAction::Approve,
        TransitionAction::RequestRecalibration,
    ]
    .into_iter()
    .filter_map(|action| route(from, action).map(|(to, roles)| (action, to, roles)))
    .collect()
}

/// Decide a transition. Pure: no clock, no I/O, no mutation.
///
/// Checks run in a fixed order: the (state, action) pair, the actor's role, then guards.
pub fn decide(
    state: &AssessmentState,
    request: &TransitionRequest,
    guards: &GuardInputs,
    policy: &CyclePolicy,
) -> Result<TransitionDecision, GuardViolation> {
    let from = state.status;
    let action = request.action;
    let (to, roles) = route(from, action)
        .ok_or(GuardViolation::IllegalTransition { from, action })?;

    if !roles.contains(&request.actor) {
        return Err(GuardViolation::RoleNotPermitted {
            action,
            actor: request.actor,
            allowed: roles.to_vec(),
        });
    }

    let mut decision = TransitionDecision {
        from,
        to,
        action,
        cycle: None,
        flag: BTreeSet::new(),
    };

    match (from, action) {
        (AssessmentStatus::Draft, TransitionAction::Submit) => {
            if !guards.missing_required_fields.is_empty() {
                return Err(GuardViolation::MissingRequiredFields {
                    fields: guards
                        .missing_required_fields
                        .iter()
                        .map(|(indicator, field)| format!("{indicator}/{field}"))
                        .collect(),
                });
            }
        }
        (AssessmentStatus::InReview, TransitionAction::SendRework) => {
            let failing = guards.failing();
            if failing.is_empty() {
                return Err(GuardViolation::NoFailingIndicators);
            }
            ensure_cycle_available(state, policy, CycleKind::Rework)?;
            ensure_comments(guards)?;
            decision.cycle = Some(CycleKind::Rework);
            decision.flag = failing.into_iter().collect();
        }
        (AssessmentStatus::InReview, TransitionAction::Finalize) => {
            ensure_all_reviewed(guards)?;
            ensure_comments(guards)?;
            let failing = guards.failing();
            if !failing.is_empty() && state.cycles.rework == 0 {
                return Err(GuardViolation::UnresolvedFailures {
                    indicators: failing,
                });
            }
        }
        (AssessmentStatus::Rework, TransitionAction::Resubmit)
        | (AssessmentStatus::Calibration, TransitionAction::Resubmit) => {
            ensure_new_evidence(state, guards)?;
        }
        (AssessmentStatus::AwaitingValidation, TransitionAction::RequestCalibration) => {
            ensure_cycle_available(state, policy, CycleKind::Calibration)?;
            ensure_comments(guards)?;
            decision.cycle = Some(CycleKind::Calibration);
            decision.flag = guards.failing().into_iter().collect();
        }
        (AssessmentStatus::AwaitingValidation, TransitionAction::Approve) => {
            ensure_all_reviewed(guards)?;
            ensure_comments(guards)?;
            let failing = guards.failing();
            let cycle_completed = state.cycles.rework > 0 || state.cycles.calibration > 0;
            if !failing.is_empty() && !cycle_completed {
                return Err(GuardViolation::UnresolvedFailures {
                    indicators: failing,
                });
            }
        }
        (AssessmentStatus::AwaitingMlgooApproval, TransitionAction::RequestRecalibration) => {
            ensure_cycle_available(state, policy, CycleKind::Recalibration)?;
            decision.cycle = Some(CycleKind::Recalibration);
        }
        (AssessmentStatus::AwaitingMlgooApproval, TransitionAction::Approve) => {
            if !guards.compliance_recorded {
                return Err(GuardViolation::ComplianceNotComputed);
            }
        }
        _ => {}
    }

    Ok(decision)
}

fn ensure_cycle_available(
    state: &AssessmentState,
    policy: &CyclePolicy,
    cycle: CycleKind,
) -> Result<(), GuardViolation> {
    let limit = policy.limit(cycle);
    if state.cycles.get(cycle) >= limit {
        return Err(GuardViolation::CycleLimitReached { cycle, limit });
    }
    Ok(())
}

fn ensure_comments(guards: &GuardInputs) -> Result<(), GuardViolation> {
    let missing: Vec<IndicatorId> = guards
        .indicators
        .iter()
        .filter(|(_, review)| review.lacks_comment())
        .map(|(id, _)| id.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(GuardViolation::MissingReviewerComments {
            indicators: missing,
        })
    }
}

fn ensure_all_reviewed(guards: &GuardInputs) -> Result<(), GuardViolation> {
    let undetermined: Vec<IndicatorId> = guards
        .indicators
        .iter()
        .filter(|(_, review)| review.undetermined)
        .map(|(id, _)| id.clone())
        .collect();
    if !undetermined.is_empty() {
        return Err(GuardViolation::UndeterminedIndicators {
            indicators: undetermined,
        });
    }

    let unreviewed = guards.with_status(ComplianceStatus::NotEvaluated);
    if !unreviewed.is_empty() {
        return Err(GuardViolation::UnreviewedIndicators {
            indicators: unreviewed,
        });
    }
    Ok(())
}

fn ensure_new_evidence(state: &AssessmentState, guards: &GuardInputs) -> Result<(), GuardViolation> {
    let stale: Vec<IndicatorId> = state
        .flagged_indicators
        .iter()
        .filter(|indicator| {
            !guards
                .indicators
                .get(*indicator)
                .is_some_and(|review| review.has_new_evidence)
        })
        .cloned()
        .collect();
    if stale.is_empty() {
        Ok(())
    } else {
        Err(GuardViolation::MissingNewEvidence { indicators: stale })
    }
}
