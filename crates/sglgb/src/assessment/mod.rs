//! Barangay governance assessment: rule evaluation, verdict resolution, area roll-up,
//! and the review workflow, orchestrated by [`AssessmentService`].

pub mod aggregate;
pub mod bbi;
pub mod domain;
pub mod framework;
pub mod indicator;
mod pipeline;
pub mod remarks;
pub mod repository;
pub mod router;
pub mod rules;
pub mod service;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use aggregate::{
    aggregate, three_plus_one, AggregationError, AreaKind, ComplianceVerdict, GovernanceArea,
    GovernanceAreaResult,
};
pub use bbi::{resolve_bbi, BbiDefinition, BbiStatus};
pub use domain::{
    AreaId, AssessmentId, BbiFunctionality, BbiId, ComplianceStatus, FieldDefinition, FieldId,
    FieldKind, FieldValue, FieldValueMap, IndicatorId, Role, TypedValue,
};
pub use framework::{AssessmentFramework, EvaluationStep, FrameworkDocument, FrameworkLoadError};
pub use indicator::{
    resolve_indicator, ChildIndicator, IndicatorDefinition, IndicatorInputs, IndicatorMode,
    IndicatorVerdict, VerdictSource,
};
pub use pipeline::{AssessmentInputs, EvaluationReport};
pub use remarks::{RemarkTemplate, RemarkTemplates};
pub use repository::{
    AssessmentRecord, AssessmentRepository, AssessmentSummary, EvidenceError, EvidenceSource,
    IndicatorReview, Notification, NotificationError, NotificationPublisher, RepositoryError,
    ResponseSubmission,
};
pub use router::assessment_router;
pub use rules::{
    evaluate, CalculationSchema, ConditionalBranch, EvaluationError, FieldPredicate,
    MatchOperator, OutcomeLabels, RuleNode, RuleOutcome, SchemaValidationError, Threshold,
};
pub use service::{
    AssessmentService, AssessmentServiceError, Clock, NewAssessment, ReviewInput, SystemClock,
};
pub use workflow::{
    allowed_transitions, decide, AssessmentState, AssessmentStatus, CycleCounters, CycleKind,
    CyclePolicy, GuardInputs, GuardViolation, IndicatorReviewState, TransitionAction,
    TransitionDecision, TransitionLog, TransitionOutcome, TransitionRecord, TransitionRequest,
};
