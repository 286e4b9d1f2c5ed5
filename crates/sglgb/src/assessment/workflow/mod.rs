//! Assessment lifecycle: states, the append-only transition log, and the guard-checked
//! transition decision function.

mod machine;
mod state;

pub use machine::{
    allowed_transitions, decide, CyclePolicy, GuardInputs, GuardViolation, IndicatorReviewState,
    TransitionAction, TransitionDecision, TransitionRequest,
};
pub use state::{
    AssessmentState, AssessmentStatus, CycleCounters, CycleKind, TransitionLog, TransitionOutcome,
    TransitionRecord,
};
