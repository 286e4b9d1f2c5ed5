use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::machine::{TransitionAction, TransitionDecision};
use crate::assessment::domain::{IndicatorId, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Draft,
    Submitted,
    InReview,
    Rework,
    AwaitingValidation,
    Calibration,
    MlgooRecalibration,
    AwaitingMlgooApproval,
    Completed,
}

impl AssessmentStatus {
    pub const fn ordered() -> [Self; 9] {
        [
            Self::Draft,
            Self::Submitted,
            Self::InReview,
            Self::Rework,
            Self::AwaitingValidation,
            Self::Calibration,
            Self::MlgooRecalibration,
            Self::AwaitingMlgooApproval,
            Self::Completed,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Submitted => "Submitted",
            Self::InReview => "In Review",
            Self::Rework => "Rework",
            Self::AwaitingValidation => "Awaiting Validation",
            Self::Calibration => "Calibration",
            Self::MlgooRecalibration => "MLGOO Recalibration",
            Self::AwaitingMlgooApproval => "Awaiting MLGOO Approval",
            Self::Completed => "Completed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Actor expected to act next once an assessment enters this phase.
    pub const fn next_actor(self) -> Role {
        match self {
            Self::Draft
            | Self::Rework
            | Self::Calibration
            | Self::MlgooRecalibration
            | Self::Completed => Role::Blgu,
            Self::Submitted | Self::InReview => Role::Assessor,
            Self::AwaitingValidation => Role::Validator,
            Self::AwaitingMlgooApproval => Role::Admin,
        }
    }

    /// Phases where the submitting side may change answers.
    pub const fn accepts_responses(self) -> bool {
        matches!(
            self,
            Self::Draft | Self::Rework | Self::Calibration | Self::MlgooRecalibration
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Rework,
    Calibration,
    Recalibration,
}

impl CycleKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Rework => "rework",
            Self::Calibration => "calibration",
            Self::Recalibration => "MLGOO recalibration",
        }
    }
}

/// Number of times each review cycle has been entered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounters {
    pub rework: u32,
    pub calibration: u32,
    pub recalibration: u32,
}

impl CycleCounters {
    pub const fn get(&self, kind: CycleKind) -> u32 {
        match kind {
            CycleKind::Rework => self.rework,
            CycleKind::Calibration => self.calibration,
            CycleKind::Recalibration => self.recalibration,
        }
    }

    fn increment(&mut self, kind: CycleKind) {
        match kind {
            CycleKind::Rework => self.rework += 1,
            CycleKind::Calibration => self.calibration += 1,
            CycleKind::Recalibration => self.recalibration += 1,
        }
    }
}

/// Lifecycle state of one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentState {
    pub status: AssessmentStatus,
    pub actor_of_record: Role,
    pub cycles: CycleCounters,
    /// Latest entry timestamp per phase; separates old from new evidence during cycles.
    pub phase_entered_at: BTreeMap<AssessmentStatus, DateTime<Utc>>,
    /// Indicators sent back in the current rework/calibration cycle.
    pub flagged_indicators: BTreeSet<IndicatorId>,
}

impl AssessmentState {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        let mut phase_entered_at = BTreeMap::new();
        phase_entered_at.insert(AssessmentStatus::Draft, created_at);
        Self {
            status: AssessmentStatus::Draft,
            actor_of_record: Role::Blgu,
            cycles: CycleCounters::default(),
            phase_entered_at,
            flagged_indicators: BTreeSet::new(),
        }
    }

    pub fn entered_at(&self, status: AssessmentStatus) -> Option<DateTime<Utc>> {
        self.phase_entered_at.get(&status).copied()
    }

    /// Entry time of the current phase.
    pub fn current_phase_started(&self) -> Option<DateTime<Utc>> {
        self.entered_at(self.status)
    }

    pub(crate) fn apply(&mut self, decision: &TransitionDecision, actor: Role, at: DateTime<Utc>) {
        self.status = decision.to;
        self.actor_of_record = actor;
        self.phase_entered_at.insert(decision.to, at);
        if let Some(kind) = decision.cycle {
            self.cycles.increment(kind);
        }
        self.flagged_indicators = decision.flag.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Committed,
    Rejected { violation: String },
}

/// Immutable audit entry for a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: AssessmentStatus,
    pub to: AssessmentStatus,
    pub action: TransitionAction,
    pub actor: Role,
    pub at: DateTime<Utc>,
    pub reason: String,
    pub outcome: TransitionOutcome,
}

impl TransitionRecord {
    pub fn is_committed(&self) -> bool {
        self.outcome == TransitionOutcome::Committed
    }
}

/// Append-only audit trail; entries cannot be edited or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionLog(Vec<TransitionRecord>);

impl TransitionLog {
    pub fn append(&mut self, record: TransitionRecord) {
        self.0.push(record);
    }

    pub fn records(&self) -> &[TransitionRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&TransitionRecord> {
        self.0.last()
    }

    pub fn committed(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.0.iter().filter(|record| record.is_committed())
    }
}
