use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{AssessmentId, ComplianceStatus, FieldValueMap, IndicatorId, Role};
use super::pipeline::EvaluationReport;
use super::workflow::{AssessmentState, AssessmentStatus, TransitionLog};

/// One submission of answers; later submissions supersede but never delete earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSubmission {
    pub submitted_at: DateTime<Utc>,
    pub submitted_by: Role,
    pub values: FieldValueMap,
}

/// Reviewer input for one indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorReview {
    /// Recorded status; authoritative for manually assessed indicators.
    pub status: Option<ComplianceStatus>,
    pub comment: Option<String>,
    pub reviewed_by: Role,
    pub recorded_at: DateTime<Utc>,
}

/// Repository record holding workflow state, evidence history, and derived verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub id: AssessmentId,
    pub barangay: String,
    /// Bumped on every save; used for optimistic concurrency.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub state: AssessmentState,
    pub responses: BTreeMap<IndicatorId, Vec<ResponseSubmission>>,
    pub reviews: BTreeMap<IndicatorId, IndicatorReview>,
    pub evaluation: Option<EvaluationReport>,
    pub transitions: TransitionLog,
}

impl AssessmentRecord {
    pub fn new(id: AssessmentId, barangay: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            barangay: barangay.into(),
            version: 0,
            created_at,
            state: AssessmentState::new(created_at),
            responses: BTreeMap::new(),
            reviews: BTreeMap::new(),
            evaluation: None,
            transitions: TransitionLog::default(),
        }
    }

    pub fn status(&self) -> AssessmentStatus {
        self.state.status
    }

    /// Latest answers per indicator.
    pub fn current_responses(&self) -> BTreeMap<IndicatorId, FieldValueMap> {
        self.responses
            .iter()
            .filter_map(|(id, history)| {
                history
                    .last()
                    .map(|submission| (id.clone(), submission.values.clone()))
            })
            .collect()
    }

    pub fn recorded_statuses(&self) -> BTreeMap<IndicatorId, ComplianceStatus> {
        self.reviews
            .iter()
            .filter_map(|(id, review)| review.status.map(|status| (id.clone(), status)))
            .collect()
    }

    /// Whether answers for `indicator` were submitted after `since`.
    pub fn has_responses_since(&self, indicator: &IndicatorId, since: DateTime<Utc>) -> bool {
        self.responses
            .get(indicator)
            .is_some_and(|history| history.iter().any(|entry| entry.submitted_at > since))
    }

    pub fn summary(&self) -> AssessmentSummary {
        AssessmentSummary {
            assessment_id: self.id.clone(),
            barangay: self.barangay.clone(),
            status: self.state.status.label(),
            version: self.version,
            passed: self
                .evaluation
                .as_ref()
                .and_then(|report| report.compliance.as_ref())
                .map(|verdict| verdict.passed),
        }
    }
}

/// Storage abstraction; the core is stateless between calls.
pub trait AssessmentRepository: Send + Sync {
    fn insert(&self, record: AssessmentRecord) -> Result<AssessmentRecord, RepositoryError>;
    fn load(&self, id: &AssessmentId) -> Result<Option<AssessmentRecord>, RepositoryError>;
    /// Persist `record` only if the stored version still equals `expected_version`.
    /// The stored copy's version becomes `expected_version + 1`.
    fn save(
        &self,
        record: AssessmentRecord,
        expected_version: u64,
    ) -> Result<AssessmentRecord, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stale write: expected version {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification hook (e-mail or in-app adapters live outside the core).
pub trait NotificationPublisher: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub assessment_id: AssessmentId,
    pub status: AssessmentStatus,
    pub recipient: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Answers whether supporting files were uploaded for an indicator after a point in time.
pub trait EvidenceSource: Send + Sync {
    fn has_new_evidence_since(
        &self,
        assessment: &AssessmentId,
        indicator: &IndicatorId,
        since: DateTime<Utc>,
    ) -> Result<bool, EvidenceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("evidence store unavailable: {0}")]
    Unavailable(String),
}

/// Sanitized view of an assessment for listings.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentSummary {
    pub assessment_id: AssessmentId,
    pub barangay: String,
    pub status: &'static str,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
}
