use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::domain::{AssessmentId, ComplianceStatus, FieldValueMap, IndicatorId, Role};
use super::framework::AssessmentFramework;
use super::indicator::IndicatorMode;
use super::pipeline::{AssessmentInputs, EvaluationReport};
use super::repository::{
    AssessmentRecord, AssessmentRepository, EvidenceError, EvidenceSource, IndicatorReview,
    Notification, NotificationPublisher, RepositoryError, ResponseSubmission,
};
use super::workflow::{
    decide, AssessmentStatus, CyclePolicy, GuardInputs, GuardViolation, IndicatorReviewState,
    TransitionOutcome, TransitionRecord, TransitionRequest,
};

/// Time source, injectable so phase timestamps are deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Payload for opening a new assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssessment {
    pub barangay: String,
}

/// Reviewer input for one indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInput {
    #[serde(default)]
    pub status: Option<ComplianceStatus>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Orchestrator: the only component that performs I/O around the pure core.
pub struct AssessmentService<R, N, E> {
    framework: Arc<AssessmentFramework>,
    repository: Arc<R>,
    notifier: Arc<N>,
    evidence: Arc<E>,
    clock: Arc<dyn Clock>,
    policy: CyclePolicy,
    locks: LockMap,
}

type LockMap = Mutex<HashMap<AssessmentId, Arc<Mutex<()>>>>;

/// Shared handle on one assessment's lock; the map entry is dropped with the last lease.
struct LockLease<'a> {
    locks: &'a LockMap,
    id: AssessmentId,
    lock: Arc<Mutex<()>>,
}

impl LockLease<'_> {
    fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference is the map's and one is ours; any other belongs to a waiter.
        let idle = Arc::strong_count(&self.lock) == 2
            && locks
                .get(&self.id)
                .is_some_and(|held| Arc::ptr_eq(held, &self.lock));
        if idle {
            locks.remove(&self.id);
        }
    }
}

static ASSESSMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_assessment_id() -> AssessmentId {
    let id = ASSESSMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AssessmentId(format!("asm-{id:06}"))
}

impl<R, N, E> AssessmentService<R, N, E>
where
    R: AssessmentRepository + 'static,
    N: NotificationPublisher + 'static,
    E: EvidenceSource + 'static,
{
    pub fn new(
        framework: Arc<AssessmentFramework>,
        repository: Arc<R>,
        notifier: Arc<N>,
        evidence: Arc<E>,
        policy: CyclePolicy,
    ) -> Self {
        Self::with_clock(
            framework,
            repository,
            notifier,
            evidence,
            policy,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        framework: Arc<AssessmentFramework>,
        repository: Arc<R>,
        notifier: Arc<N>,
        evidence: Arc<E>,
        policy: CyclePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            framework,
            repository,
            notifier,
            evidence,
            clock,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn framework(&self) -> &AssessmentFramework {
        &self.framework
    }

    pub fn policy(&self) -> CyclePolicy {
        self.policy
    }

    /// Open a Draft assessment and store its initial evaluation.
    pub fn create(
        &self,
        request: NewAssessment,
    ) -> Result<AssessmentRecord, AssessmentServiceError> {
        let barangay = request.barangay.trim();
        if barangay.is_empty() {
            return Err(AssessmentServiceError::InvalidRequest(
                "barangay must not be empty".to_string(),
            ));
        }

        let mut record = AssessmentRecord::new(next_assessment_id(), barangay, self.clock.now());
        record.evaluation = Some(self.recompute(&record));
        let stored = self.repository.insert(record)?;
        info!(assessment_id = %stored.id, barangay = %stored.barangay, "assessment opened");
        Ok(stored)
    }

    pub fn get(&self, id: &AssessmentId) -> Result<AssessmentRecord, AssessmentServiceError> {
        self.load(id)
    }

    /// Append a new submission of answers for one indicator.
    pub fn record_responses(
        &self,
        id: &AssessmentId,
        indicator_id: &IndicatorId,
        actor: Role,
        values: FieldValueMap,
        expected_version: Option<u64>,
    ) -> Result<AssessmentRecord, AssessmentServiceError> {
        let lease = self.lease(id);
        let _guard = lease.acquire();

        let mut record = self.load_checked(id, expected_version)?;
        let status = record.status();
        let permitted = match actor {
            Role::Blgu => status.accepts_responses(),
            Role::Assessor => status == AssessmentStatus::Calibration,
            Role::Validator | Role::Admin => false,
        };
        if !permitted {
            return Err(GuardViolation::EditNotPermitted {
                operation: "record responses".to_string(),
                actor,
                status,
            }
            .into());
        }

        self.check_values(indicator_id, &values)?;

        record
            .responses
            .entry(indicator_id.clone())
            .or_default()
            .push(ResponseSubmission {
                submitted_at: self.clock.now(),
                submitted_by: actor,
                values,
            });
        record.evaluation = Some(self.recompute(&record));
        self.persist(record)
    }

    /// Record a reviewer's status and/or comment for one indicator.
    pub fn record_review(
        &self,
        id: &AssessmentId,
        indicator_id: &IndicatorId,
        actor: Role,
        review: ReviewInput,
        expected_version: Option<u64>,
    ) -> Result<AssessmentRecord, AssessmentServiceError> {
        let lease = self.lease(id);
        let _guard = lease.acquire();

        let mut record = self.load_checked(id, expected_version)?;
        let status = record.status();
        let permitted = matches!(
            (actor, status),
            (Role::Assessor, AssessmentStatus::InReview)
                | (Role::Validator, AssessmentStatus::AwaitingValidation)
                | (Role::Admin, AssessmentStatus::AwaitingMlgooApproval)
        );
        if !permitted {
            return Err(GuardViolation::EditNotPermitted {
                operation: "record review".to_string(),
                actor,
                status,
            }
            .into());
        }
        let definition = self
            .framework
            .indicator(indicator_id)
            .ok_or_else(|| AssessmentServiceError::UnknownIndicator(indicator_id.clone()))?;
        if review.status.is_some() && !matches!(definition.mode, IndicatorMode::Manual) {
            return Err(AssessmentServiceError::CalculatedStatus(indicator_id.clone()));
        }

        let previous = record.reviews.get(indicator_id).cloned();
        record.reviews.insert(
            indicator_id.clone(),
            IndicatorReview {
                status: review
                    .status
                    .or_else(|| previous.as_ref().and_then(|entry| entry.status)),
                comment: review
                    .comment
                    .or_else(|| previous.and_then(|entry| entry.comment)),
                reviewed_by: actor,
                recorded_at: self.clock.now(),
            },
        );
        record.evaluation = Some(self.recompute(&record));
        self.persist(record)
    }

    /// Recompute and store every derived verdict.
    pub fn evaluate(&self, id: &AssessmentId) -> Result<EvaluationReport, AssessmentServiceError> {
        let lease = self.lease(id);
        let _guard = lease.acquire();

        let mut record = self.load(id)?;
        let report = self.recompute(&record);
        record.evaluation = Some(report.clone());
        self.persist(record)?;
        Ok(report)
    }

    /// Attempt a workflow transition. Rejections are logged to the audit trail and returned.
    pub fn transition(
        &self,
        id: &AssessmentId,
        request: TransitionRequest,
        expected_version: Option<u64>,
    ) -> Result<AssessmentRecord, AssessmentServiceError> {
        let lease = self.lease(id);
        let _guard = lease.acquire();

        let mut record = self.load_checked(id, expected_version)?;
        let report = self.recompute(&record);
        let guards = self.guard_inputs(&record, &report)?;
        record.evaluation = Some(report);

        let now = self.clock.now();
        let from = record.status();

        match decide(&record.state, &request, &guards, &self.policy) {
            Ok(decision) => {
                record.state.apply(&decision, request.actor, now);
                record.transitions.append(TransitionRecord {
                    from,
                    to: decision.to,
                    action: request.action,
                    actor: request.actor,
                    at: now,
                    reason: request.reason,
                    outcome: TransitionOutcome::Committed,
                });

                let stored = self.persist(record)?;
                info!(
                    assessment_id = %stored.id,
                    from = from.label(),
                    to = decision.to.label(),
                    actor = request.actor.label(),
                    "transition committed"
                );

                let notification = Notification {
                    assessment_id: stored.id.clone(),
                    status: decision.to,
                    recipient: decision.to.next_actor(),
                };
                if let Err(error) = self.notifier.notify(notification) {
                    warn!(assessment_id = %stored.id, %error, "notification dropped");
                }
                Ok(stored)
            }
            Err(violation) => {
                record.transitions.append(TransitionRecord {
                    from,
                    to: from,
                    action: request.action,
                    actor: request.actor,
                    at: now,
                    reason: request.reason,
                    outcome: TransitionOutcome::Rejected {
                        violation: violation.kind().to_string(),
                    },
                });
                self.persist(record)?;
                info!(
                    assessment_id = %id,
                    action = request.action.label(),
                    actor = request.actor.label(),
                    violation = violation.kind(),
                    "transition rejected"
                );
                Err(violation.into())
            }
        }
    }

    fn recompute(&self, record: &AssessmentRecord) -> EvaluationReport {
        let responses = record.current_responses();
        let recorded = record.recorded_statuses();
        let report = self.framework.evaluate(&AssessmentInputs {
            responses: &responses,
            recorded: &recorded,
        });
        debug!(
            assessment_id = %record.id,
            verdicts = report.verdicts.len(),
            undetermined = report.undetermined.len(),
            compliance = report.compliance.is_some(),
            "assessment evaluated"
        );
        report
    }

    fn guard_inputs(
        &self,
        record: &AssessmentRecord,
        report: &EvaluationReport,
    ) -> Result<GuardInputs, AssessmentServiceError> {
        let since = record
            .state
            .current_phase_started()
            .unwrap_or(record.created_at);

        let mut indicators = BTreeMap::new();
        for indicator in self.framework.indicators() {
            let id = &indicator.id;
            let has_new_evidence = if record.state.flagged_indicators.contains(id) {
                record.has_responses_since(id, since)
                    || self.evidence.has_new_evidence_since(&record.id, id, since)?
            } else {
                false
            };
            indicators.insert(
                id.clone(),
                IndicatorReviewState {
                    status: report.status_of(id),
                    undetermined: report.is_undetermined(id),
                    comment: record
                        .reviews
                        .get(id)
                        .and_then(|review| review.comment.clone()),
                    has_new_evidence,
                },
            );
        }

        Ok(GuardInputs {
            indicators,
            missing_required_fields: self
                .framework
                .missing_required_fields(&record.current_responses()),
            compliance_recorded: report.compliance.is_some(),
        })
    }

    fn check_values(
        &self,
        indicator_id: &IndicatorId,
        values: &FieldValueMap,
    ) -> Result<(), AssessmentServiceError> {
        let definition = self
            .framework
            .indicator(indicator_id)
            .ok_or_else(|| AssessmentServiceError::UnknownIndicator(indicator_id.clone()))?;

        for (field_id, value) in values.iter() {
            let field = definition
                .fields
                .iter()
                .find(|field| &field.id == field_id)
                .ok_or_else(|| AssessmentServiceError::InvalidResponse {
                    indicator_id: indicator_id.clone(),
                    detail: format!("unknown field {field_id}"),
                })?;
            if field.kind != value.kind() {
                return Err(AssessmentServiceError::InvalidResponse {
                    indicator_id: indicator_id.clone(),
                    detail: format!(
                        "field {field_id} expects {}, got {}",
                        field.kind.label(),
                        value.kind().label()
                    ),
                });
            }
        }
        Ok(())
    }

    fn lease(&self, id: &AssessmentId) -> LockLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        LockLease {
            locks: &self.locks,
            id: id.clone(),
            lock: Arc::clone(locks.entry(id.clone()).or_default()),
        }
    }

    #[cfg(test)]
    pub(crate) fn held_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn load(&self, id: &AssessmentId) -> Result<AssessmentRecord, AssessmentServiceError> {
        self.repository
            .load(id)?
            .ok_or_else(|| AssessmentServiceError::NotFound(id.clone()))
    }

    fn load_checked(
        &self,
        id: &AssessmentId,
        expected_version: Option<u64>,
    ) -> Result<AssessmentRecord, AssessmentServiceError> {
        let record = self.load(id)?;
        match expected_version {
            Some(expected) if expected != record.version => {
                warn!(assessment_id = %id, expected, found = record.version, "stale client version");
                Err(AssessmentServiceError::ConcurrentModification {
                    expected,
                    found: record.version,
                })
            }
            _ => Ok(record),
        }
    }

    fn persist(&self, record: AssessmentRecord) -> Result<AssessmentRecord, AssessmentServiceError> {
        let expected = record.version;
        let id = record.id.clone();
        self.repository.save(record, expected).map_err(|error| {
            if let RepositoryError::VersionConflict { .. } = error {
                warn!(assessment_id = %id, %error, "concurrent modification");
            }
            AssessmentServiceError::from(error)
        })
    }
}

/// Error raised by the assessment service.
#[derive(Debug, thiserror::Error)]
pub enum AssessmentServiceError {
    #[error("assessment {0} not found")]
    NotFound(AssessmentId),
    #[error("indicator {0} is not part of the assessment framework")]
    UnknownIndicator(IndicatorId),
    #[error("invalid response for indicator {indicator_id}: {detail}")]
    InvalidResponse {
        indicator_id: IndicatorId,
        detail: String,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Statuses of calculated and container indicators are derived, never recorded.
    #[error("indicator {0} is resolved automatically; only comments may be recorded")]
    CalculatedStatus(IndicatorId),
    #[error(transparent)]
    Guard(#[from] GuardViolation),
    /// Retryable: another writer committed first.
    #[error("assessment was modified concurrently (expected version {expected}, found {found})")]
    ConcurrentModification { expected: u64, found: u64 },
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for AssessmentServiceError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::VersionConflict { expected, found } => {
                Self::ConcurrentModification { expected, found }
            }
            other => Self::Repository(other),
        }
    }
}

impl AssessmentServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}
