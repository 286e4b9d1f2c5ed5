use metrics_exporter_prometheus::PrometheusHandle;
use sglgb::assessment::{
    AssessmentFramework, AssessmentId, AssessmentRecord, AssessmentRepository, EvidenceError,
    EvidenceSource, IndicatorId, Notification, NotificationError, NotificationPublisher,
    RepositoryError,
};
use sglgb::error::AppError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

pub(crate) const DEMO_FRAMEWORK: &str = include_str!("../assets/demo-framework.json");

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryAssessmentRepository {
    records: Arc<Mutex<HashMap<AssessmentId, AssessmentRecord>>>,
}

impl AssessmentRepository for InMemoryAssessmentRepository {
    fn insert(&self, record: AssessmentRecord) -> Result<AssessmentRecord, RepositoryError> {
        let mut guard = self.records.lock().map_err(poisoned)?;
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn load(&self, id: &AssessmentId) -> Result<Option<AssessmentRecord>, RepositoryError> {
        let guard = self.records.lock().map_err(poisoned)?;
        Ok(guard.get(id).cloned())
    }

    fn save(
        &self,
        mut record: AssessmentRecord,
        expected_version: u64,
    ) -> Result<AssessmentRecord, RepositoryError> {
        let mut guard = self.records.lock().map_err(poisoned)?;
        let found = guard
            .get(&record.id)
            .map(|stored| stored.version)
            .ok_or(RepositoryError::NotFound)?;
        if found != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                found,
            });
        }
        record.version = expected_version + 1;
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }
}

fn poisoned<T>(_: PoisonError<T>) -> RepositoryError {
    RepositoryError::Unavailable("repository lock poisoned".to_string())
}

/// Mirrors notifications to the log in place of an e-mail transport.
#[derive(Default, Clone, Copy)]
pub(crate) struct LoggingNotifier;

impl NotificationPublisher for LoggingNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            assessment_id = %notification.assessment_id,
            status = notification.status.label(),
            recipient = notification.recipient.label(),
            "assessment notification queued"
        );
        Ok(())
    }
}

/// No file storage is wired in; resubmissions rely on re-answered indicators.
#[derive(Default, Clone, Copy)]
pub(crate) struct NoEvidenceStore;

impl EvidenceSource for NoEvidenceStore {
    fn has_new_evidence_since(
        &self,
        _assessment: &AssessmentId,
        _indicator: &IndicatorId,
        _since: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool, EvidenceError> {
        Ok(false)
    }
}

/// Load the framework from `path`, falling back to the bundled demonstration framework.
pub(crate) fn load_framework(path: Option<&Path>) -> Result<AssessmentFramework, AppError> {
    match path {
        Some(path) => {
            let framework = AssessmentFramework::load(path)?;
            info!(path = %path.display(), name = framework.name(), "framework loaded");
            Ok(framework)
        }
        None => {
            warn!("APP_FRAMEWORK_PATH not set; using the bundled demonstration framework");
            demo_framework()
        }
    }
}

pub(crate) fn demo_framework() -> Result<AssessmentFramework, AppError> {
    AssessmentFramework::from_json(DEMO_FRAMEWORK)
        .map_err(|err| AppError::Framework(err.into()))
}
