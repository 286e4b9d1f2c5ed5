use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::assessment::domain::{AssessmentId, FieldValueMap, IndicatorId, Role, TypedValue};
use crate::assessment::framework::AssessmentFramework;
use crate::assessment::repository::{
    AssessmentRecord, AssessmentRepository, EvidenceError, EvidenceSource, Notification,
    NotificationError, NotificationPublisher, RepositoryError,
};
use crate::assessment::service::{AssessmentService, Clock, NewAssessment};
use crate::assessment::workflow::CyclePolicy;

/// Five areas (three Core, two Essential) covering every indicator mode.
pub(super) const FRAMEWORK_JSON: &str = r#"{
  "name": "SGLGB test framework",
  "indicators": [
    {
      "id": "1.1",
      "name": "Budget transparency",
      "fields": [
        { "id": "budget_posted", "label": "Budget posted", "kind": "boolean" },
        { "id": "posting_photos", "label": "Posting photos", "kind": "boolean" }
      ],
      "mode": {
        "kind": "calculated",
        "schema": {
          "root": {
            "type": "all_of",
            "children": [
              { "type": "match_value", "field_id": "budget_posted", "operator": "==", "expected": true },
              { "type": "match_value", "field_id": "posting_photos", "operator": "==", "expected": true }
            ]
          }
        }
      },
      "remarks": [
        { "status": "fail", "text": "{indicator_name}: missing {failing_fields}" }
      ]
    },
    {
      "id": "1.2",
      "name": "Ordinance compliance",
      "fields": [
        { "id": "a", "label": "Ordinance A", "kind": "text" },
        { "id": "b", "label": "Ordinance B", "kind": "text" },
        { "id": "c", "label": "Ordinance C", "kind": "text" },
        { "id": "d", "label": "Ordinance D", "kind": "text" }
      ],
      "mode": {
        "kind": "calculated",
        "schema": {
          "root": {
            "type": "percentage_threshold",
            "fields": ["a", "b", "c", "d"],
            "predicate": "is_yes",
            "threshold": { "percent": 50 }
          }
        }
      }
    },
    {
      "id": "2.1",
      "name": "Disaster preparedness",
      "mode": {
        "kind": "calculated",
        "schema": {
          "root": { "type": "bbi_functionality_check", "bbi_id": "BDRRMC" }
        }
      }
    },
    {
      "id": "3.1",
      "name": "Peace and order plan",
      "mode": {
        "kind": "container",
        "children": [
          { "indicator_id": "3.1.1" },
          { "indicator_id": "3.1.2", "required": false }
        ]
      }
    },
    {
      "id": "3.1.1",
      "name": "Plan adopted",
      "fields": [
        { "id": "plan_adopted", "label": "Plan adopted", "kind": "boolean" }
      ],
      "mode": {
        "kind": "calculated",
        "schema": {
          "root": { "type": "match_value", "field_id": "plan_adopted", "operator": "==", "expected": true }
        }
      }
    },
    {
      "id": "3.1.2",
      "name": "Plan published online",
      "fields": [
        { "id": "plan_url", "label": "Plan URL", "kind": "text" }
      ],
      "mode": {
        "kind": "calculated",
        "schema": {
          "root": { "type": "percentage_threshold", "fields": ["plan_url"], "predicate": "non_empty", "threshold": { "fraction": 1.0 } }
        }
      }
    },
    {
      "id": "4.1",
      "name": "Solid waste program",
      "fields": [
        { "id": "program_status", "label": "Program status", "kind": "text" }
      ],
      "mode": {
        "kind": "calculated",
        "schema": {
          "root": { "type": "match_value", "field_id": "program_status", "operator": "==", "expected": "complete" },
          "conditional": {
            "rule": { "type": "match_value", "field_id": "program_status", "operator": "==", "expected": "ongoing" },
            "label": "Considered"
          }
        }
      }
    },
    {
      "id": "5.1",
      "name": "Tourism desk",
      "mode": { "kind": "manual" }
    }
  ],
  "bbis": [
    {
      "id": "BDRRMC",
      "name": "Barangay Disaster Risk Reduction and Management Committee",
      "rule": { "type": "match_value", "field_id": "1.1", "operator": "==", "expected": "pass" }
    }
  ],
  "areas": [
    { "id": "CORE-1", "name": "Financial Administration", "kind": "core", "indicators": ["1.1", "1.2"] },
    { "id": "CORE-2", "name": "Disaster Preparedness", "kind": "core", "indicators": ["2.1"] },
    { "id": "CORE-3", "name": "Safety, Peace and Order", "kind": "core", "indicators": ["3.1"] },
    { "id": "ESS-1", "name": "Environmental Management", "kind": "essential", "indicators": ["4.1"] },
    { "id": "ESS-2", "name": "Tourism", "kind": "essential", "indicators": ["5.1"] }
  ]
}"#;

pub(super) fn framework() -> AssessmentFramework {
    AssessmentFramework::from_json(FRAMEWORK_JSON).expect("fixture framework is valid")
}

pub(super) fn id(value: &str) -> IndicatorId {
    IndicatorId::from(value)
}

pub(super) fn yes() -> TypedValue {
    TypedValue::text("yes")
}

pub(super) fn no() -> TypedValue {
    TypedValue::text("no")
}

/// Answers for every indicator; `ordinances_yes` controls how many of 1.2's four fields are yes.
pub(super) fn answers(ordinances_yes: usize) -> BTreeMap<IndicatorId, FieldValueMap> {
    let ordinance = |index: usize| if index < ordinances_yes { yes() } else { no() };
    let mut responses = BTreeMap::new();
    responses.insert(
        id("1.1"),
        FieldValueMap::new()
            .with("budget_posted", TypedValue::Boolean(true))
            .with("posting_photos", TypedValue::Boolean(true)),
    );
    responses.insert(
        id("1.2"),
        FieldValueMap::new()
            .with("a", ordinance(0))
            .with("b", ordinance(1))
            .with("c", ordinance(2))
            .with("d", ordinance(3)),
    );
    responses.insert(
        id("3.1.1"),
        FieldValueMap::new().with("plan_adopted", TypedValue::Boolean(true)),
    );
    responses.insert(
        id("3.1.2"),
        FieldValueMap::new().with("plan_url", TypedValue::text("https://brgy.example/plan")),
    );
    responses.insert(
        id("4.1"),
        FieldValueMap::new().with("program_status", TypedValue::text("complete")),
    );
    responses
}

/// Clock that advances one minute on every read, so phase boundaries are strictly ordered.
pub(super) struct SteppingClock {
    base: DateTime<Utc>,
    ticks: AtomicI64,
}

impl Default for SteppingClock {
    fn default() -> Self {
        Self {
            base: Utc
                .with_ymd_and_hms(2025, 3, 3, 8, 0, 0)
                .single()
                .expect("valid timestamp"),
            ticks: AtomicI64::new(0),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        self.base + Duration::minutes(tick)
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    pub(super) records: Arc<Mutex<HashMap<AssessmentId, AssessmentRecord>>>,
}

impl MemoryRepository {
    pub(super) fn stored(&self, id: &AssessmentId) -> AssessmentRecord {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
            .expect("record present")
    }
}

impl AssessmentRepository for MemoryRepository {
    fn insert(&self, record: AssessmentRecord) -> Result<AssessmentRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn load(&self, id: &AssessmentId) -> Result<Option<AssessmentRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn save(
        &self,
        mut record: AssessmentRecord,
        expected_version: u64,
    ) -> Result<AssessmentRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
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

/// Accepts inserts and loads but always reports that someone else saved first.
#[derive(Default)]
pub(super) struct RacingRepository {
    inner: MemoryRepository,
}

impl AssessmentRepository for RacingRepository {
    fn insert(&self, record: AssessmentRecord) -> Result<AssessmentRecord, RepositoryError> {
        self.inner.insert(record)
    }

    fn load(&self, id: &AssessmentId) -> Result<Option<AssessmentRecord>, RepositoryError> {
        self.inner.load(id)
    }

    fn save(
        &self,
        _record: AssessmentRecord,
        expected_version: u64,
    ) -> Result<AssessmentRecord, RepositoryError> {
        Err(RepositoryError::VersionConflict {
            expected: expected_version,
            found: expected_version + 1,
        })
    }
}

pub(super) struct UnavailableRepository;

impl AssessmentRepository for UnavailableRepository {
    fn insert(&self, _record: AssessmentRecord) -> Result<AssessmentRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn load(&self, _id: &AssessmentId) -> Result<Option<AssessmentRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn save(
        &self,
        _record: AssessmentRecord,
        _expected_version: u64,
    ) -> Result<AssessmentRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryNotifier {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    pub(super) fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationPublisher for MemoryNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl NotificationPublisher for FailingNotifier {
    fn notify(&self, _notification: Notification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp offline".to_string()))
    }
}

/// Evidence store with no uploads; new evidence can only come from re-submitted answers.
#[derive(Default)]
pub(super) struct NoUploads;

impl EvidenceSource for NoUploads {
    fn has_new_evidence_since(
        &self,
        _assessment: &AssessmentId,
        _indicator: &IndicatorId,
        _since: DateTime<Utc>,
    ) -> Result<bool, EvidenceError> {
        Ok(false)
    }
}

/// Evidence store reporting a fresh upload for the listed indicators.
#[derive(Default)]
pub(super) struct UploadedFor(pub(super) Vec<IndicatorId>);

impl EvidenceSource for UploadedFor {
    fn has_new_evidence_since(
        &self,
        _assessment: &AssessmentId,
        indicator: &IndicatorId,
        _since: DateTime<Utc>,
    ) -> Result<bool, EvidenceError> {
        Ok(self.0.contains(indicator))
    }
}

pub(super) type TestService = AssessmentService<MemoryRepository, MemoryNotifier, NoUploads>;

pub(super) fn build_service() -> (TestService, Arc<MemoryRepository>, Arc<MemoryNotifier>) {
    let repository = Arc::new(MemoryRepository::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let service = AssessmentService::with_clock(
        Arc::new(framework()),
        repository.clone(),
        notifier.clone(),
        Arc::new(NoUploads),
        CyclePolicy::default(),
        Arc::new(SteppingClock::default()),
    );
    (service, repository, notifier)
}

pub(super) fn open(service: &TestService) -> AssessmentRecord {
    service
        .create(NewAssessment {
            barangay: "Barangay San Isidro".to_string(),
        })
        .expect("assessment opens")
}

/// Submit every answer as BLGU.
pub(super) fn answer_all(service: &TestService, assessment: &AssessmentId, ordinances_yes: usize) {
    for (indicator, values) in answers(ordinances_yes) {
        service
            .record_responses(assessment, &indicator, Role::Blgu, values, None)
            .expect("responses accepted");
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
