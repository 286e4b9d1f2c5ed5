use std::collections::BTreeMap;

use serde_json::Value;

use super::common::*;
use crate::assessment::domain::{BbiFunctionality, BbiId, ComplianceStatus, FieldId};
use crate::assessment::framework::{AssessmentFramework, EvaluationStep, FrameworkLoadError};
use crate::assessment::pipeline::AssessmentInputs;
use crate::assessment::rules::{EvaluationError, SchemaValidationError};

fn position(order: &[EvaluationStep], step: &EvaluationStep) -> usize {
    order
        .iter()
        .position(|candidate| candidate == step)
        .expect("step present in order")
}

fn mutate(edit: impl FnOnce(&mut Value)) -> String {
    let mut document: Value = serde_json::from_str(FRAMEWORK_JSON).expect("fixture parses");
    edit(&mut document);
    document.to_string()
}

#[test]
fn evaluation_order_resolves_dependencies_first() {
    let framework = framework();
    let order = framework.evaluation_order();

    let budget = position(order, &EvaluationStep::Indicator(id("1.1")));
    let committee = position(order, &EvaluationStep::Bbi(BbiId::from("BDRRMC")));
    let preparedness = position(order, &EvaluationStep::Indicator(id("2.1")));
    let plan = position(order, &EvaluationStep::Indicator(id("3.1")));
    let adopted = position(order, &EvaluationStep::Indicator(id("3.1.1")));

    assert!(budget < committee);
    assert!(committee < preparedness);
    assert!(adopted < plan);
}

#[test]
fn dependency_cycles_are_rejected_at_load() {
    let raw = mutate(|document| {
        // 1.1 now depends on the BBI that depends on 1.1.
        document["indicators"][0]["mode"]["schema"]["root"] =
            serde_json::json!({ "type": "bbi_functionality_check", "bbi_id": "BDRRMC" });
    });

    match AssessmentFramework::from_json(&raw) {
        Err(SchemaValidationError::DependencyCycle { .. }) => {}
        other => panic!("expected dependency cycle, got {other:?}"),
    }
}

#[test]
fn empty_groups_are_rejected_at_load() {
    let raw = mutate(|document| {
        document["indicators"][0]["mode"]["schema"]["root"]["children"] = serde_json::json!([]);
    });

    match AssessmentFramework::from_json(&raw) {
        Err(SchemaValidationError::EmptyGroup { owner, group }) => {
            assert_eq!(owner, "indicator 1.1");
            assert_eq!(group, "all_of");
        }
        other => panic!("expected empty group, got {other:?}"),
    }
}

#[test]
fn indicators_may_belong_to_one_area_only() {
    let raw = mutate(|document| {
        document["areas"][4]["indicators"] = serde_json::json!(["5.1", "1.1"]);
    });

    assert!(matches!(
        AssessmentFramework::from_json(&raw),
        Err(SchemaValidationError::IndicatorInMultipleAreas { .. })
    ));
}

#[test]
fn framework_requires_an_essential_area() {
    let raw = mutate(|document| {
        document["areas"][3]["kind"] = serde_json::json!("core");
        document["areas"][4]["kind"] = serde_json::json!("core");
    });

    match AssessmentFramework::from_json(&raw) {
        Err(SchemaValidationError::MissingAreaKind { kind }) => assert_eq!(kind, "Essential"),
        other => panic!("expected missing area kind, got {other:?}"),
    }
}

#[test]
fn bbi_rules_only_compare_verdict_keys() {
    let raw = mutate(|document| {
        document["bbis"][0]["rule"]["expected"] = serde_json::json!("passed");
    });

    assert!(matches!(
        AssessmentFramework::from_json(&raw),
        Err(SchemaValidationError::InvalidVerdictLiteral { .. })
    ));
}

#[test]
fn malformed_documents_are_reported() {
    assert!(matches!(
        AssessmentFramework::from_json("{ \"name\": 1 }"),
        Err(SchemaValidationError::Malformed(_))
    ));
}

#[test]
fn loading_a_missing_file_reports_the_path() {
    match AssessmentFramework::load("/nonexistent/framework.json") {
        Err(FrameworkLoadError::Io { path, .. }) => {
            assert_eq!(path.to_string_lossy(), "/nonexistent/framework.json")
        }
        other => panic!("expected io error, got {other:?}"),
    }
}

#[test]
fn missing_required_fields_are_listed_per_indicator() {
    let framework = framework();
    let mut responses = answers(4);
    responses.remove(&id("4.1"));

    assert_eq!(
        framework.missing_required_fields(&responses),
        vec![(id("4.1"), FieldId::from("program_status"))]
    );
}

#[test]
fn full_evaluation_resolves_bbis_before_dependents() {
    let framework = framework();
    let responses = answers(2);
    let mut recorded = BTreeMap::new();
    recorded.insert(id("5.1"), ComplianceStatus::Pass);

    let report = framework.evaluate(&AssessmentInputs {
        responses: &responses,
        recorded: &recorded,
    });

    assert!(report.undetermined.is_empty(), "{:?}", report.undetermined);
    assert_eq!(
        report.bbis[&BbiId::from("BDRRMC")].status,
        BbiFunctionality::Functional
    );
    assert_eq!(report.status_of(&id("2.1")), ComplianceStatus::Pass);
    assert_eq!(report.status_of(&id("3.1")), ComplianceStatus::Pass);

    let verdict = report.compliance.expect("every area decided");
    assert!(verdict.passed);
    assert_eq!(verdict.decided_by, "3 of 3 Core passed, 2 of 2 Essential passed");
}

#[test]
fn undetermined_indicators_propagate_instead_of_failing() {
    let framework = framework();
    let mut responses = answers(4);
    responses.remove(&id("1.1"));
    let recorded = BTreeMap::new();

    let report = framework.evaluate(&AssessmentInputs {
        responses: &responses,
        recorded: &recorded,
    });

    assert!(matches!(
        report.undetermined.get(&id("1.1")),
        Some(EvaluationError::MissingField { .. })
    ));
    assert_eq!(
        report.bbis[&BbiId::from("BDRRMC")].status,
        BbiFunctionality::Unknown
    );
    assert!(matches!(
        report.undetermined.get(&id("2.1")),
        Some(EvaluationError::IndeterminateBbi { .. })
    ));
    assert!(report.compliance.is_none());
    assert!(report.compliance_blocked_by.is_some());
    assert!(report.failing().is_empty(), "errors are never folded into Fail");
}

#[test]
fn evaluation_is_idempotent() {
    let framework = framework();
    let responses = answers(1);
    let mut recorded = BTreeMap::new();
    recorded.insert(id("5.1"), ComplianceStatus::Fail);
    let inputs = AssessmentInputs {
        responses: &responses,
        recorded: &recorded,
    };

    let first = framework.evaluate(&inputs);
    let second = framework.evaluate(&inputs);

    assert_eq!(first, second);
    let verdict = first.compliance.expect("every area decided");
    assert!(!verdict.passed);
}
