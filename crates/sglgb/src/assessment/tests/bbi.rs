use std::collections::BTreeMap;

use super::common::*;
use crate::assessment::bbi::{resolve_bbi, BbiDefinition};
use crate::assessment::domain::{BbiFunctionality, BbiId, ComplianceStatus, TypedValue};
use crate::assessment::rules::{
    FieldPredicate, MatchOperator, OutcomeLabels, RuleNode, Threshold,
};

fn council() -> BbiDefinition {
    BbiDefinition {
        id: BbiId::from("BCPC"),
        name: "Barangay Council for the Protection of Children".to_string(),
        rule: RuleNode::all_of(vec![
            RuleNode::matches("4.1", MatchOperator::Ne, TypedValue::text("fail")),
            RuleNode::percentage(
                &["1.1", "1.2"],
                FieldPredicate::Equals {
                    value: TypedValue::text("pass"),
                },
                Threshold::Percent(50.0),
            ),
        ]),
        labels: OutcomeLabels::functional(),
    }
}

#[test]
fn dependencies_are_referenced_indicators() {
    assert_eq!(council().dependencies(), vec![id("4.1"), id("1.1"), id("1.2")]);
}

#[test]
fn functional_when_rule_holds() {
    let mut verdicts = BTreeMap::new();
    verdicts.insert(id("4.1"), ComplianceStatus::Conditional);
    verdicts.insert(id("1.1"), ComplianceStatus::Pass);
    verdicts.insert(id("1.2"), ComplianceStatus::Fail);

    let status = resolve_bbi(&council(), &verdicts).expect("resolves");

    assert_eq!(status.status, BbiFunctionality::Functional);
    assert_eq!(status.label, "Functional");
    assert_eq!(status.depends_on.len(), 3);
}

#[test]
fn non_functional_when_rule_fails() {
    let mut verdicts = BTreeMap::new();
    verdicts.insert(id("4.1"), ComplianceStatus::Fail);
    verdicts.insert(id("1.1"), ComplianceStatus::Pass);
    verdicts.insert(id("1.2"), ComplianceStatus::Pass);

    let status = resolve_bbi(&council(), &verdicts).expect("resolves");

    assert_eq!(status.status, BbiFunctionality::NonFunctional);
    assert_eq!(status.label, "Non-Functional");
}

#[test]
fn unknown_while_dependencies_are_unevaluated() {
    let mut verdicts = BTreeMap::new();
    verdicts.insert(id("4.1"), ComplianceStatus::Pass);
    verdicts.insert(id("1.1"), ComplianceStatus::NotEvaluated);

    let status = resolve_bbi(&council(), &verdicts).expect("resolves");

    assert_eq!(status.status, BbiFunctionality::Unknown);
    assert!(status.explanation.contains("1.1"));
    assert!(status.explanation.contains("1.2"));
}
