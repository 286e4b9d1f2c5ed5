use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{FieldPredicate, MatchOperator, RuleNode};
use crate::assessment::domain::{
    BbiFunctionality, BbiId, ComplianceStatus, FieldId, FieldKind, FieldValueMap, IndicatorId,
    TypedValue,
};

/// Failure to reach a verdict. Never conflated with a Fail result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationError {
    #[error("field {field_id} has no submitted value")]
    MissingField { field_id: FieldId },
    #[error("field {field_id} holds a {found:?} value which cannot be compared with {operator} against a {expected:?} literal")]
    TypeMismatch {
        field_id: FieldId,
        operator: String,
        found: FieldKind,
        expected: FieldKind,
    },
    #[error("percentage threshold has no fields to divide by")]
    ZeroDenominator,
    #[error("{group} group has no children")]
    EmptyGroup { group: String },
    #[error("BBI {bbi_id} has not been resolved yet")]
    UnresolvedBbi { bbi_id: BbiId },
    #[error("BBI {bbi_id} functionality is unknown")]
    IndeterminateBbi { bbi_id: BbiId },
}

/// Lookup surface the evaluator reads from.
pub trait RuleContext {
    fn value(&self, field_id: &FieldId) -> Option<TypedValue>;
    fn bbi(&self, bbi_id: &BbiId) -> Option<BbiFunctionality>;
}

/// Raw form answers plus the BBI statuses resolved so far.
pub struct FieldContext<'a> {
    fields: &'a FieldValueMap,
    bbis: &'a BTreeMap<BbiId, BbiFunctionality>,
}

impl<'a> FieldContext<'a> {
    pub fn new(fields: &'a FieldValueMap, bbis: &'a BTreeMap<BbiId, BbiFunctionality>) -> Self {
        Self { fields, bbis }
    }
}

impl RuleContext for FieldContext<'_> {
    fn value(&self, field_id: &FieldId) -> Option<TypedValue> {
        self.fields.get(field_id).cloned()
    }

    fn bbi(&self, bbi_id: &BbiId) -> Option<BbiFunctionality> {
        self.bbis.get(bbi_id).copied()
    }
}

/// Indicator verdicts exposed as text fields keyed by indicator id (`"pass"`, `"fail"`, ...).
pub struct VerdictContext<'a> {
    verdicts: &'a BTreeMap<IndicatorId, ComplianceStatus>,
}

impl<'a> VerdictContext<'a> {
    pub fn new(verdicts: &'a BTreeMap<IndicatorId, ComplianceStatus>) -> Self {
        Self { verdicts }
    }
}

impl RuleContext for VerdictContext<'_> {
    fn value(&self, field_id: &FieldId) -> Option<TypedValue> {
        self.verdicts
            .get(&IndicatorId(field_id.0.clone()))
            .map(|status| TypedValue::text(status.key()))
    }

    fn bbi(&self, _bbi_id: &BbiId) -> Option<BbiFunctionality> {
        None
    }
}

/// Result of evaluating a rule tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub satisfied: bool,
    pub explanation: String,
    /// Leaf fields on the deciding path that did not hold.
    pub failed_fields: Vec<FieldId>,
    /// Every field value read while evaluating, for audit.
    pub consulted: BTreeMap<FieldId, TypedValue>,
}

struct Partial {
    satisfied: bool,
    explanation: String,
    failed_fields: Vec<FieldId>,
}

impl Partial {
    fn pass(explanation: String) -> Self {
        Self {
            satisfied: true,
            explanation,
            failed_fields: Vec::new(),
        }
    }

    fn fail(explanation: String, failed_fields: Vec<FieldId>) -> Self {
        Self {
            satisfied: false,
            explanation,
            failed_fields,
        }
    }
}

/// Evaluate `node` against `context`. Pure; the same inputs always yield the same outcome.
pub fn evaluate(node: &RuleNode, context: &dyn RuleContext) -> Result<RuleOutcome, EvaluationError> {
    let mut consulted = BTreeMap::new();
    let partial = evaluate_node(node, context, &mut consulted)?;
    Ok(RuleOutcome {
        satisfied: partial.satisfied,
        explanation: partial.explanation,
        failed_fields: partial.failed_fields,
        consulted,
    })
}

fn evaluate_node(
    node: &RuleNode,
    context: &dyn RuleContext,
    consulted: &mut BTreeMap<FieldId, TypedValue>,
) -> Result<Partial, EvaluationError> {
    match node {
        RuleNode::AllOf { children } => {
            if children.is_empty() {
                return Err(EvaluationError::EmptyGroup {
                    group: "all_of".to_string(),
                });
            }
            for child in children {
                let result = evaluate_node(child, context, consulted)?;
                if !result.satisfied {
                    return Ok(Partial::fail(result.explanation, result.failed_fields));
                }
            }
            Ok(Partial::pass(format!(
                "all {} conditions satisfied",
                children.len()
            )))
        }
        RuleNode::AnyOf { children } => {
            if children.is_empty() {
                return Err(EvaluationError::EmptyGroup {
                    group: "any_of".to_string(),
                });
            }
            let mut reasons = Vec::with_capacity(children.len());
            let mut failed_fields = Vec::new();
            for child in children {
                let result = evaluate_node(child, context, consulted)?;
                if result.satisfied {
                    return Ok(Partial::pass(result.explanation));
                }
                reasons.push(result.explanation);
                extend_unique(&mut failed_fields, result.failed_fields);
            }
            Ok(Partial::fail(
                format!("no alternative satisfied: {}", reasons.join("; ")),
                failed_fields,
            ))
        }
        RuleNode::PercentageThreshold {
            fields,
            predicate,
            threshold,
        } => {
            if fields.is_empty() {
                return Err(EvaluationError::ZeroDenominator);
            }
            let mut met = 0usize;
            let mut failed_fields = Vec::new();
            for field_id in fields {
                let value = lookup(field_id, context, consulted)?;
                if predicate_holds(predicate, field_id, &value)? {
                    met += 1;
                } else {
                    failed_fields.push(field_id.clone());
                }
            }
            let total = fields.len();
            let percent = met as f64 * 100.0 / total as f64;
            let explanation = format!(
                "{met} of {total} fields met the condition ({percent:.1}%, required {:.1}%)",
                threshold.as_percent()
            );
            if threshold.is_met(met, total) {
                Ok(Partial::pass(explanation))
            } else {
                Ok(Partial::fail(explanation, failed_fields))
            }
        }
        RuleNode::CountThreshold {
            children,
            threshold,
        } => {
            if children.is_empty() {
                return Err(EvaluationError::EmptyGroup {
                    group: "count_threshold".to_string(),
                });
            }
            let required = *threshold as usize;
            let mut satisfied = 0usize;
            let mut remaining = children.len();
            let mut failed_fields = Vec::new();
            for child in children {
                let result = evaluate_node(child, context, consulted)?;
                remaining -= 1;
                if result.satisfied {
                    satisfied += 1;
                    if satisfied >= required {
                        return Ok(Partial::pass(format!(
                            "{satisfied} of {} conditions satisfied (need {required})",
                            children.len()
                        )));
                    }
                } else {
                    extend_unique(&mut failed_fields, result.failed_fields);
                }
                if satisfied + remaining < required {
                    break;
                }
            }
            if satisfied >= required {
                return Ok(Partial::pass(format!(
                    "{satisfied} of {} conditions satisfied (need {required})",
                    children.len()
                )));
            }
            Ok(Partial::fail(
                format!(
                    "only {satisfied} of {} conditions satisfied (need {required})",
                    children.len()
                ),
                failed_fields,
            ))
        }
        RuleNode::MatchValue {
            field_id,
            operator,
            expected,
        } => {
            let value = lookup(field_id, context, consulted)?;
            let holds = compare(field_id, *operator, &value, expected)?;
            let explanation = format!(
                "{field_id} = {value} {} {} {expected}",
                if holds { "satisfies" } else { "does not satisfy" },
                operator.symbol()
            );
            if holds {
                Ok(Partial::pass(explanation))
            } else {
                Ok(Partial::fail(explanation, vec![field_id.clone()]))
            }
        }
        RuleNode::BbiFunctionalityCheck { bbi_id, expected } => {
            let status = context
                .bbi(bbi_id)
                .ok_or_else(|| EvaluationError::UnresolvedBbi {
                    bbi_id: bbi_id.clone(),
                })?;
            if status == BbiFunctionality::Unknown {
                return Err(EvaluationError::IndeterminateBbi {
                    bbi_id: bbi_id.clone(),
                });
            }
            let explanation = format!(
                "BBI {bbi_id} is {} (expected {})",
                status.label(),
                expected.label()
            );
            if status == *expected {
                Ok(Partial::pass(explanation))
            } else {
                Ok(Partial::fail(explanation, Vec::new()))
            }
        }
    }
}

fn lookup(
    field_id: &FieldId,
    context: &dyn RuleContext,
    consulted: &mut BTreeMap<FieldId, TypedValue>,
) -> Result<TypedValue, EvaluationError> {
    let value = context
        .value(field_id)
        .ok_or_else(|| EvaluationError::MissingField {
            field_id: field_id.clone(),
        })?;
    consulted.insert(field_id.clone(), value.clone());
    Ok(value)
}

fn predicate_holds(
    predicate: &FieldPredicate,
    field_id: &FieldId,
    value: &TypedValue,
) -> Result<bool, EvaluationError> {
    match predicate {
        FieldPredicate::IsYes => match value {
            TypedValue::Boolean(flag) => Ok(*flag),
            TypedValue::Text(text) => {
                let text = text.trim();
                Ok(text.eq_ignore_ascii_case("yes") || text.eq_ignore_ascii_case("true"))
            }
            other => Err(EvaluationError::TypeMismatch {
                field_id: field_id.clone(),
                operator: "is_yes".to_string(),
                found: other.kind(),
                expected: FieldKind::Boolean,
            }),
        },
        FieldPredicate::NonEmpty => Ok(match value {
            TypedValue::Text(text) => !text.trim().is_empty(),
            TypedValue::Set(values) => !values.is_empty(),
            TypedValue::Number(_) | TypedValue::Boolean(_) => true,
        }),
        FieldPredicate::AtLeast { value: minimum } => match value {
            TypedValue::Number(number) => Ok(*number >= *minimum),
            other => Err(EvaluationError::TypeMismatch {
                field_id: field_id.clone(),
                operator: "at_least".to_string(),
                found: other.kind(),
                expected: FieldKind::Number,
            }),
        },
        FieldPredicate::Equals { value: expected } => {
            compare(field_id, MatchOperator::Eq, value, expected)
        }
    }
}

fn compare(
    field_id: &FieldId,
    operator: MatchOperator,
    actual: &TypedValue,
    expected: &TypedValue,
) -> Result<bool, EvaluationError> {
    let mismatch = || EvaluationError::TypeMismatch {
        field_id: field_id.clone(),
        operator: operator.symbol().to_string(),
        found: actual.kind(),
        expected: expected.kind(),
    };

    match operator {
        MatchOperator::Eq | MatchOperator::Ne => {
            if actual.kind() != expected.kind() {
                return Err(mismatch());
            }
            let equal = match (actual, expected) {
                (TypedValue::Text(left), TypedValue::Text(right)) => {
                    left.trim().eq_ignore_ascii_case(right.trim())
                }
                _ => actual == expected,
            };
            Ok(if operator == MatchOperator::Eq {
                equal
            } else {
                !equal
            })
        }
        MatchOperator::Ge | MatchOperator::Le => match (actual, expected) {
            (TypedValue::Number(left), TypedValue::Number(right)) => {
                Ok(if operator == MatchOperator::Ge {
                    left >= right
                } else {
                    left <= right
                })
            }
            _ => Err(mismatch()),
        },
        MatchOperator::Contains => match (actual, expected) {
            (TypedValue::Set(values), TypedValue::Text(needle)) => Ok(values.contains(needle)),
            (TypedValue::Text(haystack), TypedValue::Text(needle)) => {
                Ok(haystack.contains(needle.as_str()))
            }
            _ => Err(mismatch()),
        },
    }
}

fn extend_unique(target: &mut Vec<FieldId>, source: Vec<FieldId>) {
    for field in source {
        if !target.contains(&field) {
            target.push(field);
        }
    }
}
