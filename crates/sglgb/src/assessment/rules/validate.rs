use std::collections::{BTreeMap, BTreeSet};

use super::{FieldPredicate, MatchOperator, RuleNode};
use crate::assessment::domain::{
    BbiId, ComplianceStatus, FieldId, FieldKind, IndicatorId, TypedValue,
};

/// Load-time rejection of a rule tree or framework document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("schema document is malformed: {0}")]
    Malformed(String),
    #[error("{owner}: {group} must declare at least one child")]
    EmptyGroup { owner: String, group: &'static str },
    #[error("{owner}: percentage_threshold must list at least one field")]
    EmptyFieldList { owner: String },
    #[error("{owner}: threshold {threshold} is outside its declared range")]
    ThresholdOutOfRange { owner: String, threshold: f64 },
    #[error("{owner}: count threshold {threshold} must be between 1 and {children}")]
    CountThresholdOutOfRange {
        owner: String,
        threshold: u32,
        children: usize,
    },
    #[error("{owner}: rule references undeclared field {field_id}")]
    UnknownField { owner: String, field_id: FieldId },
    #[error("{owner}: rule references undeclared BBI {bbi_id}")]
    UnknownBbi { owner: String, bbi_id: BbiId },
    #[error("{owner}: references undeclared indicator {indicator_id}")]
    UnknownIndicator {
        owner: String,
        indicator_id: IndicatorId,
    },
    #[error("{owner}: operator {operator} cannot be applied to {kind} field {field_id}")]
    OperatorMismatch {
        owner: String,
        field_id: FieldId,
        operator: String,
        kind: &'static str,
    },
    #[error("{owner}: {literal} is not a verdict status")]
    InvalidVerdictLiteral { owner: String, literal: String },
    #[error("{owner}: {node} rules are not allowed here")]
    UnsupportedNode { owner: String, node: &'static str },
    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: String },
    #[error("{owner}: {detail}")]
    InvalidDefinition { owner: String, detail: String },
    #[error("indicator {indicator_id} is assigned to more than one governance area")]
    IndicatorInMultipleAreas { indicator_id: IndicatorId },
    #[error("framework must declare at least one {kind} governance area")]
    MissingAreaKind { kind: &'static str },
    #[error("evaluation dependencies form a cycle through {node}")]
    DependencyCycle { node: String },
}

/// Names that a rule tree may legally reference.
pub enum RuleScope<'a> {
    /// Indicator rules read raw form fields and already-resolved BBIs.
    Fields {
        owner: &'a str,
        fields: &'a BTreeMap<FieldId, FieldKind>,
        bbis: &'a BTreeSet<BbiId>,
    },
    /// BBI rules read indicator verdicts keyed by indicator id.
    Verdicts {
        owner: &'a str,
        indicators: &'a BTreeSet<IndicatorId>,
    },
}

impl RuleScope<'_> {
    fn owner(&self) -> String {
        match self {
            RuleScope::Fields { owner, .. } | RuleScope::Verdicts { owner, .. } => {
                (*owner).to_string()
            }
        }
    }

    fn field_kind(&self, field_id: &FieldId) -> Result<FieldKind, SchemaValidationError> {
        match self {
            RuleScope::Fields { fields, .. } => {
                fields
                    .get(field_id)
                    .copied()
                    .ok_or_else(|| SchemaValidationError::UnknownField {
                        owner: self.owner(),
                        field_id: field_id.clone(),
                    })
            }
            RuleScope::Verdicts { indicators, .. } => {
                if indicators.contains(&IndicatorId(field_id.0.clone())) {
                    Ok(FieldKind::Text)
                } else {
                    Err(SchemaValidationError::UnknownIndicator {
                        owner: self.owner(),
                        indicator_id: IndicatorId(field_id.0.clone()),
                    })
                }
            }
        }
    }
}

pub(crate) fn validate_rule(
    node: &RuleNode,
    scope: &RuleScope<'_>,
) -> Result<(), SchemaValidationError> {
    match node {
        RuleNode::AllOf { children } => validate_group(children, "all_of", scope),
        RuleNode::AnyOf { children } => validate_group(children, "any_of", scope),
        RuleNode::CountThreshold {
            children,
            threshold,
        } => {
            validate_group(children, "count_threshold", scope)?;
            if *threshold == 0 || *threshold as usize > children.len() {
                return Err(SchemaValidationError::CountThresholdOutOfRange {
                    owner: scope.owner(),
                    threshold: *threshold,
                    children: children.len(),
                });
            }
            Ok(())
        }
        RuleNode::PercentageThreshold {
            fields,
            predicate,
            threshold,
        } => {
            if fields.is_empty() {
                return Err(SchemaValidationError::EmptyFieldList {
                    owner: scope.owner(),
                });
            }
            if !threshold.is_in_range() {
                return Err(SchemaValidationError::ThresholdOutOfRange {
                    owner: scope.owner(),
                    threshold: threshold.as_percent(),
                });
            }
            for field_id in fields {
                let kind = scope.field_kind(field_id)?;
                validate_predicate(predicate, field_id, kind, scope)?;
            }
            Ok(())
        }
        RuleNode::MatchValue {
            field_id,
            operator,
            expected,
        } => {
            let kind = scope.field_kind(field_id)?;
            if let RuleScope::Verdicts { .. } = scope {
                if !matches!(operator, MatchOperator::Eq | MatchOperator::Ne) {
                    return Err(operator_mismatch(scope, field_id, operator.symbol(), kind));
                }
                return validate_verdict_literal(expected, scope);
            }
            let compatible = match operator {
                MatchOperator::Eq | MatchOperator::Ne => expected.kind() == kind,
                MatchOperator::Ge | MatchOperator::Le => {
                    kind == FieldKind::Number && expected.kind() == FieldKind::Number
                }
                MatchOperator::Contains => {
                    matches!(kind, FieldKind::Set | FieldKind::Text)
                        && expected.kind() == FieldKind::Text
                }
            };
            if compatible {
                Ok(())
            } else {
                Err(operator_mismatch(scope, field_id, operator.symbol(), kind))
            }
        }
        RuleNode::BbiFunctionalityCheck { bbi_id, .. } => match scope {
            RuleScope::Fields { bbis, .. } => {
                if bbis.contains(bbi_id) {
                    Ok(())
                } else {
                    Err(SchemaValidationError::UnknownBbi {
                        owner: scope.owner(),
                        bbi_id: bbi_id.clone(),
                    })
                }
            }
            RuleScope::Verdicts { .. } => Err(SchemaValidationError::UnsupportedNode {
                owner: scope.owner(),
                node: "bbi_functionality_check",
            }),
        },
    }
}

fn validate_group(
    children: &[RuleNode],
    group: &'static str,
    scope: &RuleScope<'_>,
) -> Result<(), SchemaValidationError> {
    if children.is_empty() {
        return Err(SchemaValidationError::EmptyGroup {
            owner: scope.owner(),
            group,
        });
    }
    children
        .iter()
        .try_for_each(|child| validate_rule(child, scope))
}

fn validate_predicate(
    predicate: &FieldPredicate,
    field_id: &FieldId,
    kind: FieldKind,
    scope: &RuleScope<'_>,
) -> Result<(), SchemaValidationError> {
    if let RuleScope::Verdicts { .. } = scope {
        return match predicate {
            FieldPredicate::Equals { value } => validate_verdict_literal(value, scope),
            FieldPredicate::NonEmpty => Ok(()),
            FieldPredicate::IsYes => Err(operator_mismatch(scope, field_id, "is_yes", kind)),
            FieldPredicate::AtLeast { .. } => {
                Err(operator_mismatch(scope, field_id, "at_least", kind))
            }
        };
    }

    let (compatible, name) = match predicate {
        FieldPredicate::IsYes => (
            matches!(kind, FieldKind::Boolean | FieldKind::Text),
            "is_yes",
        ),
        FieldPredicate::NonEmpty => (true, "non_empty"),
        FieldPredicate::AtLeast { .. } => (kind == FieldKind::Number, "at_least"),
        FieldPredicate::Equals { value } => (value.kind() == kind, "equals"),
    };
    if compatible {
        Ok(())
    } else {
        Err(operator_mismatch(scope, field_id, name, kind))
    }
}

fn validate_verdict_literal(
    literal: &TypedValue,
    scope: &RuleScope<'_>,
) -> Result<(), SchemaValidationError> {
    match literal {
        TypedValue::Text(key) if ComplianceStatus::from_key(key).is_some() => Ok(()),
        other => Err(SchemaValidationError::InvalidVerdictLiteral {
            owner: scope.owner(),
            literal: other.to_string(),
        }),
    }
}

fn operator_mismatch(
    scope: &RuleScope<'_>,
    field_id: &FieldId,
    operator: &str,
    kind: FieldKind,
) -> SchemaValidationError {
    SchemaValidationError::OperatorMismatch {
        owner: scope.owner(),
        field_id: field_id.clone(),
        operator: operator.to_string(),
        kind: kind.label(),
    }
}
