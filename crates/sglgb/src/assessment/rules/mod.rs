//! Declarative rule trees that turn form answers (or indicator verdicts) into verdicts.
//!
//! Rule trees are parsed once from JSON into [`RuleNode`] and validated at framework load;
//! evaluation never re-interprets raw maps.

mod evaluator;
mod validate;

pub use evaluator::{
    evaluate, EvaluationError, FieldContext, RuleContext, RuleOutcome, VerdictContext,
};
pub use validate::{RuleScope, SchemaValidationError};

use serde::{Deserialize, Serialize};

use super::domain::{BbiFunctionality, BbiId, FieldId, TypedValue};

/// Closed set of rule variants; adding a variant forces every match to be revisited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleNode {
    AllOf {
        children: Vec<RuleNode>,
    },
    AnyOf {
        children: Vec<RuleNode>,
    },
    PercentageThreshold {
        fields: Vec<FieldId>,
        predicate: FieldPredicate,
        threshold: Threshold,
    },
    CountThreshold {
        children: Vec<RuleNode>,
        threshold: u32,
    },
    MatchValue {
        field_id: FieldId,
        operator: MatchOperator,
        expected: TypedValue,
    },
    BbiFunctionalityCheck {
        bbi_id: BbiId,
        #[serde(default = "default_expected_functionality")]
        expected: BbiFunctionality,
    },
}

fn default_expected_functionality() -> BbiFunctionality {
    BbiFunctionality::Functional
}

impl RuleNode {
    pub fn all_of(children: Vec<RuleNode>) -> Self {
        RuleNode::AllOf { children }
    }

    pub fn any_of(children: Vec<RuleNode>) -> Self {
        RuleNode::AnyOf { children }
    }

    pub fn count_at_least(threshold: u32, children: Vec<RuleNode>) -> Self {
        RuleNode::CountThreshold {
            children,
            threshold,
        }
    }

    pub fn percentage(fields: &[&str], predicate: FieldPredicate, threshold: Threshold) -> Self {
        RuleNode::PercentageThreshold {
            fields: fields.iter().map(|field| FieldId::from(*field)).collect(),
            predicate,
            threshold,
        }
    }

    pub fn matches(field_id: &str, operator: MatchOperator, expected: TypedValue) -> Self {
        RuleNode::MatchValue {
            field_id: FieldId::from(field_id),
            operator,
            expected,
        }
    }

    pub fn bbi_functional(bbi_id: &str) -> Self {
        RuleNode::BbiFunctionalityCheck {
            bbi_id: BbiId::from(bbi_id),
            expected: BbiFunctionality::Functional,
        }
    }

    /// Validate this tree against the names visible in `scope`.
    pub fn validate_in(&self, scope: &RuleScope<'_>) -> Result<(), SchemaValidationError> {
        validate::validate_rule(self, scope)
    }

    /// Field ids referenced by leaves of this tree, in first-seen order.
    pub fn referenced_fields(&self) -> Vec<FieldId> {
        let mut fields = Vec::new();
        self.visit(&mut |node| match node {
            RuleNode::PercentageThreshold { fields: listed, .. } => {
                for field in listed {
                    if !fields.contains(field) {
                        fields.push(field.clone());
                    }
                }
            }
            RuleNode::MatchValue { field_id, .. } => {
                if !fields.contains(field_id) {
                    fields.push(field_id.clone());
                }
            }
            _ => {}
        });
        fields
    }

    /// BBI ids referenced by `bbi_functionality_check` leaves.
    pub fn referenced_bbis(&self) -> Vec<BbiId> {
        let mut bbis = Vec::new();
        self.visit(&mut |node| {
            if let RuleNode::BbiFunctionalityCheck { bbi_id, .. } = node {
                if !bbis.contains(bbi_id) {
                    bbis.push(bbi_id.clone());
                }
            }
        });
        bbis
    }

    fn visit<F: FnMut(&RuleNode)>(&self, f: &mut F) {
        f(self);
        match self {
            RuleNode::AllOf { children }
            | RuleNode::AnyOf { children }
            | RuleNode::CountThreshold { children, .. } => {
                for child in children {
                    child.visit(f);
                }
            }
            RuleNode::PercentageThreshold { .. }
            | RuleNode::MatchValue { .. }
            | RuleNode::BbiFunctionalityCheck { .. } => {}
        }
    }
}

/// Per-field predicate applied by `percentage_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPredicate {
    /// Boolean `true`, or text `yes`/`true` (case-insensitive).
    IsYes,
    /// Non-blank text, non-empty set, any number or boolean.
    NonEmpty,
    AtLeast { value: f64 },
    Equals { value: TypedValue },
}

/// Pass threshold expressed either as a percentage (0-100) or a fraction (0-1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    Percent(f64),
    Fraction(f64),
}

impl Threshold {
    pub const ALL: Threshold = Threshold::Percent(100.0);

    /// Threshold normalised to a percentage.
    pub fn as_percent(self) -> f64 {
        match self {
            Threshold::Percent(value) => value,
            Threshold::Fraction(value) => value * 100.0,
        }
    }

    pub fn is_in_range(self) -> bool {
        match self {
            Threshold::Percent(value) => value.is_finite() && (0.0..=100.0).contains(&value),
            Threshold::Fraction(value) => value.is_finite() && (0.0..=1.0).contains(&value),
        }
    }

    /// Inclusive comparison of `numerator / denominator` against the threshold.
    ///
    /// Callers guarantee a non-zero denominator.
    pub fn is_met(self, numerator: usize, denominator: usize) -> bool {
        match self {
            Threshold::Percent(value) => numerator as f64 * 100.0 >= value * denominator as f64,
            // Compared unscaled so a decimal fraction equal to the ratio rounds identically.
            Threshold::Fraction(value) => numerator as f64 / denominator as f64 >= value,
        }
    }
}

/// Comparison operators accepted by `match_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "contains")]
    Contains,
}

impl MatchOperator {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Contains => "contains",
        }
    }
}

/// Labels used when the root rule evaluates true or false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeLabels {
    pub pass: String,
    pub fail: String,
}

impl OutcomeLabels {
    pub fn pass_fail() -> Self {
        Self {
            pass: "Pass".to_string(),
            fail: "Fail".to_string(),
        }
    }

    pub fn functional() -> Self {
        Self {
            pass: "Functional".to_string(),
            fail: "Non-Functional".to_string(),
        }
    }
}

/// Optional branch that, when satisfied, marks the verdict Conditional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalBranch {
    pub rule: RuleNode,
    #[serde(default = "default_conditional_label")]
    pub label: String,
}

fn default_conditional_label() -> String {
    "Conditional".to_string()
}

/// Root rule plus output labels for one indicator or BBI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationSchema {
    pub root: RuleNode,
    #[serde(default = "OutcomeLabels::pass_fail")]
    pub labels: OutcomeLabels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<ConditionalBranch>,
}

impl CalculationSchema {
    pub fn new(root: RuleNode) -> Self {
        Self {
            root,
            labels: OutcomeLabels::pass_fail(),
            conditional: None,
        }
    }

    pub fn with_labels(mut self, labels: OutcomeLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_conditional(mut self, rule: RuleNode) -> Self {
        self.conditional = Some(ConditionalBranch {
            rule,
            label: default_conditional_label(),
        });
        self
    }

    /// Parse a schema from JSON and validate it against the declared scope.
    pub fn from_json(raw: &str, scope: &RuleScope<'_>) -> Result<Self, SchemaValidationError> {
        let schema: CalculationSchema = serde_json::from_str(raw)
            .map_err(|err| SchemaValidationError::Malformed(err.to_string()))?;
        schema.validate(scope)?;
        Ok(schema)
    }

    pub fn validate(&self, scope: &RuleScope<'_>) -> Result<(), SchemaValidationError> {
        validate::validate_rule(&self.root, scope)?;
        if let Some(branch) = &self.conditional {
            validate::validate_rule(&branch.rule, scope)?;
        }
        Ok(())
    }
}
