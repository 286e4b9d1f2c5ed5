//! Per-indicator verdict resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{
    BbiFunctionality, BbiId, ComplianceStatus, FieldDefinition, FieldId, FieldValueMap,
    IndicatorId, TypedValue,
};
use super::remarks::RemarkTemplates;
use super::rules::{evaluate, CalculationSchema, EvaluationError, FieldContext};

/// Assessable requirement as declared by the framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDefinition {
    pub id: IndicatorId,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    pub mode: IndicatorMode,
    #[serde(default, skip_serializing_if = "RemarkTemplates::is_empty")]
    pub remarks: RemarkTemplates,
}

/// How an indicator's status is decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorMode {
    /// Auto-calculable: the calculation schema decides.
    Calculated { schema: CalculationSchema },
    /// Derived from child indicators; never routed through a calculation schema.
    Container { children: Vec<ChildIndicator> },
    /// A reviewer records the status by hand.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildIndicator {
    pub indicator_id: IndicatorId,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl IndicatorDefinition {
    pub fn is_auto_calculable(&self) -> bool {
        matches!(self.mode, IndicatorMode::Calculated { .. })
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|field| field.required)
    }

    pub fn field_label(&self, field_id: &FieldId) -> String {
        self.fields
            .iter()
            .find(|field| &field.id == field_id)
            .map(|field| field.label.clone())
            .unwrap_or_else(|| field_id.to_string())
    }
}

/// Where a verdict's status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Calculated,
    Children,
    Reviewer,
    /// Manual indicator without a recorded status yet.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorVerdict {
    pub indicator_id: IndicatorId,
    pub status: ComplianceStatus,
    pub label: String,
    pub remark: String,
    pub explanation: String,
    pub source: VerdictSource,
    /// Field values actually read while deciding.
    pub consulted: BTreeMap<FieldId, TypedValue>,
}

/// Everything the resolver may read for one indicator.
pub struct IndicatorInputs<'a> {
    pub fields: &'a FieldValueMap,
    pub recorded: Option<ComplianceStatus>,
    pub children: &'a BTreeMap<IndicatorId, ComplianceStatus>,
    pub bbis: &'a BTreeMap<BbiId, BbiFunctionality>,
    pub bbi_names: &'a BTreeMap<BbiId, String>,
}

struct Decision {
    status: ComplianceStatus,
    label: String,
    explanation: String,
    source: VerdictSource,
    failed_keys: Vec<String>,
    failed_labels: Vec<String>,
    consulted: BTreeMap<FieldId, TypedValue>,
}

/// Resolve one indicator's verdict. Evaluation failures are returned, never folded into Fail.
pub fn resolve_indicator(
    definition: &IndicatorDefinition,
    inputs: &IndicatorInputs<'_>,
) -> Result<IndicatorVerdict, EvaluationError> {
    let decision = match &definition.mode {
        IndicatorMode::Calculated { schema } => resolve_calculated(definition, schema, inputs)?,
        IndicatorMode::Container { children } => resolve_container(children, inputs),
        IndicatorMode::Manual => resolve_manual(inputs),
    };

    let mut values = BTreeMap::new();
    values.insert("indicator_name", definition.name.clone());
    values.insert("status", decision.label.clone());
    values.insert("failing_fields", decision.failed_labels.join(", "));
    values.insert("bbi_name", referenced_bbi_names(definition, inputs.bbi_names));

    let remark = definition
        .remarks
        .render(decision.status, &decision.failed_keys, &values);

    Ok(IndicatorVerdict {
        indicator_id: definition.id.clone(),
        status: decision.status,
        label: decision.label,
        remark,
        explanation: decision.explanation,
        source: decision.source,
        consulted: decision.consulted,
    })
}

fn resolve_calculated(
    definition: &IndicatorDefinition,
    schema: &CalculationSchema,
    inputs: &IndicatorInputs<'_>,
) -> Result<Decision, EvaluationError> {
    let context = FieldContext::new(inputs.fields, inputs.bbis);
    let mut consulted = BTreeMap::new();

    if let Some(branch) = &schema.conditional {
        let outcome = evaluate(&branch.rule, &context)?;
        consulted.extend(outcome.consulted);
        if outcome.satisfied {
            return Ok(Decision {
                status: ComplianceStatus::Conditional,
                label: branch.label.clone(),
                explanation: outcome.explanation,
                source: VerdictSource::Calculated,
                failed_keys: Vec::new(),
                failed_labels: Vec::new(),
                consulted,
            });
        }
    }

    let outcome = evaluate(&schema.root, &context)?;
    consulted.extend(outcome.consulted);
    let (status, label) = if outcome.satisfied {
        (ComplianceStatus::Pass, schema.labels.pass.clone())
    } else {
        (ComplianceStatus::Fail, schema.labels.fail.clone())
    };

    Ok(Decision {
        status,
        label,
        explanation: outcome.explanation,
        source: VerdictSource::Calculated,
        failed_keys: outcome
            .failed_fields
            .iter()
            .map(ToString::to_string)
            .collect(),
        failed_labels: outcome
            .failed_fields
            .iter()
            .map(|field| definition.field_label(field))
            .collect(),
        consulted,
    })
}

fn resolve_container(children: &[ChildIndicator], inputs: &IndicatorInputs<'_>) -> Decision {
    let mut pending = Vec::new();
    let mut failing = Vec::new();

    for child in children.iter().filter(|child| child.required) {
        let status = inputs
            .children
            .get(&child.indicator_id)
            .copied()
            .unwrap_or(ComplianceStatus::NotEvaluated);
        match status {
            ComplianceStatus::Pass => {}
            ComplianceStatus::NotEvaluated => pending.push(child.indicator_id.to_string()),
            ComplianceStatus::Fail | ComplianceStatus::Conditional => {
                failing.push(child.indicator_id.to_string())
            }
        }
    }

    let (status, explanation, failed) = if !pending.is_empty() {
        (
            ComplianceStatus::NotEvaluated,
            format!("awaiting child indicators: {}", pending.join(", ")),
            Vec::new(),
        )
    } else if failing.is_empty() {
        (
            ComplianceStatus::Pass,
            "every required child indicator passed".to_string(),
            Vec::new(),
        )
    } else {
        (
            ComplianceStatus::Fail,
            format!("required child indicators not passed: {}", failing.join(", ")),
            failing,
        )
    };

    Decision {
        status,
        label: status.label().to_string(),
        explanation,
        source: VerdictSource::Children,
        failed_keys: failed.clone(),
        failed_labels: failed,
        consulted: BTreeMap::new(),
    }
}

fn resolve_manual(inputs: &IndicatorInputs<'_>) -> Decision {
    let (status, source, explanation) = match inputs.recorded {
        Some(status) => (
            status,
            VerdictSource::Reviewer,
            "status recorded by reviewer".to_string(),
        ),
        None => (
            ComplianceStatus::NotEvaluated,
            VerdictSource::Pending,
            "awaiting reviewer status".to_string(),
        ),
    };

    Decision {
        status,
        label: status.label().to_string(),
        explanation,
        source,
        failed_keys: Vec::new(),
        failed_labels: Vec::new(),
        consulted: BTreeMap::new(),
    }
}

fn referenced_bbi_names(
    definition: &IndicatorDefinition,
    bbi_names: &BTreeMap<BbiId, String>,
) -> String {
    let IndicatorMode::Calculated { schema } = &definition.mode else {
        return String::new();
    };
    schema
        .root
        .referenced_bbis()
        .iter()
        .map(|bbi| bbi_names.get(bbi).cloned().unwrap_or_else(|| bbi.to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}
