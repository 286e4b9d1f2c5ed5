//! Functionality status of Barangay-Based Institutions, derived from indicator verdicts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{BbiFunctionality, BbiId, ComplianceStatus, IndicatorId};
use super::rules::{evaluate, EvaluationError, OutcomeLabels, RuleNode, VerdictContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BbiDefinition {
    pub id: BbiId,
    pub name: String,
    /// Rule over indicator verdicts; field ids name indicators.
    pub rule: RuleNode,
    #[serde(default = "OutcomeLabels::functional")]
    pub labels: OutcomeLabels,
}

impl BbiDefinition {
    /// Indicators that must be resolved before this BBI.
    pub fn dependencies(&self) -> Vec<IndicatorId> {
        self.rule
            .referenced_fields()
            .into_iter()
            .map(|field| IndicatorId(field.0))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BbiStatus {
    pub bbi_id: BbiId,
    pub status: BbiFunctionality,
    pub label: String,
    pub explanation: String,
    pub depends_on: BTreeMap<IndicatorId, ComplianceStatus>,
}

/// Resolve a BBI from indicator verdicts. Missing or unevaluated inputs yield `Unknown`.
pub fn resolve_bbi(
    definition: &BbiDefinition,
    verdicts: &BTreeMap<IndicatorId, ComplianceStatus>,
) -> Result<BbiStatus, EvaluationError> {
    let depends_on: BTreeMap<IndicatorId, ComplianceStatus> = definition
        .dependencies()
        .into_iter()
        .map(|indicator| {
            let status = verdicts
                .get(&indicator)
                .copied()
                .unwrap_or(ComplianceStatus::NotEvaluated);
            (indicator, status)
        })
        .collect();

    let pending: Vec<String> = depends_on
        .iter()
        .filter(|(_, status)| **status == ComplianceStatus::NotEvaluated)
        .map(|(indicator, _)| indicator.to_string())
        .collect();

    if !pending.is_empty() {
        return Ok(BbiStatus {
            bbi_id: definition.id.clone(),
            status: BbiFunctionality::Unknown,
            label: BbiFunctionality::Unknown.label().to_string(),
            explanation: format!("indicators not yet evaluated: {}", pending.join(", ")),
            depends_on,
        });
    }

    let outcome = evaluate(&definition.rule, &VerdictContext::new(&depends_on))?;
    let (status, label) = if outcome.satisfied {
        (BbiFunctionality::Functional, definition.labels.pass.clone())
    } else {
        (BbiFunctionality::NonFunctional, definition.labels.fail.clone())
    };

    Ok(BbiStatus {
        bbi_id: definition.id.clone(),
        status,
        label,
        explanation: outcome.explanation,
        depends_on,
    })
}
