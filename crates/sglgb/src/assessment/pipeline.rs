//! Full verdict recomputation: indicators and BBIs in dependency order, then the area roll-up.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::aggregate::{aggregate, ComplianceVerdict};
use super::bbi::{resolve_bbi, BbiStatus};
use super::domain::{BbiFunctionality, BbiId, ComplianceStatus, FieldValueMap, IndicatorId};
use super::framework::{AssessmentFramework, EvaluationStep};
use super::indicator::{resolve_indicator, IndicatorInputs, IndicatorVerdict};
use super::rules::EvaluationError;

/// Inputs for one evaluation pass: latest answers and reviewer-recorded statuses.
pub struct AssessmentInputs<'a> {
    pub responses: &'a BTreeMap<IndicatorId, FieldValueMap>,
    pub recorded: &'a BTreeMap<IndicatorId, ComplianceStatus>,
}

/// Derived verdicts. Recomputed from scratch on every pass; never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub verdicts: BTreeMap<IndicatorId, IndicatorVerdict>,
    /// Indicators the engine could not decide; rendered as "unable to determine".
    pub undetermined: BTreeMap<IndicatorId, EvaluationError>,
    pub bbis: BTreeMap<BbiId, BbiStatus>,
    pub bbi_errors: BTreeMap<BbiId, EvaluationError>,
    pub compliance: Option<ComplianceVerdict>,
    /// Why the compliance verdict could not be computed, when it is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_blocked_by: Option<String>,
}

impl EvaluationReport {
    /// Effective status; undetermined or unknown indicators read as `NotEvaluated`.
    pub fn status_of(&self, indicator: &IndicatorId) -> ComplianceStatus {
        self.verdicts
            .get(indicator)
            .map(|verdict| verdict.status)
            .unwrap_or(ComplianceStatus::NotEvaluated)
    }

    pub fn is_undetermined(&self, indicator: &IndicatorId) -> bool {
        self.undetermined.contains_key(indicator)
    }

    pub fn statuses(&self) -> BTreeMap<IndicatorId, ComplianceStatus> {
        self.verdicts
            .iter()
            .map(|(id, verdict)| (id.clone(), verdict.status))
            .chain(
                self.undetermined
                    .keys()
                    .map(|id| (id.clone(), ComplianceStatus::NotEvaluated)),
            )
            .collect()
    }

    pub fn failing(&self) -> Vec<IndicatorId> {
        self.verdicts
            .values()
            .filter(|verdict| verdict.status == ComplianceStatus::Fail)
            .map(|verdict| verdict.indicator_id.clone())
            .collect()
    }
}

impl AssessmentFramework {
    /// Resolve every indicator and BBI in topological order, then aggregate.
    pub fn evaluate(&self, inputs: &AssessmentInputs<'_>) -> EvaluationReport {
        let empty = FieldValueMap::new();
        let mut report = EvaluationReport::default();
        let mut statuses: BTreeMap<IndicatorId, ComplianceStatus> = BTreeMap::new();
        let mut functionality: BTreeMap<BbiId, BbiFunctionality> = BTreeMap::new();

        for step in self.evaluation_order() {
            match step {
                EvaluationStep::Indicator(id) => {
                    let Some(definition) = self.indicator(id) else {
                        continue;
                    };
                    let resolved = resolve_indicator(
                        definition,
                        &IndicatorInputs {
                            fields: inputs.responses.get(id).unwrap_or(&empty),
                            recorded: inputs.recorded.get(id).copied(),
                            children: &statuses,
                            bbis: &functionality,
                            bbi_names: self.bbi_names(),
                        },
                    );
                    match resolved {
                        Ok(verdict) => {
                            statuses.insert(id.clone(), verdict.status);
                            report.verdicts.insert(id.clone(), verdict);
                        }
                        Err(error) => {
                            statuses.insert(id.clone(), ComplianceStatus::NotEvaluated);
                            report.undetermined.insert(id.clone(), error);
                        }
                    }
                }
                EvaluationStep::Bbi(id) => {
                    let Some(definition) = self.bbi(id) else {
                        continue;
                    };
                    match resolve_bbi(definition, &statuses) {
                        Ok(status) => {
                            functionality.insert(id.clone(), status.status);
                            report.bbis.insert(id.clone(), status);
                        }
                        Err(error) => {
                            functionality.insert(id.clone(), BbiFunctionality::Unknown);
                            report.bbi_errors.insert(id.clone(), error);
                        }
                    }
                }
            }
        }

        match aggregate(self.areas(), &statuses) {
            Ok(verdict) => report.compliance = Some(verdict),
            Err(error) => report.compliance_blocked_by = Some(error.to_string()),
        }

        report
    }
}
