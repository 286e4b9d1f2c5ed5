//! Governance-area roll-up and the fixed "3+1" overall compliance rule.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{AreaId, ComplianceStatus, IndicatorId};
use super::rules::Threshold;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaKind {
    Core,
    Essential,
}

impl AreaKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::Essential => "Essential",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceArea {
    pub id: AreaId,
    pub name: String,
    pub kind: AreaKind,
    pub indicators: Vec<IndicatorId>,
    #[serde(default = "all_indicators")]
    pub pass_threshold: Threshold,
}

fn all_indicators() -> Threshold {
    Threshold::ALL
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceAreaResult {
    pub area_id: AreaId,
    pub name: String,
    pub kind: AreaKind,
    pub passed_count: usize,
    pub total_count: usize,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub passed: bool,
    pub areas: Vec<GovernanceAreaResult>,
    pub decided_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    #[error("governance area {area_id} has indicators without a verdict: {}", join_ids(.indicators))]
    Indeterminate {
        area_id: AreaId,
        indicators: Vec<IndicatorId>,
    },
    #[error("governance area {area_id} has no indicators")]
    EmptyArea { area_id: AreaId },
}

fn join_ids(ids: &[IndicatorId]) -> String {
    ids.iter()
        .map(IndicatorId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Score a single governance area against its configured threshold.
pub fn aggregate_area(
    area: &GovernanceArea,
    statuses: &BTreeMap<IndicatorId, ComplianceStatus>,
) -> Result<GovernanceAreaResult, AggregationError> {
    if area.indicators.is_empty() {
        return Err(AggregationError::EmptyArea {
            area_id: area.id.clone(),
        });
    }

    let mut passed_count = 0usize;
    let mut undetermined = Vec::new();
    for indicator in &area.indicators {
        match statuses.get(indicator).copied() {
            Some(status) if status.counts_as_passed() => passed_count += 1,
            Some(ComplianceStatus::Fail) => {}
            _ => undetermined.push(indicator.clone()),
        }
    }

    if !undetermined.is_empty() {
        return Err(AggregationError::Indeterminate {
            area_id: area.id.clone(),
            indicators: undetermined,
        });
    }

    let total_count = area.indicators.len();
    Ok(GovernanceAreaResult {
        area_id: area.id.clone(),
        name: area.name.clone(),
        kind: area.kind,
        passed_count,
        total_count,
        passed: area.pass_threshold.is_met(passed_count, total_count),
    })
}

/// Overall compliance: every Core area passed and at least one Essential area passed.
///
/// Kept as a literal expression; this rule is not configurable.
pub fn three_plus_one(results: &[GovernanceAreaResult]) -> bool {
    let all_core_passed = results
        .iter()
        .filter(|result| result.kind == AreaKind::Core)
        .all(|result| result.passed);
    let any_essential_passed = results
        .iter()
        .filter(|result| result.kind == AreaKind::Essential)
        .any(|result| result.passed);

    all_core_passed && any_essential_passed
}

pub fn aggregate(
    areas: &[GovernanceArea],
    statuses: &BTreeMap<IndicatorId, ComplianceStatus>,
) -> Result<ComplianceVerdict, AggregationError> {
    let results = areas
        .iter()
        .map(|area| aggregate_area(area, statuses))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(verdict_from_results(results))
}

pub fn verdict_from_results(results: Vec<GovernanceAreaResult>) -> ComplianceVerdict {
    let passed = three_plus_one(&results);
    let count = |kind: AreaKind| {
        let total = results.iter().filter(|result| result.kind == kind).count();
        let passed = results
            .iter()
            .filter(|result| result.kind == kind && result.passed)
            .count();
        (passed, total)
    };
    let (core_passed, core_total) = count(AreaKind::Core);
    let (essential_passed, essential_total) = count(AreaKind::Essential);

    ComplianceVerdict {
        passed,
        decided_by: format!(
            "{core_passed} of {core_total} Core passed, {essential_passed} of {essential_total} Essential passed"
        ),
        areas: results,
    }
}
