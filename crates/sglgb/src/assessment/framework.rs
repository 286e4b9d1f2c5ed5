//! Assessment framework: indicator, BBI and governance-area definitions validated at load.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use super::aggregate::{AreaKind, GovernanceArea};
use super::bbi::BbiDefinition;
use super::domain::{BbiId, FieldId, FieldKind, FieldValueMap, IndicatorId};
use super::indicator::{IndicatorDefinition, IndicatorMode};
use super::rules::{RuleScope, SchemaValidationError};

/// Serialized framework as authored upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkDocument {
    pub name: String,
    pub indicators: Vec<IndicatorDefinition>,
    #[serde(default)]
    pub bbis: Vec<BbiDefinition>,
    pub areas: Vec<GovernanceArea>,
}

/// One unit of work in the dependency-ordered evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EvaluationStep {
    Indicator(IndicatorId),
    Bbi(BbiId),
}

impl fmt::Display for EvaluationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationStep::Indicator(id) => write!(f, "indicator {id}"),
            EvaluationStep::Bbi(id) => write!(f, "BBI {id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameworkLoadError {
    #[error("unable to read framework file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Schema(#[from] SchemaValidationError),
}

/// Validated framework; only constructible through the validating loaders.
#[derive(Debug, Clone)]
pub struct AssessmentFramework {
    name: String,
    indicators: BTreeMap<IndicatorId, IndicatorDefinition>,
    bbis: BTreeMap<BbiId, BbiDefinition>,
    bbi_names: BTreeMap<BbiId, String>,
    areas: Vec<GovernanceArea>,
    order: Vec<EvaluationStep>,
}

impl AssessmentFramework {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FrameworkLoadError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| FrameworkLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json(&raw)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, SchemaValidationError> {
        let document: FrameworkDocument = serde_json::from_str(raw)
            .map_err(|err| SchemaValidationError::Malformed(err.to_string()))?;
        Self::from_document(document)
    }

    pub fn from_document(document: FrameworkDocument) -> Result<Self, SchemaValidationError> {
        let FrameworkDocument {
            name,
            indicators,
            bbis,
            areas,
        } = document;

        let mut indicator_map = BTreeMap::new();
        for indicator in indicators {
            let id = indicator.id.clone();
            if indicator_map.insert(id.clone(), indicator).is_some() {
                return Err(SchemaValidationError::DuplicateId {
                    kind: "indicator",
                    id: id.to_string(),
                });
            }
        }

        let mut bbi_map = BTreeMap::new();
        for bbi in bbis {
            let id = bbi.id.clone();
            if bbi_map.insert(id.clone(), bbi).is_some() {
                return Err(SchemaValidationError::DuplicateId {
                    kind: "BBI",
                    id: id.to_string(),
                });
            }
        }

        let indicator_ids: BTreeSet<IndicatorId> = indicator_map.keys().cloned().collect();
        let bbi_ids: BTreeSet<BbiId> = bbi_map.keys().cloned().collect();

        for indicator in indicator_map.values() {
            validate_indicator(indicator, &indicator_ids, &bbi_ids)?;
        }

        for bbi in bbi_map.values() {
            let owner = format!("BBI {}", bbi.id);
            bbi.rule.validate_in(&RuleScope::Verdicts {
                owner: &owner,
                indicators: &indicator_ids,
            })?;
        }

        validate_areas(&areas, &indicator_ids)?;

        let order = evaluation_order(&indicator_map, &bbi_map)?;
        let bbi_names = bbi_map
            .values()
            .map(|bbi| (bbi.id.clone(), bbi.name.clone()))
            .collect();

        Ok(Self {
            name,
            indicators: indicator_map,
            bbis: bbi_map,
            bbi_names,
            areas,
            order,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indicator(&self, id: &IndicatorId) -> Option<&IndicatorDefinition> {
        self.indicators.get(id)
    }

    pub fn indicators(&self) -> impl Iterator<Item = &IndicatorDefinition> {
        self.indicators.values()
    }

    pub fn bbi(&self, id: &BbiId) -> Option<&BbiDefinition> {
        self.bbis.get(id)
    }

    pub fn bbi_names(&self) -> &BTreeMap<BbiId, String> {
        &self.bbi_names
    }

    pub fn areas(&self) -> &[GovernanceArea] {
        &self.areas
    }

    /// Topological order in which indicators and BBIs must be resolved.
    pub fn evaluation_order(&self) -> &[EvaluationStep] {
        &self.order
    }

    /// Required fields with no submitted value, per indicator.
    pub fn missing_required_fields(
        &self,
        responses: &BTreeMap<IndicatorId, FieldValueMap>,
    ) -> Vec<(IndicatorId, FieldId)> {
        let empty = FieldValueMap::new();
        self.indicators
            .values()
            .flat_map(|indicator| {
                let submitted = responses.get(&indicator.id).unwrap_or(&empty);
                indicator
                    .required_fields()
                    .filter(|field| !submitted.contains(&field.id))
                    .map(|field| (indicator.id.clone(), field.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

fn validate_indicator(
    indicator: &IndicatorDefinition,
    indicator_ids: &BTreeSet<IndicatorId>,
    bbi_ids: &BTreeSet<BbiId>,
) -> Result<(), SchemaValidationError> {
    let owner = format!("indicator {}", indicator.id);

    let mut fields: BTreeMap<FieldId, FieldKind> = BTreeMap::new();
    for field in &indicator.fields {
        if fields.insert(field.id.clone(), field.kind).is_some() {
            return Err(SchemaValidationError::DuplicateId {
                kind: "field",
                id: format!("{}/{}", indicator.id, field.id),
            });
        }
    }

    match &indicator.mode {
        IndicatorMode::Calculated { schema } => schema.validate(&RuleScope::Fields {
            owner: &owner,
            fields: &fields,
            bbis: bbi_ids,
        }),
        IndicatorMode::Container { children } => {
            if !children.iter().any(|child| child.required) {
                return Err(SchemaValidationError::InvalidDefinition {
                    owner,
                    detail: "container indicators need at least one required child".to_string(),
                });
            }
            for child in children {
                if !indicator_ids.contains(&child.indicator_id) {
                    return Err(SchemaValidationError::UnknownIndicator {
                        owner,
                        indicator_id: child.indicator_id.clone(),
                    });
                }
            }
            Ok(())
        }
        IndicatorMode::Manual => Ok(()),
    }
}

fn validate_areas(
    areas: &[GovernanceArea],
    indicator_ids: &BTreeSet<IndicatorId>,
) -> Result<(), SchemaValidationError> {
    let mut area_ids = BTreeSet::new();
    let mut assigned = BTreeSet::new();

    for area in areas {
        let owner = format!("governance area {}", area.id);
        if !area_ids.insert(area.id.clone()) {
            return Err(SchemaValidationError::DuplicateId {
                kind: "governance area",
                id: area.id.to_string(),
            });
        }
        if area.indicators.is_empty() {
            return Err(SchemaValidationError::InvalidDefinition {
                owner,
                detail: "area must list at least one indicator".to_string(),
            });
        }
        if !area.pass_threshold.is_in_range() {
            return Err(SchemaValidationError::ThresholdOutOfRange {
                owner,
                threshold: area.pass_threshold.as_percent(),
            });
        }
        for indicator in &area.indicators {
            if !indicator_ids.contains(indicator) {
                return Err(SchemaValidationError::UnknownIndicator {
                    owner,
                    indicator_id: indicator.clone(),
                });
            }
            if !assigned.insert(indicator.clone()) {
                return Err(SchemaValidationError::IndicatorInMultipleAreas {
                    indicator_id: indicator.clone(),
                });
            }
        }
    }

    for kind in [AreaKind::Core, AreaKind::Essential] {
        if !areas.iter().any(|area| area.kind == kind) {
            return Err(SchemaValidationError::MissingAreaKind { kind: kind.label() });
        }
    }

    Ok(())
}

/// Build the indicator/BBI dependency graph and order it; cycles are rejected.
fn evaluation_order(
    indicators: &BTreeMap<IndicatorId, IndicatorDefinition>,
    bbis: &BTreeMap<BbiId, BbiDefinition>,
) -> Result<Vec<EvaluationStep>, SchemaValidationError> {
    let mut graph: DiGraph<EvaluationStep, ()> = DiGraph::new();
    let mut indicator_nodes: BTreeMap<&IndicatorId, NodeIndex> = BTreeMap::new();
    let mut bbi_nodes: BTreeMap<&BbiId, NodeIndex> = BTreeMap::new();

    for id in indicators.keys() {
        indicator_nodes.insert(id, graph.add_node(EvaluationStep::Indicator(id.clone())));
    }
    for id in bbis.keys() {
        bbi_nodes.insert(id, graph.add_node(EvaluationStep::Bbi(id.clone())));
    }

    for (id, indicator) in indicators {
        let target = indicator_nodes[id];
        match &indicator.mode {
            IndicatorMode::Calculated { schema } => {
                let mut referenced = schema.root.referenced_bbis();
                if let Some(branch) = &schema.conditional {
                    referenced.extend(branch.rule.referenced_bbis());
                }
                for bbi in referenced {
                    if let Some(source) = bbi_nodes.get(&bbi) {
                        graph.update_edge(*source, target, ());
                    }
                }
            }
            IndicatorMode::Container { children } => {
                for child in children {
                    if let Some(source) = indicator_nodes.get(&child.indicator_id) {
                        graph.update_edge(*source, target, ());
                    }
                }
            }
            IndicatorMode::Manual => {}
        }
    }

    for (id, bbi) in bbis {
        let target = bbi_nodes[id];
        for dependency in bbi.dependencies() {
            if let Some(source) = indicator_nodes.get(&dependency) {
                graph.update_edge(*source, target, ());
            }
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| SchemaValidationError::DependencyCycle {
        node: graph[cycle.node_id()].to_string(),
    })?;

    Ok(sorted.into_iter().map(|index| graph[index].clone()).collect())
}
