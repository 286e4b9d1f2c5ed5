use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for a barangay assessment.
    AssessmentId
);
string_id!(
    /// Identifier of a single assessable indicator (e.g. `1.1.1`).
    IndicatorId
);
string_id!(
    /// Identifier of a form field within an indicator response.
    FieldId
);
string_id!(
    /// Identifier of a Barangay-Based Institution.
    BbiId
);
string_id!(
    /// Identifier of a governance area.
    AreaId
);

/// Typed answer captured by the form collaborator.
///
/// Serialized untagged so JSON payloads read naturally: `"yes"`, `3`, `true`, `["a", "b"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    Set(BTreeSet<String>),
}

impl TypedValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            TypedValue::Boolean(_) => FieldKind::Boolean,
            TypedValue::Number(_) => FieldKind::Number,
            TypedValue::Text(_) => FieldKind::Text,
            TypedValue::Set(_) => FieldKind::Set,
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        TypedValue::Text(value.into())
    }

    pub fn set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypedValue::Set(values.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Boolean(value) => write!(f, "{value}"),
            TypedValue::Number(value) => write!(f, "{value}"),
            TypedValue::Text(value) => write!(f, "\"{value}\""),
            TypedValue::Set(values) => {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// Declared kind of a form field, used for load-time operator checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    Set,
}

impl FieldKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Set => "set",
        }
    }
}

/// A field identifier paired with its submitted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_id: FieldId,
    pub value: TypedValue,
}

/// Flat map of field answers for one indicator submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValueMap(BTreeMap<FieldId, TypedValue>);

impl FieldValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field_id: impl Into<FieldId>, value: TypedValue) -> &mut Self {
        self.0.insert(field_id.into(), value);
        self
    }

    pub fn with(mut self, field_id: &str, value: TypedValue) -> Self {
        self.0.insert(FieldId::from(field_id), value);
        self
    }

    pub fn get(&self, field_id: &FieldId) -> Option<&TypedValue> {
        self.0.get(field_id)
    }

    pub fn contains(&self, field_id: &FieldId) -> bool {
        self.0.contains_key(field_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldId, &TypedValue)> {
        self.0.iter()
    }
}

impl From<Vec<FieldValue>> for FieldValueMap {
    fn from(values: Vec<FieldValue>) -> Self {
        Self(
            values
                .into_iter()
                .map(|entry| (entry.field_id, entry.value))
                .collect(),
        )
    }
}

impl FromIterator<(FieldId, TypedValue)> for FieldValueMap {
    fn from_iter<T: IntoIterator<Item = (FieldId, TypedValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Declared form field for an indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: FieldId,
    pub label: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Per-indicator verdict status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Pass,
    Fail,
    Conditional,
    NotEvaluated,
}

impl ComplianceStatus {
    pub const fn ordered() -> [Self; 4] {
        [
            Self::Pass,
            Self::Fail,
            Self::Conditional,
            Self::NotEvaluated,
        ]
    }

    /// Machine key used when verdicts are exposed to BBI rules.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Conditional => "conditional",
            Self::NotEvaluated => "not_evaluated",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pass => "Pass",
            Self::Fail => "Fail",
            Self::Conditional => "Conditional",
            Self::NotEvaluated => "Not Evaluated",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|status| status.key().eq_ignore_ascii_case(key.trim()))
    }

    /// Whether a reviewer must justify this status with a comment.
    pub const fn requires_comment(self) -> bool {
        matches!(self, Self::Fail | Self::Conditional)
    }

    /// Conditional counts toward area pass totals; Fail and NotEvaluated never do.
    pub const fn counts_as_passed(self) -> bool {
        matches!(self, Self::Pass | Self::Conditional)
    }
}

/// Operational status of a Barangay-Based Institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BbiFunctionality {
    Functional,
    NonFunctional,
    Unknown,
}

impl BbiFunctionality {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Functional => "Functional",
            Self::NonFunctional => "Non-Functional",
            Self::Unknown => "Unknown",
        }
    }
}

/// Actor roles that may request workflow transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Blgu,
    Assessor,
    Validator,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Blgu => "BLGU",
            Self::Assessor => "Assessor",
            Self::Validator => "Validator",
            Self::Admin => "MLGOO Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
