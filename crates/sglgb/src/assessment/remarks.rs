//! Remark templates keyed by verdict status, interpolated with named placeholders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::ComplianceStatus;

/// A single remark template. `failed` narrows the match to a specific failing field or child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemarkTemplate {
    pub status: ComplianceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemarkTemplates(Vec<RemarkTemplate>);

impl RemarkTemplates {
    pub fn new(templates: Vec<RemarkTemplate>) -> Self {
        Self(templates)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Choose the most specific template for the status and failing keys.
    pub fn select(&self, status: ComplianceStatus, failed: &[String]) -> Option<&RemarkTemplate> {
        let specific = self.0.iter().find(|template| {
            template.status == status
                && template
                    .failed
                    .as_ref()
                    .is_some_and(|key| failed.iter().any(|candidate| candidate == key))
        });
        specific.or_else(|| {
            self.0
                .iter()
                .find(|template| template.status == status && template.failed.is_none())
        })
    }

    /// Render the remark for `status`; falls back to the status label when nothing matches.
    pub fn render(
        &self,
        status: ComplianceStatus,
        failed: &[String],
        values: &BTreeMap<&str, String>,
    ) -> String {
        match self.select(status, failed) {
            Some(template) => interpolate(&template.text, values),
            None => status.label().to_string(),
        }
    }
}

/// Replace `{name}` placeholders. Unknown placeholders and unmatched braces are kept verbatim.
pub fn interpolate(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match values.get(name) {
                    Some(value) => rendered.push_str(value),
                    None => {
                        rendered.push('{');
                        rendered.push_str(name);
                        rendered.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                rendered.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    rendered.push_str(rest);
    rendered
}
