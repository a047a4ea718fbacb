//! Diagnostics attached to RPC responses.
//!
//! Warnings and errors produced while handling a call accumulate in a
//! [`Diagnostics`] scope created fresh for that call and merged into the
//! response when it is built. Diagnostics never abort a call; a failure that
//! should end the operation is raised as
//! [`ProviderError::Diagnostic`](crate::error::ProviderError::Diagnostic)
//! and folded into the response at the dispatch boundary.

use serde::{Deserialize, Serialize};

use crate::generated::tfplugin6 as proto;

/// One selector in a path from the schema root to an attribute or element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStep {
    /// Descend into a named attribute.
    AttributeName(String),
    /// Descend into a map element by string key.
    ElementKeyString(String),
    /// Descend into a list element by index.
    ElementKeyInt(i64),
}

impl PathStep {
    /// Selector for a named attribute.
    pub fn attribute(name: impl Into<String>) -> Self {
        PathStep::AttributeName(name.into())
    }

    /// Selector for a map element.
    pub fn key(name: impl Into<String>) -> Self {
        PathStep::ElementKeyString(name.into())
    }

    /// Selector for a list element.
    pub fn index(index: i64) -> Self {
        PathStep::ElementKeyInt(index)
    }
}

/// A walk from the schema root to a specific attribute or element.
pub type AttributePath = Vec<PathStep>;

pub(crate) fn path_to_proto(path: &AttributePath) -> proto::AttributePath {
    proto::AttributePath {
        steps: path
            .iter()
            .map(|step| proto::attribute_path::Step {
                selector: Some(match step {
                    PathStep::AttributeName(name) => {
                        proto::attribute_path::step::Selector::AttributeName(name.clone())
                    }
                    PathStep::ElementKeyString(key) => {
                        proto::attribute_path::step::Selector::ElementKeyString(key.clone())
                    }
                    PathStep::ElementKeyInt(index) => {
                        proto::attribute_path::step::Selector::ElementKeyInt(*index)
                    }
                }),
            })
            .collect(),
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// An error that fails the surrounding operation.
    Error,
    /// A warning surfaced to the practitioner without failing anything.
    Warning,
}

/// A diagnostic message tagged with an attribute path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: Severity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred; empty for whole-config
    /// diagnostics.
    #[serde(default)]
    pub path: AttributePath,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: None,
            path: Vec::new(),
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: None,
            path: Vec::new(),
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn at(mut self, path: AttributePath) -> Self {
        self.path = path;
        self
    }

    pub(crate) fn to_proto(&self) -> proto::Diagnostic {
        proto::Diagnostic {
            severity: match self.severity {
                Severity::Error => proto::diagnostic::Severity::Error as i32,
                Severity::Warning => proto::diagnostic::Severity::Warning as i32,
            },
            summary: self.summary.clone(),
            detail: self.detail.clone().unwrap_or_default(),
            attribute: if self.path.is_empty() {
                None
            } else {
                Some(path_to_proto(&self.path))
            },
        }
    }
}

/// A call-scoped accumulator of diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    /// Append an error diagnostic at the given path.
    pub fn error(&mut self, path: AttributePath, summary: impl Into<String>) {
        self.items.push(Diagnostic::error(summary).at(path));
    }

    /// Append a warning diagnostic at the given path.
    pub fn warn(&mut self, path: AttributePath, summary: impl Into<String>) {
        self.items.push(Diagnostic::warning(summary).at(path));
    }

    /// The accumulated diagnostics.
    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    /// Whether no diagnostics were recorded.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The number of recorded diagnostics.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether any recorded diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        self.items
            .iter()
            .any(|d| matches!(d.severity, Severity::Error))
    }

    /// Convert all recorded diagnostics to their wire representation.
    pub(crate) fn to_proto(&self) -> Vec<proto::Diagnostic> {
        self.items.iter().map(Diagnostic::to_proto).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_builders() {
        let diagnostic = Diagnostic::error("Invalid configuration")
            .with_detail("The value must be positive")
            .at(vec![PathStep::attribute("count")]);

        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(diagnostic.summary, "Invalid configuration");
        assert_eq!(diagnostic.detail.as_deref(), Some("The value must be positive"));
        assert_eq!(diagnostic.path, vec![PathStep::attribute("count")]);
    }

    #[test]
    fn test_accumulator() {
        let mut diagnostics = Diagnostics::new();
        assert!(diagnostics.is_empty());

        diagnostics.warn(vec![], "heads up");
        assert!(!diagnostics.has_errors());

        diagnostics.error(vec![PathStep::attribute("name")], "broken");
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_path_to_proto() {
        let path = vec![
            PathStep::attribute("rules"),
            PathStep::index(2),
            PathStep::key("port"),
        ];
        let proto_path = path_to_proto(&path);

        assert_eq!(proto_path.steps.len(), 3);
        assert_eq!(
            proto_path.steps[0].selector,
            Some(proto::attribute_path::step::Selector::AttributeName(
                "rules".to_string()
            ))
        );
        assert_eq!(
            proto_path.steps[1].selector,
            Some(proto::attribute_path::step::Selector::ElementKeyInt(2))
        );
        assert_eq!(
            proto_path.steps[2].selector,
            Some(proto::attribute_path::step::Selector::ElementKeyString(
                "port".to_string()
            ))
        );
    }

    #[test]
    fn test_diagnostic_to_proto() {
        let diagnostic = Diagnostic::error("bad value").at(vec![PathStep::attribute("name")]);
        let proto_diag = diagnostic.to_proto();

        assert_eq!(proto_diag.severity, proto::diagnostic::Severity::Error as i32);
        assert_eq!(proto_diag.summary, "bad value");
        assert!(proto_diag.detail.is_empty());
        assert!(proto_diag.attribute.is_some());

        let warning = Diagnostic::warning("heads up").to_proto();
        assert_eq!(warning.severity, proto::diagnostic::Severity::Warning as i32);
        assert!(warning.attribute.is_none());
    }
}
