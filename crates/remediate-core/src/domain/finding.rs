//! Findings reported by an assessor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity shared by findings and the change units drafted for them.
///
/// Ordered from most to least urgent, so sorting ascending puts
/// `Critical` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        f.write_str(s)
    }
}

/// One problem detected in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub description: String,
    /// Free-form location, typically `path` or `path:line`.
    #[serde(default)]
    pub location: String,
}

impl Finding {
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            description: description.into(),
            location: location.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_orders_critical_first() {
        let mut v = vec![Severity::Low, Severity::Critical, Severity::Medium, Severity::High];
        v.sort();
        assert_eq!(
            v,
            vec![Severity::Critical, Severity::High, Severity::Medium, Severity::Low]
        );
    }

    #[test]
    fn test_finding_location_defaults_to_empty() {
        let json = r#"{"id":"F-1","severity":"high","description":"hardcoded token"}"#;
        let finding: Finding = serde_json::from_str(json).expect("deserialize");
        assert_eq!(finding.severity, Severity::High);
        assert!(finding.location.is_empty());
    }
}
