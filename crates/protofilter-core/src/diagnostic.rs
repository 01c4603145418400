//! Diagnostic codes and error reporting
//!
//! Diagnostic codes are stable string identifiers that end up in run reports.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Filter failures
    /// An include and an exclude decision contradict each other at one path
    FilterConflict,

    /// The rebuilt schema lost a reference the resolution guaranteed
    FilterIntegrity,

    // Rule audit
    /// A rule path that no schema element matched
    RuleUnmatched,

    /// A path that is a leaf under both include and exclude
    RuleOverlap,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FilterConflict => "FILTER_CONFLICT",
            Self::FilterIntegrity => "FILTER_INTEGRITY",
            Self::RuleUnmatched => "RULE_UNMATCHED",
            Self::RuleOverlap => "RULE_OVERLAP",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - the filter produced no output
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Schema or rule path the diagnostic is about
    pub path: Option<String>,

    /// Expected value (for conflicting decisions)
    pub expected: Option<String>,

    /// Actual value (for conflicting decisions)
    pub actual: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            path: None,
            expected: None,
            actual: None,
        }
    }

    /// Set the path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set expected/actual values
    pub fn with_comparison(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        assert_eq!(DiagnosticCode::FilterConflict.as_str(), "FILTER_CONFLICT");
        assert_eq!(DiagnosticCode::RuleUnmatched.as_str(), "RULE_UNMATCHED");
        assert_eq!(DiagnosticCode::RuleOverlap.to_string(), "RULE_OVERLAP");
    }

    #[test]
    fn only_emitted_codes_deserialize() {
        let code: DiagnosticCode = serde_json::from_str("\"FILTER_INTEGRITY\"").unwrap();
        assert_eq!(code, DiagnosticCode::FilterIntegrity);
        assert!(serde_json::from_str::<DiagnosticCode>("\"WARNING\"").is_err());
        assert!(serde_json::from_str::<DiagnosticCode>("\"INFO\"").is_err());
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::new(
            DiagnosticCode::FilterConflict,
            Severity::Error,
            "test.proto/msg_a is both included and excluded",
        )
        .with_path("test.proto/msg_a")
        .with_comparison("included_explicit", "excluded_explicit");

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("FILTER_CONFLICT"));
        assert!(json.contains("\"error\""));
        assert!(json.contains("test.proto/msg_a"));
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Error > Severity::Warn);
        assert!(Severity::Warn > Severity::Info);
    }
}
