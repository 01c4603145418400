//! Filter errors

use protofilter_core::{Diagnostic, DiagnosticCode, Severity};

use crate::resolver::InclusionState;

/// Errors that abort a filter run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// Two rules (or a rule and a reference) disagree about one path
    #[error("Element at path {path} was {existing} and is now found as {attempted}")]
    Conflict {
        path: String,
        existing: InclusionState,
        attempted: InclusionState,
    },

    /// A kept field or method points at a type that is not kept
    #[error("{path} is kept but references {target}, which is {state}")]
    ExcludedReference {
        path: String,
        target: String,
        state: InclusionState,
    },

    /// The rebuilt schema lost a reference the resolution guaranteed
    #[error("Integrity violation at {path}: {detail}")]
    Integrity { path: String, detail: String },
}

impl FilterError {
    /// Path the error is about
    pub fn path(&self) -> &str {
        match self {
            Self::Conflict { path, .. }
            | Self::ExcludedReference { path, .. }
            | Self::Integrity { path, .. } => path,
        }
    }

    /// Report form of the error
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = match self {
            Self::Conflict {
                existing,
                attempted,
                ..
            } => Diagnostic::new(DiagnosticCode::FilterConflict, Severity::Error, self.to_string())
                .with_comparison(existing.to_string(), attempted.to_string()),
            Self::ExcludedReference { state, .. } => {
                Diagnostic::new(DiagnosticCode::FilterConflict, Severity::Error, self.to_string())
                    .with_comparison("included", state.to_string())
            }
            Self::Integrity { .. } => {
                Diagnostic::new(DiagnosticCode::FilterIntegrity, Severity::Error, self.to_string())
            }
        };
        diagnostic.with_path(self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_diagnostic() {
        let err = FilterError::Conflict {
            path: "test.proto/msg_b".to_string(),
            existing: InclusionState::IncludedExplicit,
            attempted: InclusionState::ExcludedExplicit,
        };
        assert_eq!(
            err.to_string(),
            "Element at path test.proto/msg_b was included explicitly and is now found as excluded explicitly"
        );

        let diag = err.to_diagnostic();
        assert_eq!(diag.code, DiagnosticCode::FilterConflict);
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.path.as_deref(), Some("test.proto/msg_b"));
        assert_eq!(diag.expected.as_deref(), Some("included explicitly"));
        assert_eq!(diag.actual.as_deref(), Some("excluded explicitly"));
    }

    #[test]
    fn integrity_diagnostic() {
        let err = FilterError::Integrity {
            path: "test.proto/msg_a/f".to_string(),
            detail: "no shell for test.proto/msg_b".to_string(),
        };
        let diag = err.to_diagnostic();
        assert_eq!(diag.code, DiagnosticCode::FilterIntegrity);
        assert_eq!(diag.path.as_deref(), Some("test.proto/msg_a/f"));
    }
}
