//! Rule audit
//!
//! Reports rules that look like mistakes once a resolution has run: paths no
//! schema element matched, and leaves present on both sides.

use protofilter_core::{Diagnostic, DiagnosticCode, RuleForest, SchemaSet, Severity};

use crate::resolver::InclusionMap;

/// Diagnostics about the rule forests of a successful run
#[derive(Debug, Clone)]
pub struct RuleAudit {
    /// Report rule paths that name no element of the schema
    pub warn_unmatched: bool,
}

impl Default for RuleAudit {
    fn default() -> Self {
        Self {
            warn_unmatched: true,
        }
    }
}

impl RuleAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unmatched_warnings(mut self, enabled: bool) -> Self {
        self.warn_unmatched = enabled;
        self
    }

    /// Audit `rules` against `schema` and the paths visited while resolving them
    pub fn audit(
        &self,
        schema: &SchemaSet,
        rules: &RuleForest,
        inclusion: &InclusionMap,
    ) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if self.warn_unmatched {
            let (include, exclude) = rules.rule_paths();
            for (side, paths) in [("include", include), ("exclude", exclude)] {
                for path in paths {
                    // unvisited but real elements sit under something never explored
                    if inclusion.contains(&path) || schema.find(&path).is_some() {
                        continue;
                    }
                    tracing::info!(path = %path, side, "Rule matched no schema element");
                    diagnostics.push(
                        Diagnostic::new(
                            DiagnosticCode::RuleUnmatched,
                            Severity::Warn,
                            format!("{} rule '{}' did not match any schema element", side, path),
                        )
                        .with_path(path),
                    );
                }
            }
        }

        for path in rules.overlapping_leaves() {
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticCode::RuleOverlap,
                    Severity::Warn,
                    format!(
                        "'{}' is a leaf in both include and exclude rules; {} precedence applied",
                        path, rules.precedence
                    ),
                )
                .with_path(path),
            );
        }

        diagnostics
    }
}
