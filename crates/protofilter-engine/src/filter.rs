//! One-call filtering: resolve, audit, rebuild

use protofilter_core::{Diagnostic, Report, RuleForest, SchemaSet};

use crate::audit::RuleAudit;
use crate::error::FilterError;
use crate::rebuilder::DescriptorRebuilder;
use crate::resolver::{InclusionMap, InclusionResolver};

/// Output of a successful filter run
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// The filtered schema
    pub schema: SchemaSet,

    /// State of every visited source path
    pub inclusion: InclusionMap,

    /// Rule audit findings
    pub diagnostics: Vec<Diagnostic>,
}

impl FilterResult {
    /// Run report for this result
    pub fn to_report(&self) -> Report {
        Report::from_diagnostics(self.diagnostics.clone())
            .with_inclusion(self.inclusion.visibility())
            .with_files_kept(self.schema.files().len())
    }
}

/// Applies rule forests to schemas
#[derive(Debug, Clone, Default)]
pub struct SchemaFilter {
    audit: RuleAudit,
}

impl SchemaFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audit(mut self, audit: RuleAudit) -> Self {
        self.audit = audit;
        self
    }

    /// Filter `schema` with `rules`
    ///
    /// Either a fully consistent filtered schema is returned, or an error and
    /// nothing else.
    pub fn apply(&self, schema: &SchemaSet, rules: &RuleForest) -> Result<FilterResult, FilterError> {
        tracing::info!(
            files = schema.files().len(),
            elements = schema.len(),
            precedence = %rules.precedence,
            "Filtering schema"
        );

        let inclusion = InclusionResolver::resolve(schema, rules)?;
        let diagnostics = self.audit.audit(schema, rules, &inclusion);
        let filtered = DescriptorRebuilder::rebuild(schema, &inclusion)?;

        tracing::info!(
            files = filtered.files().len(),
            elements = filtered.len(),
            warnings = diagnostics.len(),
            "Filtered schema"
        );

        Ok(FilterResult {
            schema: filtered,
            inclusion,
            diagnostics,
        })
    }
}
