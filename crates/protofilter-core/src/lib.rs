//! Protofilter Core
//!
//! Schema graph model, rule forests and the stable report types.
//! Never rename diagnostic codes - they are part of the report format.

pub mod config;
pub mod defs;
pub mod diagnostic;
pub mod path;
pub mod report;
pub mod rules;
pub mod schema;

pub use config::{Config, ConfigError, CONFIG_FILE_NAME};
pub use defs::{EnumDef, EnumValueDef, FieldDef, FileDef, MessageDef, MethodDef, ServiceDef, TypeRef};
pub use diagnostic::{Diagnostic, DiagnosticCode, Severity};
pub use report::{Report, ReportSummary, ReportVersion};
pub use rules::{InclusionVerdict, RuleForest, RuleNode, RulePrecedence, RulesError};
pub use schema::{
    Comments, Element, ElementBody, ElementId, ElementKind, FieldType, FileOption, Label,
    OptionValue, ScalarType, SchemaError, SchemaSet, Syntax,
};
