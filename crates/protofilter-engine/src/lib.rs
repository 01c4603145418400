//! Protofilter engine
//!
//! This crate implements the filtering logic:
//! - Inclusion resolution against include/exclude rules
//! - Reconstruction of the included part of a schema
//! - Rule audit diagnostics

pub mod audit;
pub mod error;
pub mod filter;
pub mod rebuilder;
pub mod resolver;

pub use audit::RuleAudit;
pub use error::FilterError;
pub use filter::{FilterResult, SchemaFilter};
pub use rebuilder::DescriptorRebuilder;
pub use resolver::{InclusionMap, InclusionResolver, InclusionState};
