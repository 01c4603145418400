//! Protobuf descriptor I/O
//!
//! This crate handles:
//! - Decoding binary `FileDescriptorSet`s into schema declarations
//! - Printing a linked schema back to `.proto` source

pub mod descriptor_set;
pub mod printer;

pub use descriptor_set::{DescriptorError, DescriptorSet};
pub use printer::ProtoPrinter;
