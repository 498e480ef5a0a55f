//! Operation description and transcoder argument building
//!
//! This module handles:
//! - Format tags and per-channel parameters
//! - Operation descriptor defaulting and validation
//! - Argument vector and filter-graph construction

pub mod builder;
pub mod descriptor;
pub mod types;

pub use builder::{build_args, BuildOptions, FilterGraph};
pub use descriptor::OperationDescriptor;
pub use types::{AudioFormat, ChannelSpec, MergePolicy, OperationType};
