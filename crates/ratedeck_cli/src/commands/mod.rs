//! CLI command implementations.

pub mod input;
pub mod query;
pub mod summarize;
