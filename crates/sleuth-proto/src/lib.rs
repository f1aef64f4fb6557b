//! # sleuth-proto
//!
//! Shared types and error definitions for the sleuth investigation supervisor.
//!
//! This crate provides the foundational abstractions used across all sleuth crates:
//! - `Job` and `JobStatus`, the durable investigation record
//! - `Interpretation`, the structured view of one generation-backend reply
//! - Common error types

mod error;
mod interpretation;
mod job;

pub use error::{Error, Result};
pub use interpretation::{FieldSource, Findings, Interpretation, InterpretationStatus, Sources};
pub use job::{Job, JobStatus};
