//! Core domain models for matrix-ci
//!
//! This module defines the pipeline, job and step structures, matrix
//! expansion and the condition language steps are gated on.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod matrix;
pub mod pipeline;
pub mod state;
pub mod step;

pub use condition::{Condition, VariableLookup};
pub use context::*;
pub use error::*;
pub use matrix::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
