//! Scenario-based tests for matrix-ci

mod conditional_steps;
mod coverage_upload;
mod failure_handling;
mod job_dependencies;
mod matrix_expansion;
