//! Shared test utilities for postman integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated test execution with a temp database
//! - Builders for configurations and templates

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
