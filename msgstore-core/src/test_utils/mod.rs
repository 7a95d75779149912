//! Test utilities shared by the store test suites

pub mod fixtures;

pub use fixtures::*;
