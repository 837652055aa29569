//! Testing utilities and mock implementations
//!
//! Mock forum, language model and store so the cycle engine can be exercised
//! without network access or a database file.

pub mod mocks;

pub use mocks::*;
