//! LLM provider implementations
//!
//! Concrete implementations of the LlmProvider trait for different LLM services.

pub mod anthropic;
pub mod openai;

pub use anthropic::*;
pub use openai::*;
