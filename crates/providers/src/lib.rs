//! Model provider implementations for Quarry.
//!
//! All providers implement the `quarry_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
