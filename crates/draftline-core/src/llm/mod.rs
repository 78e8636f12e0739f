//! LLM collaborator port.
//!
//! - `LlmClient`: RPITIT trait implemented by concrete model clients
//! - `BoxLlmClient`: object-safe wrapper for dynamic dispatch

pub mod box_client;
pub mod client;

pub use box_client::BoxLlmClient;
pub use client::{GenerateRequest, LlmClient};
