//! LLM client (wraps a single configured provider behind a narrow trait so
//! the Agent Engine never touches the SDK shape directly).

pub mod client;
pub mod costs;

pub use client::{LlmClient, LlmError, RigLlmClient, TextStream};
