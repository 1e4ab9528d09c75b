//! Agent Engine (C9): the reason-act loop that owns the iteration bound,
//! event emission, and termination.

pub mod engine;

pub use engine::{AgentEngine, CompletionRequest, EngineError, RunOutcome};
