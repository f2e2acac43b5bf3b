//! Routing-failure analysis: prompts, the text tool protocol and the
//! bounded reasoning loop.

pub mod engine;
pub mod prompt;
pub mod react;

pub use engine::{AgentStatus, AnalysisEngine, AnalysisError, AnalysisOutcome, EngineSettings};
