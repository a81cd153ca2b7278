//! ReAct agent: state, step parsing, prompts, memory and the engine loop.

pub mod compaction;
pub mod engine;
pub mod memory;
pub mod prompts;
pub mod state;
pub mod step;

pub use engine::{AgentEngine, AgentOutcome, AgentPhase, FinishReason};
pub use memory::{AgentMemory, InMemoryAgentMemory};
pub use state::{AgentState, Turn};
pub use step::{ActionType, AgentStep, parse_step};
