//! The agent's ReAct loop: an LLM call, tool dispatch, repeat, bounded by
//! a per-phase time budget and a hard recursion limit (§4.2).

mod core;

pub use core::{AgentCore, AgentEventStream, AgentOutcome, AgentRunConfig, StreamEvent, StreamMode};
