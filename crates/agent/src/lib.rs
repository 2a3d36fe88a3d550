//! The conversation loop, the heart of tracebot.
//!
//! For every user message the loop follows a **Query → Act → Observe** cycle:
//!
//! 1. **Load** the conversation history from memory
//! 2. **Query** the LLM with the history and the tool catalog
//! 3. **If tool calls**: execute them in order, append the results, loop back to step 2
//! 4. **If text only**: persist the answer and return it
//!
//! The loop stops after a fixed number of queries. Every outcome, failures
//! included, is a string that can go straight back to the user.

pub mod loop_runner;

pub use loop_runner::{
    CAP_EXCEEDED_REPLY, ConversationLoop, DEFAULT_MAX_ITERATIONS, EMPTY_REPLY, LoopOutcome,
    Termination, error_reply,
};
