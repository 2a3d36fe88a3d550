//! Conversation memory implementations for tracebot.

pub mod in_memory;

pub use in_memory::{DEFAULT_CAPACITY, DEFAULT_RETENTION_MINUTES, InMemoryStore};
