// Library root — exposes the agent for integration tests and embedding.
// The demo entry point is src/main.rs.

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod notes;
pub mod telemetry;

pub use agent::{Answer, NotesAgent, QueryState};
