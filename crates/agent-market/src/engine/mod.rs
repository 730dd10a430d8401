//! Analysis orchestration
//!
//! Validates a joint input bundle, fans it out to the lower stages and hands
//! the merged result to the report stage.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorBuilder};
