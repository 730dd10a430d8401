//! Core abstractions for staged market analysis
//!
//! This crate defines the stage contract, the result envelope every stage
//! returns, and the per-stage context store.

pub mod context;
pub mod envelope;
pub mod error;
pub mod stage;

pub use context::{ContextHandle, StageContext};
pub use envelope::{Data, ResultEnvelope};
pub use error::{Error, Result};
pub use stage::Stage;
