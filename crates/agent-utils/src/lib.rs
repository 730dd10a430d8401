//! Shared utilities for the market analysis workspace
//!
//! Currently this is the tracing subscriber setup applications call once at startup.

pub mod logging;

pub use logging::{LogConfig, init_tracing, init_tracing_with};
