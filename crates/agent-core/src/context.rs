//! Per-stage persistent state
//!
//! Every stage instance owns exactly one [`ContextHandle`]. The orchestrator may
//! push updates into it after a run; the stage reads it back on later calls.
//! Contexts are never shared between stages and never cleared implicitly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::Data;

/// Well-known keys pushed between stages after a run
pub mod keys {
    /// Indicator series from the technical stage
    pub const TECHNICAL_INDICATORS: &str = "technical_indicators";
    /// Overall sentiment distribution from the sentiment stage
    pub const SENTIMENT_CONTEXT: &str = "sentiment_context";
    /// Patterns detected by the chart stage
    pub const CHART_PATTERNS: &str = "chart_patterns";
    /// Summary block from the technical stage
    pub const TECHNICAL_CONTEXT: &str = "technical_context";
    /// Chart patterns as seen by the sentiment stage
    pub const CHART_CONTEXT: &str = "chart_context";
    /// Merged lower-stage results as seen by the report stage
    pub const ANALYSIS_RESULTS: &str = "analysis_results";
}

/// Key-value state owned by a single stage
///
/// # Example
///
/// ```
/// use agent_core::StageContext;
/// use serde_json::json;
///
/// let mut ctx = StageContext::new();
/// ctx.insert("chart_patterns", json!(["double_top"]));
/// ctx.insert("sentiment_context", json!({"positive": 0.6}));
/// assert_eq!(ctx.len(), 2);
///
/// ctx.clear();
/// assert!(ctx.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageContext {
    data: HashMap<String, Value>,
}

impl StageContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value into the context
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Get a value from the context
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Insert a typed value into the context
    ///
    /// Serializes the value to JSON before storing.
    pub fn insert_typed<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> crate::Result<()> {
        let json_value = serde_json::to_value(value).map_err(|e| {
            crate::Error::ProcessingFailed(format!("Failed to serialize context value: {e}"))
        })?;
        self.data.insert(key.into(), json_value);
        Ok(())
    }

    /// Get a typed value from the context
    pub fn get_typed<T: for<'de> Deserialize<'de>>(&self, key: &str) -> crate::Result<Option<T>> {
        self.data
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    crate::Error::ProcessingFailed(format!(
                        "Failed to deserialize context value '{key}': {e}"
                    ))
                })
            })
            .transpose()
    }

    /// Merge a partial update; keys in `partial` overwrite existing ones
    pub fn update(&mut self, partial: Data) {
        self.data.extend(partial);
    }

    /// Merge another context into this one (other values override)
    pub fn merge(&mut self, other: StageContext) {
        self.data.extend(other.data);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Reset the context to empty
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Owned, write-serialized wrapper around a [`StageContext`]
///
/// A stage may be invoked concurrently; the lock makes context updates from
/// those calls apply one at a time so none is lost.
#[derive(Debug, Default)]
pub struct ContextHandle {
    inner: RwLock<StageContext>,
}

impl ContextHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a partial update into the context
    pub async fn update(&self, partial: Data) {
        let mut ctx = self.inner.write().await;
        ctx.update(partial);
    }

    /// Clone of the current context
    pub async fn snapshot(&self) -> StageContext {
        self.inner.read().await.clone()
    }

    /// Reset the context to empty
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Sorted list of keys currently held
    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.keys()
    }
}
