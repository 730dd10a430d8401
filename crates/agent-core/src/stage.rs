//! Core Stage trait definition

use async_trait::async_trait;

use crate::{ContextHandle, Data, ResultEnvelope, StageContext};

/// A unit of analysis with a single `process` operation
///
/// Implementations must never panic or propagate a failure to the caller:
/// missing inputs, malformed payloads and provider faults all come back as
/// [`ResultEnvelope::Failure`]. A stage may read and write its own context but
/// never touches another stage's state.
///
/// # Example
///
/// ```
/// use agent_core::{ContextHandle, Data, ResultEnvelope, Stage};
/// use async_trait::async_trait;
///
/// struct Echo {
///     context: ContextHandle,
/// }
///
/// #[async_trait]
/// impl Stage for Echo {
///     type Input = String;
///
///     async fn process(&self, input: String) -> ResultEnvelope {
///         if input.is_empty() {
///             return ResultEnvelope::failure("No text provided");
///         }
///         let mut data = Data::new();
///         data.insert("echo".to_string(), input.into());
///         ResultEnvelope::success(data)
///     }
///
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     fn context(&self) -> &ContextHandle {
///         &self.context
///     }
/// }
/// ```
#[async_trait]
pub trait Stage: Send + Sync {
    /// Typed input bundle accepted by this stage
    type Input: Send + 'static;

    /// Run the analysis
    async fn process(&self, input: Self::Input) -> ResultEnvelope;

    /// Stable identifier used in logs and failure reports
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// The context owned by this stage instance
    fn context(&self) -> &ContextHandle;

    /// Merge new information into this stage's context
    async fn update_context(&self, partial: Data) {
        self.context().update(partial).await;
    }

    /// Current context contents
    async fn get_context(&self) -> StageContext {
        self.context().snapshot().await
    }

    /// Reset this stage's context to empty
    async fn clear_context(&self) {
        self.context().clear().await;
    }
}
