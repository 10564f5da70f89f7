//! Task handler context trait
//!
//! The service layer implements this trait. The worker calls `dispatch_task`
//! for every claimed task; the implementation matches on task type and invokes
//! the right handler.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

use kiaba_core::models::Task;

#[async_trait]
pub trait TaskHandlerContext: Send + Sync {
    /// Run the task and return its JSON result.
    ///
    /// Errors wrapped in an unrecoverable [`kiaba_core::TaskError`] fail the task
    /// at once; any other error is retried while attempts remain.
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value>;
}

/// Placeholder used when no real context exists (e.g. submit-only queues).
struct NoopContext;

#[async_trait]
impl TaskHandlerContext for NoopContext {
    async fn dispatch_task(self: Arc<Self>, _task: &Task) -> Result<serde_json::Value> {
        Err(anyhow!("NoopContext: no handler context available"))
    }
}

/// A weak reference that never upgrades.
pub fn empty_context_weak() -> Weak<dyn TaskHandlerContext> {
    let n: Arc<dyn TaskHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
