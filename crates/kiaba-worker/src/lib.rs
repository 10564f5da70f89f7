//! Background task queue and worker pool.
//!
//! [`TaskQueue`] stores tasks through [`kiaba_db::TaskStore`], claims them with a
//! bounded worker pool and hands each one to a [`TaskHandlerContext`].

pub mod context;
pub mod queue;

pub use context::{empty_context_weak, TaskHandlerContext};
pub use queue::{TaskOutcome, TaskQueue};
