//! Maps queued tasks onto their handlers.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use kiaba_core::models::{ProcessPhotoPayload, Task, TaskType};
use kiaba_core::{TaskError, TaskResultExt};
use kiaba_worker::TaskHandlerContext;

use crate::photo_job::PhotoJobRunner;

pub struct Dispatcher {
    runner: Arc<PhotoJobRunner>,
}

impl Dispatcher {
    pub fn new(runner: Arc<PhotoJobRunner>) -> Self {
        Self { runner }
    }

    async fn handle_process_photo(&self, task: &Task) -> Result<serde_json::Value> {
        let payload: ProcessPhotoPayload = task.try_payload_as().unrecoverable()?;

        let outcome = self
            .runner
            .run(payload.photo_id, false)
            .await
            .map_err(|e| {
                if e.is_recoverable() {
                    TaskError::recoverable(e)
                } else {
                    TaskError::unrecoverable(e)
                }
            })?;

        Ok(json!({
            "photo_id": payload.photo_id,
            "outcome": outcome,
        }))
    }
}

#[async_trait]
impl TaskHandlerContext for Dispatcher {
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value> {
        match task.task_type {
            TaskType::ProcessPhoto => self.handle_process_photo(task).await,
        }
    }
}
