//! Task queue: worker pool, polling, retry, and submission.
//!
//! Retries use a fixed backoff: a failed attempt is rescheduled at
//! `now + retry_backoff` while `attempts < max_attempts`. Tasks whose worker died
//! stay `running` until the stale task reaper hands them back after
//! `timeout + stale_grace_period`.
//!
//! Shutdown: [`TaskQueue::shutdown`] stops claiming, then waits for in-flight
//! tasks. Each task is bounded by `timeout`, so the wait is too.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use kiaba_core::models::{ProcessPhotoPayload, Task, TaskPayload, TaskStatus};
use kiaba_core::{TaskError, TaskQueueSettings};
use kiaba_db::TaskStore;

use crate::context::TaskHandlerContext;

/// Where a processed task ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    /// `Completed`, `Failed`, or `Pending` when a retry was scheduled.
    pub status: TaskStatus,
}

pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    config: TaskQueueSettings,
    context: Weak<dyn TaskHandlerContext>,
    workers: Arc<Semaphore>,
    shutdown_tx: mpsc::Sender<()>,
}

impl TaskQueue {
    /// Create a queue and spawn its worker pool.
    pub fn new(
        store: Arc<dyn TaskStore>,
        config: TaskQueueSettings,
        context: Weak<dyn TaskHandlerContext>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));

        let store_clone = store.clone();
        let config_clone = config.clone();
        let context_clone = context.clone();
        let workers_clone = workers.clone();
        tokio::spawn(async move {
            Self::worker_pool(
                store_clone,
                config_clone,
                context_clone,
                workers_clone,
                shutdown_rx,
            )
            .await;
        });

        Self {
            store,
            config,
            context,
            workers,
            shutdown_tx,
        }
    }

    /// Create a queue without a worker pool. Submitted tasks are persisted and
    /// picked up by whichever process runs the pool; [`TaskQueue::run_once`]
    /// still works.
    pub fn new_no_worker(
        store: Arc<dyn TaskStore>,
        config: TaskQueueSettings,
        context: Weak<dyn TaskHandlerContext>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self {
            store,
            config,
            context,
            workers,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &TaskQueueSettings {
        &self.config
    }

    /// Submit a typed task, due now.
    #[tracing::instrument(skip(self, payload))]
    pub async fn submit<P: TaskPayload + Send + Sync>(&self, payload: &P) -> Result<Uuid> {
        let task_type = P::task_type();
        let payload = serde_json::to_value(payload).context("Failed to serialize task payload")?;

        let task = self
            .store
            .enqueue(task_type, payload, self.config.max_attempts, Utc::now())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, task_type = %task_type, "Failed to create task in store");
                anyhow::anyhow!("Failed to create task in store: {}", e)
            })?;

        tracing::info!(task_id = %task.id, task_type = %task_type, "Task submitted to queue");
        Ok(task.id)
    }

    /// Queue processing of one photo.
    #[tracing::instrument(skip(self))]
    pub async fn submit_photo_job(&self, photo_id: Uuid) -> Result<Uuid> {
        self.submit(&ProcessPhotoPayload { photo_id }).await
    }

    /// Claim one due task and run it inline.
    ///
    /// Returns `None` when nothing is due.
    pub async fn run_once(&self) -> Result<Option<TaskOutcome>> {
        let Some(task) = self.store.claim_next().await? else {
            return Ok(None);
        };
        let outcome =
            Self::process_task(task, self.store.clone(), &self.config, self.context.clone())
                .await?;
        Ok(Some(outcome))
    }

    /// Run due tasks inline until none is left. Rescheduled retries are not due
    /// until their backoff expires, so this terminates.
    pub async fn drain(&self) -> Result<Vec<TaskOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_once().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Return abandoned running tasks to the queue.
    ///
    /// Only tasks started more than `timeout + stale_grace_period` ago qualify, so
    /// a task still held by a live worker is never handed out twice.
    pub async fn reap_stale_tasks(&self) -> Result<u64> {
        Self::reap(&self.store, &self.config).await
    }

    async fn reap(store: &Arc<dyn TaskStore>, config: &TaskQueueSettings) -> Result<u64> {
        let stale_after = chrono::Duration::from_std(config.stale_after())
            .context("Stale task cutoff out of range")?;
        let reaped = store.reap_stale_running(Utc::now() - stale_after).await?;
        if reaped > 0 {
            tracing::warn!(count = reaped, "Returned stale running tasks to the queue");
        }
        Ok(reaped)
    }

    async fn worker_pool(
        store: Arc<dyn TaskStore>,
        config: TaskQueueSettings,
        context: Weak<dyn TaskHandlerContext>,
        semaphore: Arc<Semaphore>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Task queue worker pool started"
        );

        // Spawn stale task reaper (if interval > 0)
        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if !config.stale_reap_interval.is_zero() {
            let store = store.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.stale_reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = Self::reap(&store, &config).await {
                                tracing::error!(error = %e, "Stale task reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = sleep(config.poll_interval) => {
                    Self::claim_and_dispatch(&store, &config, &semaphore, &context).await;
                }
            }
        }

        tracing::info!("Task queue worker pool stopped");
    }

    /// Claim while workers are free and tasks are due.
    async fn claim_and_dispatch(
        store: &Arc<dyn TaskStore>,
        config: &TaskQueueSettings,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn TaskHandlerContext>,
    ) {
        loop {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::debug!("No workers available, skipping claim");
                    return;
                }
            };

            match store.claim_next().await {
                Ok(Some(task)) => {
                    let store = store.clone();
                    let config = config.clone();
                    let ctx = context.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = Self::process_task(task, store, &config, ctx).await {
                            tracing::error!(error = %e, "Failed to record task outcome");
                        }
                    });
                }
                Ok(None) => {
                    tracing::trace!("No tasks available in queue");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim task from queue");
                    return;
                }
            }
        }
    }

    #[tracing::instrument(skip(task, store, config, context), fields(task.id = %task.id, task.type = %task.task_type, attempt = task.attempts))]
    async fn process_task(
        task: Task,
        store: Arc<dyn TaskStore>,
        config: &TaskQueueSettings,
        context: Weak<dyn TaskHandlerContext>,
    ) -> Result<TaskOutcome> {
        let outcome = |status| TaskOutcome {
            task_id: task.id,
            status,
        };

        let Some(ctx) = context.upgrade() else {
            tracing::warn!(task_id = %task.id, "Task handler context dropped, returning task to queue");
            store
                .reschedule(task.id, Utc::now() + backoff(config), "handler context unavailable")
                .await?;
            return Ok(outcome(TaskStatus::Pending));
        };

        let result = tokio::time::timeout(config.timeout, ctx.dispatch_task(&task)).await;

        let error = match result {
            Ok(Ok(task_result)) => {
                store
                    .mark_completed(task.id, task_result)
                    .await
                    .context("Failed to mark task as completed")?;
                tracing::info!(task_id = %task.id, task_type = %task.task_type, "Task completed successfully");
                return Ok(outcome(TaskStatus::Completed));
            }
            Ok(Err(e)) => e,
            Err(_) => {
                tracing::error!(
                    task_id = %task.id,
                    timeout_secs = config.timeout.as_secs(),
                    "Task execution timed out"
                );
                anyhow::anyhow!("Task execution timed out after {}s", config.timeout.as_secs())
            }
        };

        let unrecoverable = TaskError::is_unrecoverable(&error);
        tracing::warn!(
            task_id = %task.id,
            error = %error,
            attempt = task.attempts,
            max_attempts = task.max_attempts,
            unrecoverable = unrecoverable,
            "Task execution failed"
        );

        if !unrecoverable && task.can_retry() {
            let at = Utc::now() + backoff(config);
            store
                .reschedule(task.id, at, &error.to_string())
                .await
                .context("Failed to reschedule task")?;
            tracing::info!(
                task_id = %task.id,
                next_attempt = task.attempts + 1,
                backoff_secs = config.retry_backoff.as_secs(),
                "Scheduling task retry"
            );
            return Ok(outcome(TaskStatus::Pending));
        }

        let detail = json!({
            "error": error.to_string(),
            "attempts": task.attempts,
            "unrecoverable": unrecoverable,
        });
        store
            .mark_failed(task.id, &detail.to_string())
            .await
            .context("Failed to mark task as failed")?;
        tracing::error!(
            task_id = %task.id,
            payload = %task.payload,
            attempts = task.attempts,
            "Task failed, giving up"
        );
        Ok(outcome(TaskStatus::Failed))
    }

    /// Stop claiming new tasks and wait for in-flight ones to record their
    /// outcome. Gives up after `timeout`; anything still running is recovered
    /// later by the reaper.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;

        let workers = self.config.max_workers.max(1) as u32;
        match tokio::time::timeout(self.config.timeout, self.workers.acquire_many(workers)).await {
            Ok(Ok(_permits)) => tracing::info!("In-flight tasks finished"),
            Ok(Err(_)) => {}
            Err(_) => tracing::warn!(
                timeout_secs = self.config.timeout.as_secs(),
                "Shutdown timed out waiting for in-flight tasks"
            ),
        }
    }
}

fn backoff(config: &TaskQueueSettings) -> chrono::Duration {
    chrono::Duration::from_std(config.retry_backoff).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

impl Clone for TaskQueue {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            context: self.context.clone(),
            workers: self.workers.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kiaba_db::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Succeed,
        FailRecoverable,
        FailUnrecoverable,
        Slow,
        Hang,
    }

    struct TestContext {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl TestContext {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TaskHandlerContext for TestContext {
        async fn dispatch_task(self: Arc<Self>, _task: &Task) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => Ok(json!({ "ok": true })),
                Behaviour::FailRecoverable => Err(anyhow::anyhow!("storage unavailable")),
                Behaviour::FailUnrecoverable => {
                    Err(TaskError::unrecoverable(anyhow::anyhow!("bad payload")).into())
                }
                Behaviour::Slow => {
                    sleep(Duration::from_millis(200)).await;
                    Ok(json!({ "ok": true }))
                }
                Behaviour::Hang => {
                    sleep(Duration::from_secs(3600)).await;
                    Ok(json!({}))
                }
            }
        }
    }

    fn settings() -> TaskQueueSettings {
        TaskQueueSettings {
            retry_backoff: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            ..TaskQueueSettings::default()
        }
    }

    fn weak(ctx: &Arc<TestContext>) -> Weak<dyn TaskHandlerContext> {
        let ctx: Arc<dyn TaskHandlerContext> = ctx.clone();
        Arc::downgrade(&ctx)
    }

    async fn wait_for(store: &MemoryStore, id: Uuid, wanted: TaskStatus) -> TaskStatus {
        let mut status = TaskStatus::Pending;
        for _ in 0..200 {
            status = store.get_task(id).await.unwrap().unwrap().status;
            if status == wanted {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        status
    }

    fn queue(store: &MemoryStore, ctx: &Arc<TestContext>, config: TaskQueueSettings) -> TaskQueue {
        TaskQueue::new_no_worker(Arc::new(store.clone()), config, weak(ctx))
    }

    #[tokio::test]
    async fn completes_successful_task() {
        let store = MemoryStore::new();
        let ctx = TestContext::new(Behaviour::Succeed);
        let queue = queue(&store, &ctx, settings());

        let id = queue.submit_photo_job(Uuid::new_v4()).await.unwrap();
        let outcome = queue.run_once().await.unwrap().unwrap();
        assert_eq!(outcome, TaskOutcome { task_id: id, status: TaskStatus::Completed });

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({ "ok": true })));
        assert!(queue.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recoverable_failure_stops_after_three_attempts() {
        let store = MemoryStore::new();
        let ctx = TestContext::new(Behaviour::FailRecoverable);
        let queue = queue(&store, &ctx, settings());

        let id = queue.submit_photo_job(Uuid::new_v4()).await.unwrap();
        let statuses: Vec<_> = queue
            .drain()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.status)
            .collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Pending, TaskStatus::Pending, TaskStatus::Failed]
        );
        assert_eq!(ctx.calls.load(Ordering::SeqCst), 3);

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.attempts, 3);
        assert!(task.last_error.unwrap().contains("storage unavailable"));
    }

    #[tokio::test]
    async fn retry_waits_for_backoff() {
        let store = MemoryStore::new();
        let ctx = TestContext::new(Behaviour::FailRecoverable);
        let config = TaskQueueSettings {
            retry_backoff: Duration::from_secs(60),
            ..settings()
        };
        let queue = queue(&store, &ctx, config);

        let id = queue.submit_photo_job(Uuid::new_v4()).await.unwrap();
        assert_eq!(queue.drain().await.unwrap().len(), 1);

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.scheduled_at > Utc::now() + chrono::Duration::seconds(50));
    }

    #[tokio::test]
    async fn unrecoverable_failure_is_not_retried() {
        let store = MemoryStore::new();
        let ctx = TestContext::new(Behaviour::FailUnrecoverable);
        let queue = queue(&store, &ctx, settings());

        let id = queue.submit_photo_job(Uuid::new_v4()).await.unwrap();
        let outcome = queue.run_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(store.get_task(id).await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn timeout_counts_as_recoverable_failure() {
        let store = MemoryStore::new();
        let ctx = TestContext::new(Behaviour::Hang);
        let config = TaskQueueSettings {
            timeout: Duration::from_millis(20),
            ..settings()
        };
        let queue = queue(&store, &ctx, config);

        queue.submit_photo_job(Uuid::new_v4()).await.unwrap();
        let outcome = queue.run_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn worker_pool_processes_in_background() {
        let store = MemoryStore::new();
        let ctx = TestContext::new(Behaviour::Succeed);
        let queue = TaskQueue::new(Arc::new(store.clone()), settings(), weak(&ctx));

        let id = queue.submit_photo_job(Uuid::new_v4()).await.unwrap();
        let status = wait_for(&store, id, TaskStatus::Completed).await;
        queue.shutdown().await;
        assert_eq!(status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn reaper_ignores_tasks_within_timeout() {
        let store = MemoryStore::new();
        let ctx = TestContext::new(Behaviour::Succeed);
        let queue = queue(&store, &ctx, settings());

        let id = queue.submit_photo_job(Uuid::new_v4()).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        assert_eq!(queue.reap_stale_tasks().await.unwrap(), 0);
        assert_eq!(store.get_task(id).await.unwrap().unwrap().status, TaskStatus::Running);
        assert!(queue.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abandoned_task_is_redelivered_by_pool() {
        let store = MemoryStore::new();
        let ctx = TestContext::new(Behaviour::Succeed);
        let config = TaskQueueSettings {
            timeout: Duration::from_millis(50),
            stale_grace_period: Duration::ZERO,
            stale_reap_interval: Duration::from_millis(10),
            ..settings()
        };

        // Claimed by a worker that died before recording an outcome.
        let submitter = queue(&store, &ctx, config.clone());
        let id = submitter.submit_photo_job(Uuid::new_v4()).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        let pool = TaskQueue::new(Arc::new(store.clone()), config, weak(&ctx));
        let status = wait_for(&store, id, TaskStatus::Completed).await;
        pool.shutdown().await;

        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(store.get_task(id).await.unwrap().unwrap().attempts, 2);
        assert_eq!(ctx.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_task() {
        let store = MemoryStore::new();
        let ctx = TestContext::new(Behaviour::Slow);
        let queue = TaskQueue::new(Arc::new(store.clone()), settings(), weak(&ctx));

        let id = queue.submit_photo_job(Uuid::new_v4()).await.unwrap();
        assert_eq!(wait_for(&store, id, TaskStatus::Running).await, TaskStatus::Running);

        queue.shutdown().await;
        assert_eq!(store.get_task(id).await.unwrap().unwrap().status, TaskStatus::Completed);
    }
}
