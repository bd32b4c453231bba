//! Drives the queue: claims the next pending task, runs it through the
//! injected `IngestionOrchestrator`, and translates its progress events and
//! outcome back into queue state. Mirrors the teacher's retry-with-backoff
//! convention, adapted to a cancellation-aware orchestrator call instead of
//! a database lease.

use std::sync::Arc;
use std::time::Duration;

use common::cancellation::CancellationRoots;
use common::domain::{Task, TaskStatus};
use common::error::AppError;
use common::orchestrator::IngestionOrchestrator;
use common::progress::ProgressBus;
use tokio::time::sleep;

use crate::queue::TaskQueue;

const PROGRESS_CHANNEL_CAPACITY: usize = 64;
const RETRY_BACKOFF_CAP_EXPONENT: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub poll_interval: Duration,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

/// The long-running worker loop. One instance per process; `run` never
/// returns until shutdown is triggered.
pub struct TaskProcessor {
    queue: Arc<TaskQueue>,
    orchestrator: Arc<dyn IngestionOrchestrator>,
    cancellation_roots: CancellationRoots,
    config: ProcessorConfig,
}

impl TaskProcessor {
    pub fn new(
        queue: Arc<TaskQueue>,
        orchestrator: Arc<dyn IngestionOrchestrator>,
        cancellation_roots: CancellationRoots,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            cancellation_roots,
            config,
        }
    }

    pub fn trigger_shutdown(&self) {
        self.cancellation_roots.trigger_shutdown();
    }

    /// Resets any task left `Processing` by a previous crashed run, then
    /// polls for work until shutdown is triggered.
    pub async fn run(&self) {
        match self.queue.reset_processing_to_pending().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "reset stale processing tasks to pending on startup"),
            Err(err) => tracing::warn!(error = %err, "failed to reset stale processing tasks"),
        }

        let shutdown = self.cancellation_roots.shutdown_token();
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.queue.next_pending().await {
                Some(task) => self.process_one(task).await,
                None => {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
    }

    #[tracing::instrument(skip_all, fields(task_id = %task.task_id, doc_id = %task.rag_document_id))]
    async fn process_one(&self, task: Task) {
        if let Err(err) = self.queue.update_status(&task.task_id, TaskStatus::Processing, None).await {
            tracing::warn!(error = %err, "failed to mark task processing; skipping this round");
            return;
        }

        let (bus, mut primary_rx) = ProgressBus::new(PROGRESS_CHANNEL_CAPACITY);
        let bus = Arc::new(bus);
        let cancellation = self.cancellation_roots.task_handle();

        let queue_for_progress = Arc::clone(&self.queue);
        let task_id_for_progress = task.task_id.clone();
        let progress_forwarder = tokio::spawn(async move {
            while let Some(event) = primary_rx.recv().await {
                let percent = event.percent();
                let _ = queue_for_progress
                    .update_progress(&task_id_for_progress, Some(event.stage), percent)
                    .await;
            }
        });

        let result = self
            .orchestrator
            .insert(task.content.clone(), task.file_path.clone(), Arc::clone(&bus), cancellation.clone())
            .await;

        drop(bus);
        let _ = progress_forwarder.await;

        self.finish(&task, result, &cancellation).await;
    }

    async fn finish(
        &self,
        task: &Task,
        result: Result<String, AppError>,
        cancellation: &common::cancellation::TaskCancellation,
    ) {
        match result {
            Ok(_doc_id) => {
                if let Err(err) = self.queue.update_status(&task.task_id, TaskStatus::Completed, None).await {
                    tracing::warn!(error = %err, "failed to mark task completed");
                }
            }
            Err(AppError::Cancelled) if cancellation.is_shutdown() => {
                tracing::info!("task interrupted by shutdown; resetting to pending for the next run");
                if let Err(err) = self.queue.update_status(&task.task_id, TaskStatus::Pending, None).await {
                    tracing::warn!(error = %err, "failed to reset interrupted task to pending");
                }
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::warn!(error = %reason, "ingestion task failed");
                if let Err(store_err) = self
                    .queue
                    .update_status(&task.task_id, TaskStatus::Failed, Some(reason))
                    .await
                {
                    tracing::warn!(error = %store_err, "failed to mark task failed");
                    return;
                }

                let retryable = !matches!(err, AppError::Validation(_) | AppError::Cancelled);
                if retryable && task.retry_count < task.max_retries {
                    self.schedule_retry(task.task_id.clone(), task.retry_count);
                }
            }
        }
    }

    fn schedule_retry(&self, task_id: String, attempt: u32) {
        let delay = self.retry_delay(attempt);
        let queue = Arc::clone(&self.queue);
        let shutdown = self.cancellation_roots.shutdown_token();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = sleep(delay) => {
                    if let Err(err) = queue.retry(&task_id).await {
                        tracing::warn!(task_id = %task_id, error = %err, "scheduled retry failed");
                    }
                }
            }
        });
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let capped_attempt = attempt.min(RETRY_BACKOFF_CAP_EXPONENT);
        let multiplier = 2_u64.saturating_pow(capped_attempt);
        let delay_ms = self.config.retry_base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.config.retry_max_delay_ms))
    }
}
