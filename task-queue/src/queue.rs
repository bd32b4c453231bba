use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::domain::{ProcessingStage, Task, TaskStatus};
use common::error::AppError;
use common::ids;
use tokio::sync::{broadcast, Mutex};

use crate::state_store::TaskStateStore;

const CHANGE_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Published on every status transition; external systems subscribe to
/// translate these into database updates and notifications.
#[derive(Debug, Clone)]
pub struct TaskChangeEvent {
    pub task: Task,
}

/// Priority-ordered collection of tasks with status transitions. A single
/// mutex guards the in-memory map; persistent writes and change-event
/// publication happen outside the lock so status reads are never serialised
/// behind file I/O.
pub struct TaskQueue {
    tasks: Mutex<HashMap<String, Task>>,
    store: Arc<TaskStateStore>,
    changes: broadcast::Sender<TaskChangeEvent>,
}

impl TaskQueue {
    pub async fn open(store: Arc<TaskStateStore>) -> Result<Self, AppError> {
        let existing = store.load_all().await;
        let tasks = existing.into_iter().map(|t| (t.task_id.clone(), t)).collect();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            tasks: Mutex::new(tasks),
            store,
            changes,
        })
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<TaskChangeEvent> {
        self.changes.subscribe()
    }

    fn publish(&self, task: &Task) {
        let _ = self.changes.send(TaskChangeEvent { task: task.clone() });
    }

    pub async fn enqueue(
        &self,
        document_id: String,
        content: String,
        file_path: String,
    ) -> Result<String, AppError> {
        let rag_document_id = ids::doc_id(&content);
        let task_id = ids::task_id(&rag_document_id, &content, Utc::now().timestamp_nanos_opt().unwrap_or_default());

        let task = Task {
            task_id: task_id.clone(),
            document_id,
            rag_document_id,
            content,
            file_path,
            status: TaskStatus::Pending,
            current_stage: None,
            progress: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            priority: 0,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        };

        {
            let mut guard = self.tasks.lock().await;
            guard.insert(task_id.clone(), task.clone());
        }
        self.store.upsert(task.clone()).await?;
        self.publish(&task);
        Ok(task_id)
    }

    /// Returns the `Pending` task with the lowest priority number, ties
    /// broken by earliest `createdAt`.
    pub async fn next_pending(&self) -> Option<Task> {
        let guard = self.tasks.lock().await;
        guard
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.created_at.cmp(&b.created_at))
            })
            .cloned()
    }

    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let (task, removed) = {
            let mut guard = self.tasks.lock().await;
            let Some(task) = guard.get_mut(task_id) else {
                return Err(AppError::NotFound(task_id.to_string()));
            };
            task.status = status;
            task.error_message = error_message;
            if status == TaskStatus::Processing && task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
            let removed = task.is_finished();
            if removed {
                task.completed_at = Some(Utc::now());
            }
            let snapshot = task.clone();
            if removed {
                guard.remove(task_id);
            }
            (snapshot, removed)
        };

        if removed {
            self.store.remove(task_id).await?;
        } else {
            self.store.upsert(task.clone()).await?;
        }
        self.publish(&task);
        Ok(())
    }

    /// `progress` of `None` advances only `currentStage`, for stages without
    /// a countable unit. Ignored for already-finished tasks.
    pub async fn update_progress(
        &self,
        task_id: &str,
        stage: Option<ProcessingStage>,
        progress: Option<u8>,
    ) -> Result<(), AppError> {
        let task = {
            let mut guard = self.tasks.lock().await;
            let Some(task) = guard.get_mut(task_id) else {
                return Ok(());
            };
            if task.is_finished() {
                return Ok(());
            }
            if let Some(stage) = stage {
                task.current_stage = Some(stage);
            }
            if let Some(progress) = progress {
                task.progress = Some(progress.min(100));
            }
            task.clone()
        };

        self.store.upsert(task.clone()).await?;
        self.publish(&task);
        Ok(())
    }

    pub async fn reorder(&self, task_id: &str, new_priority: i64) -> Result<(), AppError> {
        let task = {
            let mut guard = self.tasks.lock().await;
            let Some(task) = guard.get_mut(task_id) else {
                return Err(AppError::NotFound(task_id.to_string()));
            };
            task.priority = new_priority;
            task.clone()
        };
        self.store.upsert(task.clone()).await?;
        self.publish(&task);
        Ok(())
    }

    pub async fn delete(&self, task_id: &str) -> Result<(), AppError> {
        {
            let mut guard = self.tasks.lock().await;
            match guard.get(task_id) {
                Some(task) if task.status == TaskStatus::Processing => {
                    return Err(AppError::Validation(
                        "cannot delete a task while it is processing".to_string(),
                    ));
                }
                Some(_) => {
                    guard.remove(task_id);
                }
                None => return Err(AppError::NotFound(task_id.to_string())),
            }
        }
        self.store.remove(task_id).await
    }

    pub async fn retry(&self, task_id: &str) -> Result<(), AppError> {
        let task = {
            let mut guard = self.tasks.lock().await;
            match guard.get(task_id) {
                Some(task) if task.status == TaskStatus::Failed => {}
                Some(_) => {
                    return Err(AppError::Validation(
                        "retry is only valid for failed tasks".to_string(),
                    ))
                }
                None => {
                    // Failed tasks are removed from memory on completion; load
                    // them back from the store to allow a late retry request.
                    let Some(stored) = self.store.get(task_id).await else {
                        return Err(AppError::NotFound(task_id.to_string()));
                    };
                    if stored.status != TaskStatus::Failed {
                        return Err(AppError::Validation(
                            "retry is only valid for failed tasks".to_string(),
                        ));
                    }
                    guard.insert(task_id.to_string(), stored);
                }
            }

            let task = guard.get_mut(task_id).expect("checked above");
            if task.retry_count >= task.max_retries {
                return Err(AppError::Validation(format!(
                    "task {task_id} has exhausted its {} retries",
                    task.max_retries
                )));
            }
            task.retry_count += 1;
            task.status = TaskStatus::Pending;
            task.error_message = None;
            task.started_at = None;
            task.completed_at = None;
            task.progress = None;
            task.current_stage = None;
            task.clone()
        };

        self.store.upsert(task.clone()).await?;
        self.publish(&task);
        Ok(())
    }

    /// Marks every `Pending`/`Processing` task `Failed` with message
    /// "stopped", returning the count affected.
    pub async fn stop_all(&self) -> Result<usize, AppError> {
        let stopped: Vec<Task> = {
            let mut guard = self.tasks.lock().await;
            let ids: Vec<String> = guard
                .values()
                .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Processing))
                .map(|t| t.task_id.clone())
                .collect();
            let mut stopped = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(task) = guard.get_mut(id) {
                    task.status = TaskStatus::Failed;
                    task.error_message = Some("stopped".to_string());
                    task.completed_at = Some(Utc::now());
                    stopped.push(task.clone());
                }
            }
            for id in &ids {
                guard.remove(id);
            }
            stopped
        };

        for task in &stopped {
            self.store.remove(&task.task_id).await?;
            self.publish(task);
        }
        Ok(stopped.len())
    }

    pub async fn has_processing(&self) -> bool {
        self.tasks
            .lock()
            .await
            .values()
            .any(|t| t.status == TaskStatus::Processing)
    }

    pub async fn get_by_document_ids(&self, document_ids: &[String]) -> Vec<Task> {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|t| document_ids.contains(&t.document_id))
            .cloned()
            .collect()
    }

    pub async fn clear_all(&self) -> Result<(), AppError> {
        {
            let mut guard = self.tasks.lock().await;
            guard.clear();
        }
        self.store.clear().await
    }

    /// Resets every task left `Processing` (interpreted as crashed mid-run)
    /// back to `Pending`. Called once by the processor on startup.
    pub async fn reset_processing_to_pending(&self) -> Result<usize, AppError> {
        let reset: Vec<Task> = {
            let mut guard = self.tasks.lock().await;
            let mut reset = Vec::new();
            for task in guard.values_mut() {
                if task.status == TaskStatus::Processing {
                    task.status = TaskStatus::Pending;
                    task.started_at = None;
                    reset.push(task.clone());
                }
            }
            reset
        };

        for task in &reset {
            self.store.upsert(task.clone()).await?;
            self.publish(task);
        }
        Ok(reset.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn new_queue() -> TaskQueue {
        let dir = tempdir().unwrap();
        let store = Arc::new(TaskStateStore::open(dir.path()).await.unwrap());
        // Leak the tempdir so the directory stays alive for the test.
        std::mem::forget(dir);
        TaskQueue::open(store).await.unwrap()
    }

    #[tokio::test]
    async fn next_pending_orders_by_priority_then_age() {
        let queue = new_queue().await;
        let id_a = queue
            .enqueue("1".into(), "alpha".into(), "a.txt".into())
            .await
            .unwrap();
        let id_b = queue
            .enqueue("2".into(), "beta".into(), "b.txt".into())
            .await
            .unwrap();
        queue.reorder(&id_b, -5).await.unwrap();

        let next = queue.next_pending().await.unwrap();
        assert_eq!(next.task_id, id_b);
        let _ = id_a;
    }

    #[tokio::test]
    async fn completed_task_is_removed_from_memory_and_store() {
        let queue = new_queue().await;
        let id = queue
            .enqueue("1".into(), "alpha".into(), "a.txt".into())
            .await
            .unwrap();
        queue.update_status(&id, TaskStatus::Processing, None).await.unwrap();
        queue.update_status(&id, TaskStatus::Completed, None).await.unwrap();

        assert!(queue.next_pending().await.is_none());
        assert_eq!(queue.get_by_document_ids(&["1".to_string()]).await.len(), 0);
    }

    #[tokio::test]
    async fn delete_fails_while_processing() {
        let queue = new_queue().await;
        let id = queue
            .enqueue("1".into(), "alpha".into(), "a.txt".into())
            .await
            .unwrap();
        queue.update_status(&id, TaskStatus::Processing, None).await.unwrap();
        assert!(queue.delete(&id).await.is_err());
    }

    #[tokio::test]
    async fn retry_requires_failed_status_and_respects_max_retries() {
        let queue = new_queue().await;
        let id = queue
            .enqueue("1".into(), "alpha".into(), "a.txt".into())
            .await
            .unwrap();
        queue.update_status(&id, TaskStatus::Processing, None).await.unwrap();
        queue
            .update_status(&id, TaskStatus::Failed, Some("boom".into()))
            .await
            .unwrap();

        queue.retry(&id).await.unwrap();
        let pending = queue.next_pending().await.unwrap();
        assert_eq!(pending.task_id, id);
        assert_eq!(pending.retry_count, 1);
        assert!(pending.error_message.is_none());
    }

    #[tokio::test]
    async fn stop_all_fails_pending_and_processing_tasks_and_removes_them() {
        let queue = new_queue().await;
        let pending = queue.enqueue("1".into(), "alpha".into(), "a.txt".into()).await.unwrap();
        let processing = queue.enqueue("2".into(), "beta".into(), "b.txt".into()).await.unwrap();
        queue.update_status(&processing, TaskStatus::Processing, None).await.unwrap();

        let stopped = queue.stop_all().await.unwrap();
        assert_eq!(stopped, 2);
        assert!(queue.next_pending().await.is_none());
        assert!(!queue.has_processing().await);
        assert_eq!(queue.get_by_document_ids(&["1".to_string(), "2".to_string()]).await.len(), 0);
        let _ = pending;
    }

    #[tokio::test]
    async fn clear_all_empties_the_queue_and_the_backing_store() {
        let queue = new_queue().await;
        queue.enqueue("1".into(), "alpha".into(), "a.txt".into()).await.unwrap();
        queue.enqueue("2".into(), "beta".into(), "b.txt".into()).await.unwrap();

        queue.clear_all().await.unwrap();

        assert!(queue.next_pending().await.is_none());
        assert_eq!(queue.get_by_document_ids(&["1".to_string(), "2".to_string()]).await.len(), 0);
    }

    #[tokio::test]
    async fn restart_resets_processing_tasks_and_preserves_order() {
        let dir = tempdir().unwrap();
        let store = Arc::new(TaskStateStore::open(dir.path()).await.unwrap());
        let queue = TaskQueue::open(Arc::clone(&store)).await.unwrap();

        let id1 = queue.enqueue("1".into(), "doc one".into(), "a.txt".into()).await.unwrap();
        let id2 = queue.enqueue("2".into(), "doc two".into(), "b.txt".into()).await.unwrap();
        let id3 = queue.enqueue("3".into(), "doc three".into(), "c.txt".into()).await.unwrap();

        queue.update_status(&id1, TaskStatus::Processing, None).await.unwrap();
        queue.update_status(&id1, TaskStatus::Completed, None).await.unwrap();
        queue.update_status(&id2, TaskStatus::Processing, None).await.unwrap();
        // Simulate a crash: the process exits with task 2 stuck `Processing`
        // and task 3 still `Pending`. Reopen against the same directory.
        drop(queue);

        let reopened_store = Arc::new(TaskStateStore::open(dir.path()).await.unwrap());
        let reopened = TaskQueue::open(reopened_store).await.unwrap();
        let reset = reopened.reset_processing_to_pending().await.unwrap();
        assert_eq!(reset, 1);

        let next = reopened.next_pending().await.unwrap();
        assert_eq!(next.task_id, id2);
        reopened.update_status(&id2, TaskStatus::Processing, None).await.unwrap();
        reopened.update_status(&id2, TaskStatus::Completed, None).await.unwrap();

        let next = reopened.next_pending().await.unwrap();
        assert_eq!(next.task_id, id3);

        std::mem::forget(dir);
    }
}
