use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use common::domain::Task;
use common::error::AppError;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TasksFile {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default = "Utc::now")]
    last_updated: DateTime<Utc>,
    #[serde(default)]
    tasks: Vec<Task>,
}

fn default_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl Default for TasksFile {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            last_updated: Utc::now(),
            tasks: Vec::new(),
        }
    }
}

/// Durable, file-backed store of queued tasks at `{working_dir}/tasks.json`.
/// Mirrors the file contents in an in-memory cache keyed by `taskId`; every
/// write goes through the atomic tmp-then-rename protocol and is serialised
/// by a single per-file mutex.
pub struct TaskStateStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, Task>>,
    write_lock: Mutex<()>,
}

impl TaskStateStore {
    pub async fn open(working_dir: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = working_dir.as_ref().join("tasks.json");
        let file: TasksFile =
            common::atomic_file::read_json_tolerant(&path, TasksFile::default).await?;
        let cache = file.tasks.into_iter().map(|t| (t.task_id.clone(), t)).collect();
        Ok(Self {
            path,
            cache: RwLock::new(cache),
            write_lock: Mutex::new(()),
        })
    }

    pub async fn load_all(&self) -> Vec<Task> {
        self.cache.read().await.values().cloned().collect()
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.cache.read().await.get(task_id).cloned()
    }

    pub async fn upsert(&self, task: Task) -> Result<(), AppError> {
        {
            let mut cache = self.cache.write().await;
            cache.insert(task.task_id.clone(), task);
        }
        self.persist().await
    }

    pub async fn remove(&self, task_id: &str) -> Result<(), AppError> {
        {
            let mut cache = self.cache.write().await;
            cache.remove(task_id);
        }
        self.persist().await
    }

    pub async fn replace_all(&self, tasks: Vec<Task>) -> Result<(), AppError> {
        {
            let mut cache = self.cache.write().await;
            *cache = tasks.into_iter().map(|t| (t.task_id.clone(), t)).collect();
        }
        self.persist().await
    }

    pub async fn clear(&self) -> Result<(), AppError> {
        self.replace_all(Vec::new()).await
    }

    async fn persist(&self) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let tasks: Vec<Task> = self.cache.read().await.values().cloned().collect();
        let file = TasksFile {
            version: SCHEMA_VERSION.to_string(),
            last_updated: Utc::now(),
            tasks,
        };
        common::atomic_file::write_json_atomic(&self.path, &file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::TaskStatus;
    use tempfile::tempdir;

    fn sample_task(id: &str) -> Task {
        Task {
            task_id: id.to_string(),
            document_id: "1".to_string(),
            rag_document_id: "doc-abc".to_string(),
            content: "hello".to_string(),
            file_path: "a.txt".to_string(),
            status: TaskStatus::Pending,
            current_stage: None,
            progress: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            priority: 0,
            retry_count: 0,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn upsert_persists_and_reopen_sees_it() {
        let dir = tempdir().unwrap();
        let store = TaskStateStore::open(dir.path()).await.unwrap();
        store.upsert(sample_task("task-1")).await.unwrap();

        let reopened = TaskStateStore::open(dir.path()).await.unwrap();
        assert!(reopened.get("task-1").await.is_some());
    }

    #[tokio::test]
    async fn remove_drops_from_memory_and_file() {
        let dir = tempdir().unwrap();
        let store = TaskStateStore::open(dir.path()).await.unwrap();
        store.upsert(sample_task("task-1")).await.unwrap();
        store.remove("task-1").await.unwrap();
        assert!(store.get("task-1").await.is_none());

        let reopened = TaskStateStore::open(dir.path()).await.unwrap();
        assert!(reopened.get("task-1").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty_without_error() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("tasks.json"), b"not json")
            .await
            .unwrap();
        let store = TaskStateStore::open(dir.path()).await.unwrap();
        assert!(store.load_all().await.is_empty());
    }
}
