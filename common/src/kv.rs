//! One `KvStore<V>` instance per named index (`text_chunks`, `full_docs`,
//! `full_entities`, `full_relations`, `entity_chunks`, `relation_chunks`,
//! `llm_cache`), each backed by its own JSON file and its own mutex so
//! readers never block behind an unrelated index's writer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;

use crate::atomic_file::{read_json_tolerant, write_json_atomic};
use crate::error::AppError;

#[async_trait]
pub trait KvStore<V>: Send + Sync
where
    V: Clone + Send + Sync,
{
    async fn get_by_id(&self, key: &str) -> Result<Option<V>, AppError>;
    async fn get_by_ids(&self, keys: &[String]) -> Result<HashMap<String, V>, AppError>;
    /// Returns the subset of `keys` that are absent from the store.
    async fn filter_keys(&self, keys: &[String]) -> Result<Vec<String>, AppError>;
    async fn upsert(&self, entries: HashMap<String, V>) -> Result<(), AppError>;
    async fn delete(&self, keys: &[String]) -> Result<(), AppError>;
    async fn is_empty(&self) -> Result<bool, AppError>;
    /// Flushes durable state. A no-op for this implementation since every
    /// `upsert`/`delete` is already write-through, matching the ingestion
    /// pipeline's requirement that a chunk-cache write survive a crash
    /// immediately after `process()` returns.
    async fn index_done_callback(&self) -> Result<(), AppError>;
    async fn drop_all(&self) -> Result<(), AppError>;
}

/// JSON-file-backed `KvStore`. The whole index is held in memory behind a
/// `RwLock` (concurrent readers, exclusive writer) and mirrored to disk with
/// every mutation via the atomic tmp-then-rename protocol.
pub struct JsonFileKvStore<V> {
    path: PathBuf,
    cache: RwLock<HashMap<String, V>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl<V> JsonFileKvStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn open(working_dir: impl AsRef<Path>, index_name: &str) -> Result<Arc<Self>, AppError> {
        let path = working_dir.as_ref().join(format!("{index_name}.json"));
        let loaded: HashMap<String, V> = read_json_tolerant(&path, HashMap::new).await?;
        Ok(Arc::new(Self {
            path,
            cache: RwLock::new(loaded),
            write_lock: tokio::sync::Mutex::new(()),
        }))
    }

    async fn persist(&self) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.cache.read().await.clone();
        write_json_atomic(&self.path, &snapshot).await
    }
}

#[async_trait]
impl<V> KvStore<V> for JsonFileKvStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get_by_id(&self, key: &str) -> Result<Option<V>, AppError> {
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn get_by_ids(&self, keys: &[String]) -> Result<HashMap<String, V>, AppError> {
        let cache = self.cache.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| cache.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn filter_keys(&self, keys: &[String]) -> Result<Vec<String>, AppError> {
        let cache = self.cache.read().await;
        Ok(keys
            .iter()
            .filter(|k| !cache.contains_key(k.as_str()))
            .cloned()
            .collect())
    }

    async fn upsert(&self, entries: HashMap<String, V>) -> Result<(), AppError> {
        {
            let mut cache = self.cache.write().await;
            cache.extend(entries);
        }
        self.persist().await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), AppError> {
        {
            let mut cache = self.cache.write().await;
            for key in keys {
                cache.remove(key);
            }
        }
        self.persist().await
    }

    async fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.cache.read().await.is_empty())
    }

    async fn index_done_callback(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn drop_all(&self) -> Result<(), AppError> {
        {
            let mut cache = self.cache.write().await;
            cache.clear();
        }
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upsert_persists_and_reopen_sees_it() {
        let dir = tempdir().unwrap();
        let store = JsonFileKvStore::<String>::open(dir.path(), "text_chunks")
            .await
            .unwrap();
        store
            .upsert(HashMap::from([("a".to_string(), "hello".to_string())]))
            .await
            .unwrap();

        let reopened = JsonFileKvStore::<String>::open(dir.path(), "text_chunks")
            .await
            .unwrap();
        assert_eq!(
            reopened.get_by_id("a").await.unwrap(),
            Some("hello".to_string())
        );
    }

    #[tokio::test]
    async fn filter_keys_returns_only_absent() {
        let dir = tempdir().unwrap();
        let store = JsonFileKvStore::<String>::open(dir.path(), "llm_cache")
            .await
            .unwrap();
        store
            .upsert(HashMap::from([("present".to_string(), "v".to_string())]))
            .await
            .unwrap();

        let absent = store
            .filter_keys(&["present".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(absent, vec!["missing".to_string()]);
    }

    #[tokio::test]
    async fn drop_all_clears_memory_and_disk() {
        let dir = tempdir().unwrap();
        let store = JsonFileKvStore::<String>::open(dir.path(), "full_docs")
            .await
            .unwrap();
        store
            .upsert(HashMap::from([("a".to_string(), "v".to_string())]))
            .await
            .unwrap();
        store.drop_all().await.unwrap();
        assert!(store.is_empty().await.unwrap());

        let reopened = JsonFileKvStore::<String>::open(dir.path(), "full_docs")
            .await
            .unwrap();
        assert!(reopened.is_empty().await.unwrap());
    }
}
