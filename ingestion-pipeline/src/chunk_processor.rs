//! For each chunk: embed it and extract entities/relations, memoising the
//! result by content-addressed chunk id in the `llm_cache` index so an
//! identical chunk seen in a later document never re-hits the LLM.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::collaborators::{EmbeddingClient, LlmClient};
use common::domain::{Chunk, ChunkResult};
use common::error::AppError;
use common::kv::KvStore;

#[derive(Debug, Clone, Copy)]
pub struct ChunkProcessorConfig {
    pub entity_extraction_temperature: f32,
    pub max_entities: Option<usize>,
    pub max_relationships: Option<usize>,
}

impl Default for ChunkProcessorConfig {
    fn default() -> Self {
        Self {
            entity_extraction_temperature: 0.3,
            max_entities: None,
            max_relationships: None,
        }
    }
}

pub struct ChunkProcessor {
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingClient>,
    cache: Arc<dyn KvStore<ChunkResult>>,
    entity_types: Vec<String>,
    config: ChunkProcessorConfig,
}

impl ChunkProcessor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingClient>,
        cache: Arc<dyn KvStore<ChunkResult>>,
        entity_types: Vec<String>,
        config: ChunkProcessorConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            cache,
            entity_types,
            config,
        }
    }

    /// Processes a single chunk, returning entities/relations stamped with
    /// this chunk's `sourceId`/`filePath`/current timestamp. A cache hit
    /// re-stamps the cached (content-keyed, document-independent) result
    /// rather than recomputing it.
    #[tracing::instrument(skip_all, fields(chunk_id = %chunk.id))]
    pub async fn process(&self, chunk: &Chunk) -> Result<ChunkResult, AppError> {
        if let Some(cached) = self.cache.get_by_id(&chunk.id).await? {
            tracing::debug!(chunk_id = %chunk.id, "llm cache hit");
            return Ok(restamp(cached, chunk));
        }

        tracing::debug!(chunk_id = %chunk.id, "llm cache miss; embedding and extracting");
        let result = self.embed_and_extract(chunk).await.map_err(|source| {
            AppError::ChunkProcessingError {
                chunk_id: chunk.id.clone(),
                source: Box::new(source),
            }
        })?;

        // Cache the content-keyed form (sourceId/filePath/timestamp stripped
        // conceptually by always re-stamping on read) before returning, so
        // a crash right after this call still finds the work done.
        self.cache
            .upsert(HashMap::from([(chunk.id.clone(), result.clone())]))
            .await?;
        self.cache.index_done_callback().await?;

        Ok(result)
    }

    async fn embed_and_extract(&self, chunk: &Chunk) -> Result<ChunkResult, AppError> {
        let (embedding, extraction) = tokio::try_join!(
            self.embedder.embed(&chunk.content),
            self.llm.extract_entities_and_relations(
                &chunk.content,
                &self.entity_types,
                self.config.entity_extraction_temperature,
                self.config.max_entities,
                self.config.max_relationships,
            )
        )?;

        let now = Utc::now().timestamp();
        let entities = extraction
            .entities
            .into_iter()
            .map(|mut e| {
                e.source_id = chunk.id.clone();
                e.file_path = chunk.file_path.clone();
                e.timestamp = now;
                e
            })
            .collect();
        let relations = extraction
            .relations
            .into_iter()
            .filter(|r| !r.is_self_loop())
            .map(|mut r| {
                r.source_chunk_id = chunk.id.clone();
                r.file_path = chunk.file_path.clone();
                r.timestamp = now;
                r
            })
            .collect();

        Ok(ChunkResult {
            chunk_id: chunk.id.clone(),
            embedding,
            entities,
            relations,
        })
    }
}

fn restamp(cached: ChunkResult, chunk: &Chunk) -> ChunkResult {
    let now = Utc::now().timestamp();
    let entities = cached
        .entities
        .into_iter()
        .map(|mut e| {
            e.source_id = chunk.id.clone();
            e.file_path = chunk.file_path.clone();
            e.timestamp = now;
            e
        })
        .collect();
    let relations = cached
        .relations
        .into_iter()
        .map(|mut r| {
            r.source_chunk_id = chunk.id.clone();
            r.file_path = chunk.file_path.clone();
            r.timestamp = now;
            r
        })
        .collect();
    ChunkResult {
        chunk_id: chunk.id.clone(),
        embedding: cached.embedding,
        entities,
        relations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::collaborators::llm::ExtractionResult;
    use common::collaborators::memory::{InMemoryEmbeddingClient, InMemoryLlmClient};
    use common::domain::Entity;
    use common::kv::JsonFileKvStore;
    use tempfile::tempdir;

    fn sample_chunk(id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: "ALPHA introduces BETA.".to_string(),
            token_count: 5,
            order_index: 0,
            doc_id: "doc-1".to_string(),
            file_path: "a.txt".to_string(),
        }
    }

    async fn cache() -> Arc<dyn KvStore<ChunkResult>> {
        let dir = tempdir().unwrap();
        let store = JsonFileKvStore::<ChunkResult>::open(dir.path(), "llm_cache")
            .await
            .unwrap();
        std::mem::forget(dir);
        store
    }

    #[tokio::test]
    async fn second_call_with_same_content_hits_cache_and_skips_llm() {
        let llm = Arc::new(InMemoryLlmClient::new().with_extraction_result(ExtractionResult {
            entities: vec![Entity {
                name: "ALPHA".to_string(),
                entity_type: "CONCEPT".to_string(),
                description: "a concept".to_string(),
                source_id: String::new(),
                file_path: String::new(),
                timestamp: 0,
            }],
            relations: vec![],
        }));
        let embedder = Arc::new(InMemoryEmbeddingClient::new(4));
        let cache = cache().await;
        let processor = ChunkProcessor::new(
            llm.clone(),
            embedder,
            cache,
            vec!["CONCEPT".to_string()],
            ChunkProcessorConfig::default(),
        );

        let chunk_a = sample_chunk("chunk-a");
        let first = processor.process(&chunk_a).await.unwrap();
        assert_eq!(first.entities.len(), 1);
        assert_eq!(first.entities[0].source_id, "chunk-a");

        let chunk_b = sample_chunk("chunk-a"); // identical content, re-stamped
        let second = processor.process(&chunk_b).await.unwrap();
        assert_eq!(second.entities[0].name, first.entities[0].name);

        // extract_entities_and_relations called exactly once across both calls.
        assert_eq!(
            llm.call_count.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn fresh_processor_instance_hits_cache_after_flush() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(InMemoryLlmClient::new());
        let embedder = Arc::new(InMemoryEmbeddingClient::new(4));
        let cache1 = JsonFileKvStore::<ChunkResult>::open(dir.path(), "llm_cache")
            .await
            .unwrap();
        let processor1 = ChunkProcessor::new(
            llm.clone(),
            embedder.clone(),
            cache1,
            vec![],
            ChunkProcessorConfig::default(),
        );
        let chunk = sample_chunk("chunk-a");
        processor1.process(&chunk).await.unwrap();

        let cache2 = JsonFileKvStore::<ChunkResult>::open(dir.path(), "llm_cache")
            .await
            .unwrap();
        let processor2 =
            ChunkProcessor::new(llm.clone(), embedder, cache2, vec![], ChunkProcessorConfig::default());
        processor2.process(&chunk).await.unwrap();

        assert_eq!(
            llm.call_count.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn self_loop_relations_are_dropped_on_extraction() {
        let llm = Arc::new(
            InMemoryLlmClient::new().with_extraction_result(ExtractionResult {
                entities: vec![],
                relations: vec![common::domain::Relation {
                    source_name: "ALPHA".to_string(),
                    target_name: "ALPHA".to_string(),
                    keywords: vec![],
                    description: "loop".to_string(),
                    weight: 1.0,
                    source_chunk_id: String::new(),
                    file_path: String::new(),
                    timestamp: 0,
                }],
            }),
        );
        let embedder = Arc::new(InMemoryEmbeddingClient::new(4));
        let processor =
            ChunkProcessor::new(llm, embedder, cache().await, vec![], ChunkProcessorConfig::default());
        let result = processor.process(&sample_chunk("chunk-a")).await.unwrap();
        assert!(result.relations.is_empty());
    }
}
