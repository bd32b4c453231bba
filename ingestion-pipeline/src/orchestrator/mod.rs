//! Composes the chunker, chunk processor, and merge engine into the single
//! `IngestionOrchestrator::insert` operation the task processor drives.

mod context;
mod state;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use state_machines::core::GuardError;

use common::cancellation::TaskCancellation;
use common::collaborators::vector_store::{collection_name, VectorRecord};
use common::collaborators::{EmbeddingClient, GraphStore, LlmClient, VectorStore};
use common::domain::{
    ChunkIdIndexEntry, ChunkResult, EntityReferenceIndexEntry, FullDocumentRecord,
    ProcessingStage, RelationReferenceIndexEntry, StoredTextChunk, TaskState,
};
use common::error::AppError;
use common::ids;
use common::kv::KvStore;
use common::orchestrator::IngestionOrchestrator;
use common::progress::ProgressBus;

use crate::chunk_processor::{ChunkProcessor, ChunkProcessorConfig};
use crate::chunker::{self, ChunkerConfig};
use crate::merge::{DescriptionMergeConfig, EntityMergeConfig, EntityMerger, IndexUpdater, RelationMergeConfig, RelationMerger};

use self::context::OrchestratorContext;
use self::state::{ready, Chunked, Merged, Persisted, Processed, Ready};

const CHUNK_VECTOR_COLLECTION_BASE: &str = "chunks";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub chunker: ChunkerConfig,
    pub chunk_processing_concurrency: usize,
}

/// Every collaborator and KV index the orchestrator needs to drive one
/// document through the pipeline end to end.
pub struct OrchestratorDeps {
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub graph: Arc<dyn GraphStore>,
    pub vector: Arc<dyn VectorStore>,

    pub text_chunks: Arc<dyn KvStore<StoredTextChunk>>,
    pub full_docs: Arc<dyn KvStore<FullDocumentRecord>>,
    pub llm_cache: Arc<dyn KvStore<ChunkResult>>,
    pub entity_chunks: Arc<dyn KvStore<ChunkIdIndexEntry>>,
    pub relation_chunks: Arc<dyn KvStore<ChunkIdIndexEntry>>,
    pub full_entities: Arc<dyn KvStore<EntityReferenceIndexEntry>>,
    pub full_relations: Arc<dyn KvStore<RelationReferenceIndexEntry>>,

    pub entity_types: Vec<String>,
    pub config: OrchestratorConfig,
    pub chunk_processor_config: ChunkProcessorConfig,
    pub entity_merge_config: EntityMergeConfig,
    pub relation_merge_config: RelationMergeConfig,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self { deps }
    }

    fn chunk_processor(&self) -> ChunkProcessor {
        ChunkProcessor::new(
            Arc::clone(&self.deps.llm),
            Arc::clone(&self.deps.embedder),
            Arc::clone(&self.deps.llm_cache),
            self.deps.entity_types.clone(),
            self.deps.chunk_processor_config,
        )
    }

    fn entity_merger(&self) -> EntityMerger {
        EntityMerger::new(
            Arc::clone(&self.deps.graph),
            Arc::clone(&self.deps.vector),
            Arc::clone(&self.deps.embedder),
            Arc::clone(&self.deps.llm),
            Arc::clone(&self.deps.entity_chunks),
            self.deps.entity_merge_config.clone(),
        )
    }

    fn relation_merger(&self) -> RelationMerger {
        RelationMerger::new(
            Arc::clone(&self.deps.graph),
            Arc::clone(&self.deps.vector),
            Arc::clone(&self.deps.embedder),
            Arc::clone(&self.deps.llm),
            Arc::clone(&self.deps.relation_chunks),
            self.deps.relation_merge_config.clone(),
        )
    }

    fn index_updater(&self) -> IndexUpdater {
        IndexUpdater::new(
            Arc::clone(&self.deps.full_entities),
            Arc::clone(&self.deps.full_relations),
        )
    }
}

#[async_trait]
impl IngestionOrchestrator for Orchestrator {
    #[tracing::instrument(skip_all, fields(file_path = %file_path))]
    async fn insert(
        &self,
        content: String,
        file_path: String,
        progress: Arc<ProgressBus>,
        cancellation: TaskCancellation,
    ) -> Result<String, AppError> {
        let doc_id = ids::doc_id(&content);

        if self.deps.full_docs.get_by_id(&doc_id).await?.is_some() {
            tracing::debug!(doc_id = %doc_id, "document already ingested; skipping");
            return Ok(doc_id);
        }

        let mut ctx = OrchestratorContext::new(&self.deps, doc_id.clone(), file_path, content, progress, cancellation);

        let pipeline_started = std::time::Instant::now();

        let machine = ready();
        let stage_start = std::time::Instant::now();
        let machine = match chunk_stage(self, machine, &mut ctx).await {
            Ok(m) => m,
            Err(err) => return Err(ctx.abort(err)),
        };
        let chunk_ms = stage_start.elapsed().as_millis();

        let stage_start = std::time::Instant::now();
        let machine = match process_stage(self, machine, &mut ctx).await {
            Ok(m) => m,
            Err(err) => return Err(ctx.abort(err)),
        };
        let process_ms = stage_start.elapsed().as_millis();

        let stage_start = std::time::Instant::now();
        let machine = match merge_stage(self, machine, &mut ctx).await {
            Ok(m) => m,
            Err(err) => return Err(ctx.abort(err)),
        };
        let merge_ms = stage_start.elapsed().as_millis();

        let stage_start = std::time::Instant::now();
        let _machine = match persist_stage(self, machine, &mut ctx).await {
            Ok(m) => m,
            Err(err) => return Err(ctx.abort(err)),
        };
        let persist_ms = stage_start.elapsed().as_millis();

        ctx.progress.publish(TaskState::marker(ProcessingStage::Completed, "ingestion complete"));
        tracing::info!(
            doc_id = %doc_id,
            total_ms = pipeline_started.elapsed().as_millis(),
            chunk_ms,
            process_ms,
            merge_ms,
            persist_ms,
            "ingestion finished"
        );
        Ok(doc_id)
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!("invalid ingestion orchestrator transition during {event}: {guard:?}"))
}

#[tracing::instrument(level = "trace", skip_all, fields(doc_id = %ctx.doc_id))]
async fn chunk_stage(
    orchestrator: &Orchestrator,
    machine: state::IngestionMachine<(), Ready>,
    ctx: &mut OrchestratorContext<'_>,
) -> Result<state::IngestionMachine<(), Chunked>, AppError> {
    ctx.check_cancelled()?;
    ctx.progress
        .publish(TaskState::marker(ProcessingStage::DocumentChunking, "splitting document into chunks"));

    let chunks = chunker::chunk(&ctx.content, &ctx.doc_id, &ctx.file_path, orchestrator.deps.config.chunker, None, false)?;

    let rows: HashMap<String, StoredTextChunk> = chunks
        .iter()
        .map(|c| {
            (
                c.id.clone(),
                StoredTextChunk {
                    content: c.content.clone(),
                    tokens: c.token_count,
                    chunk_order_index: c.order_index,
                    full_doc_id: ctx.doc_id.clone(),
                    file_path: c.file_path.clone(),
                },
            )
        })
        .collect();
    ctx.progress
        .publish(TaskState::marker(ProcessingStage::StoringTextChunks, "persisting chunk text"));
    orchestrator.deps.text_chunks.upsert(rows).await?;

    ctx.chunks = Some(chunks);

    machine.chunk().map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[tracing::instrument(level = "trace", skip_all, fields(doc_id = %ctx.doc_id))]
async fn process_stage(
    orchestrator: &Orchestrator,
    machine: state::IngestionMachine<(), Chunked>,
    ctx: &mut OrchestratorContext<'_>,
) -> Result<state::IngestionMachine<(), Processed>, AppError> {
    ctx.check_cancelled()?;
    let chunks = ctx.take_chunks()?;
    let total = chunks.len();

    let processor = orchestrator.chunk_processor();
    let concurrency = orchestrator.deps.config.chunk_processing_concurrency.max(1);

    let progress = Arc::clone(&ctx.progress);
    let doc_id = ctx.doc_id.clone();
    let cancellation = ctx.cancellation.clone();

    // A chunk that fails embedding/extraction is logged and skipped rather
    // than aborting the whole document (spec's `ChunkProcessingError`
    // disposition); any other error (cancellation, store failure) aborts.
    let outcomes: Vec<Option<(usize, ChunkResult)>> = stream::iter(chunks.iter().enumerate())
        .map(|(index, chunk)| {
            let processor = &processor;
            let progress = Arc::clone(&progress);
            let doc_id = doc_id.clone();
            let cancellation = cancellation.clone();
            async move {
                if cancellation.is_cancelled() {
                    return Err(AppError::Cancelled);
                }
                match processor.process(chunk).await {
                    Ok(result) => {
                        progress.publish(TaskState {
                            stage: ProcessingStage::ProcessingChunks,
                            current: index + 1,
                            total,
                            description: format!("processed chunk {}/{total}", index + 1),
                            details: None,
                            doc_id: Some(doc_id),
                        });
                        Ok(Some((index, result)))
                    }
                    Err(err @ AppError::ChunkProcessingError { .. }) => {
                        tracing::warn!(chunk_id = %chunk.id, error = %err, "skipping chunk after processing failure");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;

    let kept: Vec<(usize, ChunkResult)> = outcomes.into_iter().flatten().collect();

    ctx.progress
        .publish(TaskState::marker(ProcessingStage::StoringChunkVectors, "persisting chunk vectors"));
    if !kept.is_empty() {
        let records: Vec<VectorRecord> = kept
            .iter()
            .map(|(index, result)| {
                let chunk = &chunks[*index];
                VectorRecord {
                    id: chunk.id.clone(),
                    vector: result.embedding.clone(),
                    content: chunk.content.clone(),
                    metadata: serde_json::json!({
                        "content": chunk.content,
                        "full_doc_id": ctx.doc_id,
                        "file_path": chunk.file_path,
                        "chunk_order_index": chunk.order_index,
                    }),
                }
            })
            .collect();
        orchestrator
            .deps
            .vector
            .upsert(
                &collection_name(CHUNK_VECTOR_COLLECTION_BASE, orchestrator.deps.embedder.dimensions()),
                records,
            )
            .await?;
    }

    ctx.chunk_results = Some(kept.into_iter().map(|(_, result)| result).collect());

    machine.process().map_err(|(_, guard)| map_guard_error("process", &guard))
}

#[tracing::instrument(level = "trace", skip_all, fields(doc_id = %ctx.doc_id))]
async fn merge_stage(
    orchestrator: &Orchestrator,
    machine: state::IngestionMachine<(), Processed>,
    ctx: &mut OrchestratorContext<'_>,
) -> Result<state::IngestionMachine<(), Merged>, AppError> {
    ctx.check_cancelled()?;
    let results = ctx.take_chunk_results()?;
    let (grouped_entities, grouped_relations) = OrchestratorContext::group_for_merge(&results);

    ctx.progress
        .publish(TaskState::countable(ProcessingStage::MergingEntities, 0, grouped_entities.len(), "merging entities"));
    let entity_names = orchestrator
        .entity_merger()
        .merge(grouped_entities, &ctx.progress, &ctx.doc_id)
        .await?;
    let entity_name_set = entity_names.iter().cloned().collect();

    ctx.progress
        .publish(TaskState::countable(ProcessingStage::MergingRelations, 0, grouped_relations.len(), "merging relations"));
    let relation_pairs = orchestrator
        .relation_merger()
        .merge(grouped_relations, &entity_name_set, &ctx.progress, &ctx.doc_id)
        .await?;

    ctx.entity_names = Some(entity_names);
    ctx.relation_pairs = Some(relation_pairs);

    machine.merge().map_err(|(_, guard)| map_guard_error("merge", &guard))
}

#[tracing::instrument(level = "trace", skip_all, fields(doc_id = %ctx.doc_id))]
async fn persist_stage(
    orchestrator: &Orchestrator,
    machine: state::IngestionMachine<(), Merged>,
    ctx: &mut OrchestratorContext<'_>,
) -> Result<state::IngestionMachine<(), Persisted>, AppError> {
    let entity_names = ctx.take_entity_names()?;
    let relation_pairs = ctx.take_relation_pairs()?;

    ctx.progress
        .publish(TaskState::marker(ProcessingStage::UpdatingStorage, "updating document reference indexes"));
    orchestrator
        .index_updater()
        .update(&ctx.doc_id, entity_names, relation_pairs)
        .await?;

    ctx.progress
        .publish(TaskState::marker(ProcessingStage::StoringFullDocument, "recording document as ingested"));
    orchestrator
        .deps
        .full_docs
        .upsert(HashMap::from([(
            ctx.doc_id.clone(),
            FullDocumentRecord {
                doc_id: ctx.doc_id.clone(),
                file_path: ctx.file_path.clone(),
                created_at: Utc::now(),
            },
        )]))
        .await?;

    ctx.progress
        .publish(TaskState::marker(ProcessingStage::Persisting, "flushing indexes to disk"));
    orchestrator.deps.text_chunks.index_done_callback().await?;
    orchestrator.deps.full_docs.index_done_callback().await?;
    orchestrator.deps.llm_cache.index_done_callback().await?;
    orchestrator.deps.entity_chunks.index_done_callback().await?;
    orchestrator.deps.relation_chunks.index_done_callback().await?;
    orchestrator.deps.full_entities.index_done_callback().await?;
    orchestrator.deps.full_relations.index_done_callback().await?;

    machine.persist().map_err(|(_, guard)| map_guard_error("persist", &guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::collaborators::memory::{InMemoryEmbeddingClient, InMemoryGraphStore, InMemoryLlmClient, InMemoryVectorStore};
    use common::collaborators::llm::ExtractionResult;
    use common::config::SourceIdsLimitMethod;
    use common::domain::Entity;
    use common::kv::JsonFileKvStore;
    use tempfile::tempdir;

    async fn build_orchestrator(
        llm: Arc<InMemoryLlmClient>,
    ) -> (Orchestrator, Arc<dyn GraphStore>, Arc<dyn KvStore<FullDocumentRecord>>) {
        let dir = tempdir().unwrap();
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let vector: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(InMemoryEmbeddingClient::new(8));

        let text_chunks = JsonFileKvStore::<StoredTextChunk>::open(dir.path(), "text_chunks").await.unwrap();
        let full_docs = JsonFileKvStore::<FullDocumentRecord>::open(dir.path(), "full_docs").await.unwrap();
        let llm_cache = JsonFileKvStore::<ChunkResult>::open(dir.path(), "llm_cache").await.unwrap();
        let entity_chunks = JsonFileKvStore::<ChunkIdIndexEntry>::open(dir.path(), "entity_chunks").await.unwrap();
        let relation_chunks = JsonFileKvStore::<ChunkIdIndexEntry>::open(dir.path(), "relation_chunks").await.unwrap();
        let full_entities = JsonFileKvStore::<EntityReferenceIndexEntry>::open(dir.path(), "full_entities").await.unwrap();
        let full_relations = JsonFileKvStore::<RelationReferenceIndexEntry>::open(dir.path(), "full_relations").await.unwrap();
        std::mem::forget(dir);

        let description = DescriptionMergeConfig {
            summary_context_size: 2000,
            summary_max_tokens: 500,
            force_llm_summary_on_merge: 4,
            summary_length_recommended: 200,
        };

        let deps = OrchestratorDeps {
            llm,
            embedder,
            graph: Arc::clone(&graph),
            vector,
            text_chunks,
            full_docs: Arc::clone(&full_docs),
            llm_cache,
            entity_chunks,
            relation_chunks,
            full_entities,
            full_relations,
            entity_types: vec!["CONCEPT".to_string()],
            config: OrchestratorConfig {
                chunker: ChunkerConfig {
                    chunk_token_size: 1200,
                    chunk_overlap_token_size: 100,
                },
                chunk_processing_concurrency: 4,
            },
            chunk_processor_config: ChunkProcessorConfig::default(),
            entity_merge_config: EntityMergeConfig {
                max_source_ids_per_entity: 20,
                max_file_paths: 10,
                method: SourceIdsLimitMethod::Fifo,
                description,
            },
            relation_merge_config: RelationMergeConfig {
                max_source_ids_per_relation: 20,
                max_file_paths: 10,
                method: SourceIdsLimitMethod::Fifo,
                description,
            },
        };

        (Orchestrator::new(deps), graph, full_docs)
    }

    #[tokio::test]
    async fn insert_creates_entity_nodes_and_persists_document() {
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
        let (orchestrator, graph, full_docs) = build_orchestrator(llm).await;
        let (bus, _rx) = ProgressBus::new(64);
        let bus = Arc::new(bus);
        let cancellation = common::cancellation::CancellationRoots::new().task_handle();

        let doc_id = orchestrator
            .insert("Alpha does things.".to_string(), "a.txt".to_string(), bus, cancellation)
            .await
            .unwrap();

        assert!(graph.has_node(&ids::entity_id("ALPHA")).await.unwrap());
        assert!(full_docs.get_by_id(&doc_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_insert_of_same_content_is_idempotent() {
        let llm = Arc::new(InMemoryLlmClient::new());
        let (orchestrator, _graph, _full_docs) = build_orchestrator(llm.clone()).await;
        let (bus, _rx) = ProgressBus::new(64);
        let bus = Arc::new(bus);
        let cancellation = common::cancellation::CancellationRoots::new().task_handle();

        let first = orchestrator
            .insert("Same content.".to_string(), "a.txt".to_string(), Arc::clone(&bus), cancellation.clone())
            .await
            .unwrap();
        let calls_after_first = llm.call_count.load(std::sync::atomic::Ordering::Relaxed);

        let second = orchestrator
            .insert("Same content.".to_string(), "a.txt".to_string(), bus, cancellation)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(llm.call_count.load(std::sync::atomic::Ordering::Relaxed), calls_after_first);
    }
}
