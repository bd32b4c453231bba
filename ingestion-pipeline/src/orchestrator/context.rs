use std::collections::HashMap;
use std::sync::Arc;

use common::cancellation::TaskCancellation;
use common::domain::{Chunk, ChunkResult, Entity, Relation};
use common::error::AppError;
use common::progress::ProgressBus;

use super::OrchestratorDeps;

/// Mutable working state threaded through one `insert` call, mirroring the
/// way a single pipeline context accumulates each stage's output for the
/// next.
pub struct OrchestratorContext<'a> {
    pub deps: &'a OrchestratorDeps,
    pub doc_id: String,
    pub file_path: String,
    pub content: String,
    pub progress: Arc<ProgressBus>,
    pub cancellation: TaskCancellation,

    pub chunks: Option<Vec<Chunk>>,
    pub chunk_results: Option<Vec<ChunkResult>>,
    pub entity_names: Option<Vec<String>>,
    pub relation_pairs: Option<Vec<(String, String)>>,
}

impl<'a> OrchestratorContext<'a> {
    pub fn new(
        deps: &'a OrchestratorDeps,
        doc_id: String,
        file_path: String,
        content: String,
        progress: Arc<ProgressBus>,
        cancellation: TaskCancellation,
    ) -> Self {
        Self {
            deps,
            doc_id,
            file_path,
            content,
            progress,
            cancellation,
            chunks: None,
            chunk_results: None,
            entity_names: None,
            relation_pairs: None,
        }
    }

    pub fn check_cancelled(&self) -> Result<(), AppError> {
        if self.cancellation.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        tracing::warn!(doc_id = %self.doc_id, error = %err, "ingestion orchestrator aborting");
        err
    }

    pub fn take_chunks(&mut self) -> Result<Vec<Chunk>, AppError> {
        self.chunks
            .take()
            .ok_or_else(|| AppError::InternalInconsistency("chunks missing from orchestrator context".to_string()))
    }

    pub fn take_chunk_results(&mut self) -> Result<Vec<ChunkResult>, AppError> {
        self.chunk_results.take().ok_or_else(|| {
            AppError::InternalInconsistency("chunk results missing from orchestrator context".to_string())
        })
    }

    pub fn take_entity_names(&mut self) -> Result<Vec<String>, AppError> {
        self.entity_names.take().ok_or_else(|| {
            AppError::InternalInconsistency("entity names missing from orchestrator context".to_string())
        })
    }

    pub fn take_relation_pairs(&mut self) -> Result<Vec<(String, String)>, AppError> {
        self.relation_pairs.take().ok_or_else(|| {
            AppError::InternalInconsistency("relation pairs missing from orchestrator context".to_string())
        })
    }

    /// Groups chunk-level entity mentions by name and relation mentions by
    /// sorted pair, the shape both mergers expect.
    pub fn group_for_merge(
        results: &[ChunkResult],
    ) -> (HashMap<String, Vec<Entity>>, HashMap<(String, String), Vec<Relation>>) {
        let mut entities: HashMap<String, Vec<Entity>> = HashMap::new();
        let mut relations: HashMap<(String, String), Vec<Relation>> = HashMap::new();

        for result in results {
            for entity in &result.entities {
                entities.entry(entity.name.clone()).or_default().push(entity.clone());
            }
            for relation in &result.relations {
                relations.entry(relation.sorted_pair()).or_default().push(relation.clone());
            }
        }

        (entities, relations)
    }
}
