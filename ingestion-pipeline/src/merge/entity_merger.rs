//! Phase 1 of the knowledge-graph merge: collapses same-named entities
//! gathered across a document's chunks into one graph node each, updating
//! the unlimited chunk-id history and the entity vector index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use common::collaborators::llm::DescriptionKind;
use common::collaborators::vector_store::{collection_name, VectorRecord};
use common::collaborators::{EmbeddingClient, GraphStore, LlmClient, VectorStore};
use common::config::SourceIdsLimitMethod;
use common::domain::{ChunkIdIndexEntry, Entity, GraphNodeData, SEP};
use common::error::AppError;
use common::ids;
use common::kv::KvStore;
use common::progress::ProgressBus;

use super::description_merger::{merge_descriptions, DescriptionMergeConfig};
use super::source_ids::{apply_limit, apply_limit_with_marker};

const ENTITY_VECTOR_COLLECTION_BASE: &str = "entities";

#[derive(Debug, Clone)]
pub struct EntityMergeConfig {
    pub max_source_ids_per_entity: usize,
    pub max_file_paths: usize,
    pub method: SourceIdsLimitMethod,
    pub description: DescriptionMergeConfig,
}

pub struct EntityMerger {
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn LlmClient>,
    entity_chunks: Arc<dyn KvStore<ChunkIdIndexEntry>>,
    config: EntityMergeConfig,
}

impl EntityMerger {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LlmClient>,
        entity_chunks: Arc<dyn KvStore<ChunkIdIndexEntry>>,
        config: EntityMergeConfig,
    ) -> Self {
        Self {
            graph,
            vector,
            embedder,
            llm,
            entity_chunks,
            config,
        }
    }

    /// Merges every name group in `grouped`, returning the full set of
    /// entity names touched by this document (for the reference index).
    pub async fn merge(
        &self,
        grouped: HashMap<String, Vec<Entity>>,
        progress: &ProgressBus,
        doc_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let total = grouped.len();
        let mut names = Vec::with_capacity(total);
        let mut pending_records = Vec::with_capacity(total);

        for (index, (name, incoming)) in grouped.into_iter().enumerate() {
            names.push(name.clone());
            match self.build_node_data(&name, incoming).await {
                Ok(Some(node_data)) => pending_records.push(node_data),
                Ok(None) => {
                    // KEEP-skip: node unchanged, nothing to re-embed or upsert.
                }
                Err(AppError::MissingDescription { .. }) => {
                    tracing::warn!(entity = %name, "skipping entity with no usable description");
                }
                Err(err) => return Err(err),
            }

            progress.publish(common::domain::TaskState {
                stage: common::domain::ProcessingStage::MergingEntities,
                current: index + 1,
                total,
                description: format!("merged entity {name}"),
                details: None,
                doc_id: Some(doc_id.to_string()),
            });
        }

        if pending_records.is_empty() {
            return Ok(names);
        }

        let embed_inputs: Vec<String> = pending_records.iter().map(embed_inputs_for).collect();
        let embeddings = self.embedder.embed_batch(&embed_inputs).await?;

        for (record, embedding) in pending_records.iter().zip(embeddings.into_iter()) {
            let node_id = ids::entity_id(&record.name);
            common::retry::retry_on_conflict(|| self.graph.upsert_node(&node_id, record.data.clone())).await?;

            let vector_record = VectorRecord {
                id: ids::entity_id(&record.name),
                vector: embedding,
                content: embed_inputs_for(record),
                metadata: serde_json::json!({
                    "content": embed_inputs_for(record),
                    "entity_name": record.name,
                    "source_id": record.data.source_id,
                    "file_path": record.data.file_path,
                }),
            };
            self.vector
                .upsert(
                    &collection_name(ENTITY_VECTOR_COLLECTION_BASE, self.embedder.dimensions()),
                    vec![vector_record],
                )
                .await?;
        }

        Ok(names)
    }

    async fn build_node_data(
        &self,
        name: &str,
        incoming: Vec<Entity>,
    ) -> Result<Option<PendingNode>, AppError> {
        let entity_id = ids::entity_id(name);
        let existing_node = self.graph.get_node(&entity_id).await?;

        let existing_index = self.entity_chunks.get_by_id(name).await?;
        let mut chunk_index = existing_index.unwrap_or_else(|| ChunkIdIndexEntry {
            chunk_ids: existing_node
                .as_ref()
                .map(|n| n.source_id.clone())
                .unwrap_or_default(),
        });
        let pre_union_len = chunk_index.chunk_ids.len();

        let incoming_ids: Vec<String> = incoming.iter().map(|e| e.source_id.clone()).collect();
        chunk_index.union_in_place(&incoming_ids);
        self.entity_chunks
            .upsert(HashMap::from([(name.to_string(), chunk_index.clone())]))
            .await?;

        let window = apply_limit(
            &chunk_index.chunk_ids,
            self.config.max_source_ids_per_entity,
            &self.config.method,
        );
        let window_set: HashSet<&str> = window.kept.iter().map(String::as_str).collect();
        let pre_existing_set: HashSet<&str> = chunk_index.chunk_ids[..pre_union_len.min(chunk_index.chunk_ids.len())]
            .iter()
            .map(String::as_str)
            .collect();

        let surviving: Vec<&Entity> = incoming
            .iter()
            .filter(|e| {
                !matches!(self.config.method, SourceIdsLimitMethod::Keep)
                    || window_set.contains(e.source_id.as_str())
                    || pre_existing_set.contains(e.source_id.as_str())
            })
            .collect();

        if matches!(self.config.method, SourceIdsLimitMethod::Keep)
            && pre_union_len >= self.config.max_source_ids_per_entity
            && surviving.is_empty()
        {
            let existing = existing_node.ok_or_else(|| {
                AppError::InternalInconsistency(format!(
                    "KEEP-skip for entity '{name}' expected an existing graph node"
                ))
            })?;
            let _ = existing; // unchanged; nothing to upsert or re-embed
            return Ok(None);
        }

        let entity_type = majority_type(existing_node.as_ref(), &surviving);

        let mut descriptions: Vec<String> = Vec::new();
        if let Some(existing) = &existing_node {
            if !existing.description.is_empty() {
                descriptions.extend(existing.description.split(SEP).map(str::to_string));
            }
        }
        let mut new_descriptions: Vec<(i64, String)> = surviving
            .iter()
            .map(|e| (e.timestamp, e.description.clone()))
            .collect();
        new_descriptions.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.len().cmp(&a.1.len())));
        for (_, desc) in new_descriptions {
            if !descriptions.contains(&desc) {
                descriptions.push(desc);
            }
        }

        if descriptions.is_empty() {
            return Err(AppError::MissingDescription {
                kind: "Entity",
                name: name.to_string(),
            });
        }

        let (merged_description, _llm_used) = merge_descriptions(
            self.llm.as_ref(),
            DescriptionKind::Entity,
            name,
            descriptions,
            self.config.description,
        )
        .await?;

        let mut file_paths: Vec<String> = Vec::new();
        if let Some(existing) = &existing_node {
            for p in &existing.file_path {
                if !file_paths.contains(p) {
                    file_paths.push(p.clone());
                }
            }
        }
        for e in &surviving {
            if !file_paths.contains(&e.file_path) {
                file_paths.push(e.file_path.clone());
            }
        }
        let file_paths = apply_limit_with_marker(&file_paths, self.config.max_file_paths, &self.config.method);

        let node_data = GraphNodeData {
            entity_id: entity_id.clone(),
            entity_type,
            description: merged_description,
            source_id: window.kept.clone(),
            file_path: file_paths,
            created_at: Utc::now(),
            truncate: window.truncate.as_property_string(),
        };

        Ok(Some(PendingNode {
            name: name.to_string(),
            data: node_data,
        }))
    }
}

struct PendingNode {
    name: String,
    data: GraphNodeData,
}

fn embed_inputs_for(record: &PendingNode) -> String {
    format!("{}\n{}", record.name, record.data.description)
}

/// Majority vote across the pre-existing node's type (one vote) and every
/// surviving incoming entity's type, ties broken by first occurrence.
fn majority_type(existing_node: Option<&GraphNodeData>, surviving: &[&Entity]) -> String {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    let mut record = |t: &str| {
        *counts.entry(t.to_string()).or_insert(0) += 1;
        if !order.contains(&t.to_string()) {
            order.push(t.to_string());
        }
    };

    if let Some(existing) = existing_node {
        record(&existing.entity_type);
    }
    for e in surviving {
        record(&e.entity_type);
    }

    if order.is_empty() {
        return Entity::UNKNOWN_TYPE.to_string();
    }

    // `Iterator::max_by_key` keeps the *last* maximum on a tie; the spec
    // wants the first-occurring type to win, so track the best manually and
    // only replace it on a strictly greater count.
    let mut best: Option<(String, usize)> = None;
    for t in order {
        let count = counts.get(&t).copied().unwrap_or(0);
        let replace = match &best {
            Some((_, best_count)) => count > *best_count,
            None => true,
        };
        if replace {
            best = Some((t, count));
        }
    }
    best.map(|(t, _)| t).unwrap_or_else(|| Entity::UNKNOWN_TYPE.to_string())
}
