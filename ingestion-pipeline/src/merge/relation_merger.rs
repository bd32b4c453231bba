//! Phase 2 of the knowledge-graph merge: collapses same-pair relations into
//! one undirected edge each, materialising any endpoint entity that Phase 1
//! never saw directly (a name mentioned only as a relation target/source).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use common::collaborators::llm::DescriptionKind;
use common::collaborators::vector_store::{collection_name, VectorRecord};
use common::collaborators::{EmbeddingClient, GraphStore, LlmClient, VectorStore};
use common::config::SourceIdsLimitMethod;
use common::domain::{ChunkIdIndexEntry, Entity, GraphEdgeData, GraphNodeData, Relation, SEP};
use common::error::AppError;
use common::ids;
use common::kv::KvStore;
use common::progress::ProgressBus;

use super::description_merger::{merge_descriptions, DescriptionMergeConfig};
use super::source_ids::{apply_limit, apply_limit_with_marker};

const RELATION_VECTOR_COLLECTION_BASE: &str = "relationships";
const ENTITY_VECTOR_COLLECTION_BASE: &str = "entities";

#[derive(Debug, Clone)]
pub struct RelationMergeConfig {
    pub max_source_ids_per_relation: usize,
    pub max_file_paths: usize,
    pub method: SourceIdsLimitMethod,
    pub description: DescriptionMergeConfig,
}

pub struct RelationMerger {
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn LlmClient>,
    relation_chunks: Arc<dyn KvStore<ChunkIdIndexEntry>>,
    config: RelationMergeConfig,
}

impl RelationMerger {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LlmClient>,
        relation_chunks: Arc<dyn KvStore<ChunkIdIndexEntry>>,
        config: RelationMergeConfig,
    ) -> Self {
        Self {
            graph,
            vector,
            embedder,
            llm,
            relation_chunks,
            config,
        }
    }

    /// Merges every sorted-pair group in `grouped` and materialises any
    /// endpoint not already a graph node. `entity_names_in_document` is the
    /// set Phase 1 already produced a node for; an endpoint in that set is
    /// never touched here, preserving Phase-1 ownership of its node.
    pub async fn merge(
        &self,
        grouped: HashMap<(String, String), Vec<Relation>>,
        entity_names_in_document: &HashSet<String>,
        progress: &ProgressBus,
        doc_id: &str,
    ) -> Result<Vec<(String, String)>, AppError> {
        let total = grouped.len();
        let mut pairs = Vec::with_capacity(total);
        let mut pending_edges = Vec::with_capacity(total);
        let mut endpoints_created_this_document: HashSet<String> = HashSet::new();

        for (index, ((a, b), incoming)) in grouped.into_iter().enumerate() {
            pairs.push((a.clone(), b.clone()));

            if let Some(edge_data) = self.build_edge_data(&a, &b, incoming).await? {
                for name in [&a, &b] {
                    if !entity_names_in_document.contains(name)
                        && !endpoints_created_this_document.contains(name)
                        && !self.graph.has_node(&ids::entity_id(name)).await?
                    {
                        self.materialise_endpoint(name, doc_id).await?;
                        endpoints_created_this_document.insert(name.clone());
                    }
                }
                pending_edges.push((a, b, edge_data));
            }

            progress.publish(common::domain::TaskState {
                stage: common::domain::ProcessingStage::MergingRelations,
                current: index + 1,
                total,
                description: format!("merged relation {a}-{b}"),
                details: None,
                doc_id: Some(doc_id.to_string()),
            });
        }

        if pending_edges.is_empty() {
            return Ok(pairs);
        }

        let embed_inputs: Vec<String> = pending_edges
            .iter()
            .map(|(a, b, data)| format!("{a}\n{b}\n{}\n{}", data.keywords.join(", "), data.description))
            .collect();
        let embeddings = self.embedder.embed_batch(&embed_inputs).await?;

        for ((a, b, data), (embedding, content)) in pending_edges
            .into_iter()
            .zip(embeddings.into_iter().zip(embed_inputs.into_iter()))
        {
            common::retry::retry_on_conflict(|| self.graph.upsert_edge(&a, &b, data.clone())).await?;

            let record_id = ids::relation_id(&a, &b);
            // Stale vector record from an earlier orientation never
            // accumulates: deleting before upserting is a no-op for a
            // first-time relation and a correctness fix for neither (the id
            // is orientation-independent, so this is defensive only against
            // a future id scheme change).
            self.vector
                .delete(
                    &collection_name(RELATION_VECTOR_COLLECTION_BASE, self.embedder.dimensions()),
                    &[record_id.clone()],
                )
                .await?;
            self.vector
                .upsert(
                    &collection_name(RELATION_VECTOR_COLLECTION_BASE, self.embedder.dimensions()),
                    vec![VectorRecord {
                        id: record_id,
                        vector: embedding,
                        content: content.clone(),
                        metadata: serde_json::json!({
                            "content": content,
                            "source_entity": a,
                            "target_entity": b,
                            "source_id": data.source_id,
                            "file_path": data.file_path,
                        }),
                    }],
                )
                .await?;
        }

        Ok(pairs)
    }

    async fn build_edge_data(
        &self,
        a: &str,
        b: &str,
        incoming: Vec<Relation>,
    ) -> Result<Option<GraphEdgeData>, AppError> {
        let existing_edge = self.graph.get_edge(a, b).await?;
        let pair_key = format!("{a}{SEP}{b}");

        let existing_index = self.relation_chunks.get_by_id(&pair_key).await?;
        let mut chunk_index = existing_index.unwrap_or_else(|| ChunkIdIndexEntry {
            chunk_ids: existing_edge
                .as_ref()
                .map(|e| e.source_id.clone())
                .unwrap_or_default(),
        });
        let pre_union_len = chunk_index.chunk_ids.len();

        let incoming_ids: Vec<String> = incoming.iter().map(|r| r.source_chunk_id.clone()).collect();
        chunk_index.union_in_place(&incoming_ids);
        self.relation_chunks
            .upsert(HashMap::from([(pair_key, chunk_index.clone())]))
            .await?;

        let window = apply_limit(
            &chunk_index.chunk_ids,
            self.config.max_source_ids_per_relation,
            &self.config.method,
        );
        let window_set: HashSet<&str> = window.kept.iter().map(String::as_str).collect();
        let pre_existing_set: HashSet<&str> = chunk_index.chunk_ids
            [..pre_union_len.min(chunk_index.chunk_ids.len())]
            .iter()
            .map(String::as_str)
            .collect();

        let surviving: Vec<&Relation> = incoming
            .iter()
            .filter(|r| {
                !matches!(self.config.method, SourceIdsLimitMethod::Keep)
                    || window_set.contains(r.source_chunk_id.as_str())
                    || pre_existing_set.contains(r.source_chunk_id.as_str())
            })
            .collect();

        if matches!(self.config.method, SourceIdsLimitMethod::Keep)
            && pre_union_len >= self.config.max_source_ids_per_relation
            && surviving.is_empty()
        {
            return Ok(None);
        }

        let weight = existing_edge.as_ref().map_or(0.0, |e| e.weight) + surviving.iter().map(|r| r.weight).sum::<f64>();

        let mut keywords: Vec<String> = Vec::new();
        if let Some(existing) = &existing_edge {
            for k in &existing.keywords {
                if !keywords.contains(k) {
                    keywords.push(k.clone());
                }
            }
        }
        for r in &surviving {
            for k in &r.keywords {
                if !keywords.contains(k) {
                    keywords.push(k.clone());
                }
            }
        }
        keywords.sort();

        let mut descriptions: Vec<String> = Vec::new();
        if let Some(existing) = &existing_edge {
            if !existing.description.is_empty() {
                descriptions.extend(existing.description.split(SEP).map(str::to_string));
            }
        }
        let mut new_descriptions: Vec<(i64, String)> = surviving
            .iter()
            .map(|r| (r.timestamp, r.description.clone()))
            .collect();
        new_descriptions.sort_by(|x, y| x.0.cmp(&y.0).then(y.1.len().cmp(&x.1.len())));
        for (_, desc) in new_descriptions {
            if !descriptions.contains(&desc) {
                descriptions.push(desc);
            }
        }

        if descriptions.is_empty() {
            return Err(AppError::MissingDescription {
                kind: "Relation",
                name: format!("{a}-{b}"),
            });
        }

        let (merged_description, _llm_used) = merge_descriptions(
            self.llm.as_ref(),
            DescriptionKind::Relation,
            &format!("{a}-{b}"),
            descriptions,
            self.config.description,
        )
        .await?;

        let mut file_paths: Vec<String> = Vec::new();
        if let Some(existing) = &existing_edge {
            for p in &existing.file_path {
                if !file_paths.contains(p) {
                    file_paths.push(p.clone());
                }
            }
        }
        for r in &surviving {
            if !file_paths.contains(&r.file_path) {
                file_paths.push(r.file_path.clone());
            }
        }
        let file_paths = apply_limit_with_marker(&file_paths, self.config.max_file_paths, &self.config.method);

        Ok(Some(GraphEdgeData {
            description: merged_description,
            keywords,
            weight,
            source_id: window.kept.clone(),
            file_path: file_paths,
            created_at: Utc::now(),
            truncate: window.truncate.as_property_string(),
        }))
    }

    /// Creates a bare placeholder node for a relation endpoint that no chunk
    /// in this document ever extracted as an entity directly.
    async fn materialise_endpoint(&self, name: &str, doc_id: &str) -> Result<(), AppError> {
        let entity_id = ids::entity_id(name);
        let placeholder = Entity {
            name: name.to_string(),
            entity_type: Entity::UNKNOWN_TYPE.to_string(),
            description: name.to_string(),
            source_id: String::new(),
            file_path: String::new(),
            timestamp: Utc::now().timestamp(),
        };
        let node_data = GraphNodeData {
            entity_id: entity_id.clone(),
            entity_type: placeholder.entity_type,
            description: placeholder.description,
            source_id: Vec::new(),
            file_path: Vec::new(),
            created_at: Utc::now(),
            truncate: String::new(),
        };
        common::retry::retry_on_conflict(|| self.graph.upsert_node(&entity_id, node_data.clone())).await?;

        let embedding = self.embedder.embed(&format!("{name}\n{}", node_data.description)).await?;
        self.vector
            .upsert(
                &collection_name(ENTITY_VECTOR_COLLECTION_BASE, self.embedder.dimensions()),
                vec![VectorRecord {
                    id: entity_id,
                    vector: embedding,
                    content: format!("{name}\n{}", node_data.description),
                    metadata: serde_json::json!({
                        "content": format!("{name}\n{}", node_data.description),
                        "entity_name": name,
                        "source_id": Vec::<String>::new(),
                        "file_path": Vec::<String>::new(),
                        "materialised_from_relation_in_doc": doc_id,
                    }),
                }],
            )
            .await?;
        Ok(())
    }
}
