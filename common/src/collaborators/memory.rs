//! In-memory reference implementations of every collaborator trait, used by
//! unit and integration tests the way the teacher's `MockServices` stands in
//! for `SurrealDbClient` in pipeline tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use futures::stream::BoxStream;

use crate::domain::{GraphEdgeData, GraphNodeData};
use crate::error::AppError;
use crate::ids::sorted_pair;

use super::embedding::EmbeddingClient;
use super::graph_store::GraphStore;
use super::llm::{DescriptionKind, ExtractionResult, GenerateOptions, LlmClient};
use super::vector_store::{VectorQueryResult, VectorRecord, VectorStore};

/// Deterministic, content-derived fake embedding: useful in tests that need
/// stable vectors without exercising a real embedding provider.
pub struct InMemoryEmbeddingClient {
    dimensions: u32,
}

impl InMemoryEmbeddingClient {
    pub fn new(dimensions: u32) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = md5::compute(text.as_bytes());
        (0..self.dimensions as usize)
            .map(|i| f32::from(digest[i % digest.len()]) / 255.0)
            .collect()
    }
}

#[async_trait]
impl EmbeddingClient for InMemoryEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        Ok(self.embed_one(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

/// Canned-response LLM client: extracts no entities/relations and echoes the
/// first description back for summaries unless a test wires something
/// richer through `with_extraction_result`. Adequate for exercising the
/// merge/chunking machinery without a network dependency.
#[derive(Default)]
pub struct InMemoryLlmClient {
    scripted_extraction: Mutex<Option<ExtractionResult>>,
    pub call_count: std::sync::atomic::AtomicUsize,
}

impl InMemoryLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extraction_result(self, result: ExtractionResult) -> Self {
        *self.scripted_extraction.lock().expect("lock poisoned") = Some(result);
        self
    }
}

#[async_trait]
impl LlmClient for InMemoryLlmClient {
    async fn generate(&self, prompt: &str, _options: GenerateOptions) -> Result<String, AppError> {
        self.call_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(prompt.to_string())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _options: GenerateOptions,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError> {
        let owned = prompt.to_string();
        Ok(Box::pin(stream::iter(vec![Ok(owned)])))
    }

    async fn extract_entities_and_relations(
        &self,
        _text: &str,
        _entity_types: &[String],
        _temperature: f32,
        _max_entities: Option<usize>,
        _max_relationships: Option<usize>,
    ) -> Result<ExtractionResult, AppError> {
        self.call_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(self
            .scripted_extraction
            .lock()
            .expect("lock poisoned")
            .clone()
            .unwrap_or_default())
    }

    async fn summarise(
        &self,
        _kind: DescriptionKind,
        _name: &str,
        descriptions: &[String],
        _target_len: usize,
    ) -> Result<String, AppError> {
        self.call_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(descriptions.join(" "))
    }
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: Mutex<HashMap<String, GraphNodeData>>,
    edges: Mutex<HashMap<(String, String), GraphEdgeData>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn has_node(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.nodes.lock().expect("lock poisoned").contains_key(id))
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNodeData>, AppError> {
        Ok(self.nodes.lock().expect("lock poisoned").get(id).cloned())
    }

    async fn upsert_node(&self, id: &str, props: GraphNodeData) -> Result<(), AppError> {
        self.nodes
            .lock()
            .expect("lock poisoned")
            .insert(id.to_string(), props);
        Ok(())
    }

    async fn has_edge(&self, a: &str, b: &str) -> Result<bool, AppError> {
        let (a, b) = sorted_pair(a, b);
        Ok(self
            .edges
            .lock()
            .expect("lock poisoned")
            .contains_key(&(a.to_string(), b.to_string())))
    }

    async fn get_edge(&self, a: &str, b: &str) -> Result<Option<GraphEdgeData>, AppError> {
        let (a, b) = sorted_pair(a, b);
        Ok(self
            .edges
            .lock()
            .expect("lock poisoned")
            .get(&(a.to_string(), b.to_string()))
            .cloned())
    }

    async fn upsert_edge(&self, a: &str, b: &str, props: GraphEdgeData) -> Result<(), AppError> {
        let (a, b) = sorted_pair(a, b);
        self.edges
            .lock()
            .expect("lock poisoned")
            .insert((a.to_string(), b.to_string()), props);
        Ok(())
    }

    async fn get_nodes_batch(&self, ids: &[String]) -> Result<HashMap<String, GraphNodeData>, AppError> {
        let nodes = self.nodes.lock().expect("lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| nodes.get(id).map(|n| (id.clone(), n.clone())))
            .collect())
    }

    async fn get_node_degrees_batch(&self, ids: &[String]) -> Result<HashMap<String, usize>, AppError> {
        let edges = self.edges.lock().expect("lock poisoned");
        Ok(ids
            .iter()
            .map(|id| {
                let degree = edges.keys().filter(|(a, b)| a == id || b == id).count();
                (id.clone(), degree)
            })
            .collect())
    }

    async fn get_nodes_edges_batch(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<(String, String)>>, AppError> {
        let edges = self.edges.lock().expect("lock poisoned");
        Ok(ids
            .iter()
            .map(|id| {
                let touching = edges
                    .keys()
                    .filter(|(a, b)| a == id || b == id)
                    .cloned()
                    .collect();
                (id.clone(), touching)
            })
            .collect())
    }

    async fn get_edges_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<HashMap<(String, String), GraphEdgeData>, AppError> {
        let edges = self.edges.lock().expect("lock poisoned");
        Ok(pairs
            .iter()
            .filter_map(|(a, b)| {
                let (a, b) = sorted_pair(a, b);
                edges
                    .get(&(a.to_string(), b.to_string()))
                    .map(|e| ((a.to_string(), b.to_string()), e.clone()))
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), AppError> {
        let mut collections = self.collections.lock().expect("lock poisoned");
        let entry = collections.entry(collection.to_string()).or_default();
        for record in records {
            entry.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorQueryResult>, AppError> {
        let collections = self.collections.lock().expect("lock poisoned");
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<VectorQueryResult> = records
            .values()
            .map(|r| VectorQueryResult {
                id: r.id.clone(),
                score: cosine(&r.vector, vector),
                metadata: r.metadata.clone(),
                content: r.content.clone(),
            })
            .filter(|r| r.score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), AppError> {
        let mut collections = self.collections.lock().expect("lock poisoned");
        if let Some(records) = collections.get_mut(collection) {
            for id in ids {
                records.remove(id);
            }
        }
        Ok(())
    }

    async fn get_by_id(&self, collection: &str, ids: &[String]) -> Result<Vec<VectorRecord>, AppError> {
        let collections = self.collections.lock().expect("lock poisoned");
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }
}
