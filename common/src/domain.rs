//! Core domain types shared by the ingestion pipeline and the task queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Literal separator used to encode list-typed fields inside graph node/edge
/// properties (entity_type, source_id, file_path, description).
pub const SEP: &str = "<SEP>";

/// Immutable input document. Never mutated once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub doc_id: String,
    pub content: String,
    pub file_path: String,
}

/// Token-bounded fragment of a document, produced by the chunker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub token_count: usize,
    pub order_index: usize,
    pub doc_id: String,
    pub file_path: String,
}

/// Output of `ChunkProcessor::process`, cached by `chunk.id` in `llm_cache`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkResult {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Raw entity mention extracted from a single chunk, prior to merging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub source_id: String,
    pub file_path: String,
    pub timestamp: i64,
}

impl Entity {
    pub const UNKNOWN_TYPE: &'static str = "UNKNOWN";
}

/// Raw relation mention extracted from a single chunk, prior to merging.
/// Self-loops (`source_name == target_name`) must never reach the merger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub source_name: String,
    pub target_name: String,
    pub keywords: Vec<String>,
    pub description: String,
    pub weight: f64,
    pub source_chunk_id: String,
    pub file_path: String,
    pub timestamp: i64,
}

impl Relation {
    pub fn is_self_loop(&self) -> bool {
        self.source_name == self.target_name
    }

    pub fn sorted_pair(&self) -> (String, String) {
        let (a, b) = crate::ids::sorted_pair(&self.source_name, &self.target_name);
        (a.to_string(), b.to_string())
    }
}

/// Windowing policy applied to the unlimited chunk-id history kept per
/// entity/relation before it is written to the graph as `source_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationMarker {
    None,
    Fifo { kept: usize, total: usize },
    KeepOld,
}

impl TruncationMarker {
    pub fn as_property_string(&self) -> String {
        match self {
            TruncationMarker::None => String::new(),
            TruncationMarker::Fifo { kept, total } => format!("FIFO {kept}/{total}"),
            TruncationMarker::KeepOld => "KEEP Old".to_string(),
        }
    }
}

/// Persisted graph node for an entity, `<SEP>`-encoding the list-typed
/// fields as described in the storage layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNodeData {
    pub entity_id: String,
    pub entity_type: String,
    pub description: String,
    pub source_id: Vec<String>,
    pub file_path: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub truncate: String,
}

/// Persisted graph edge for an undirected relation pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdgeData {
    pub description: String,
    pub keywords: Vec<String>,
    pub weight: f64,
    pub source_id: Vec<String>,
    pub file_path: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub truncate: String,
}

/// Unlimited, insertion-order-preserved, deduplicated chunk-id history for
/// one entity name or one sorted relation pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkIdIndexEntry {
    pub chunk_ids: Vec<String>,
}

impl ChunkIdIndexEntry {
    pub fn count(&self) -> usize {
        self.chunk_ids.len()
    }

    /// Appends new ids, preserving order and deduplicating.
    pub fn union_in_place(&mut self, incoming: &[String]) {
        for id in incoming {
            if !self.chunk_ids.contains(id) {
                self.chunk_ids.push(id.clone());
            }
        }
    }
}

/// Per-document reference index entry: the set of entity names (or sorted
/// relation pairs) touched while ingesting one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceIndexEntry<T> {
    pub items: Vec<T>,
    pub count: usize,
}

pub type EntityReferenceIndexEntry = ReferenceIndexEntry<String>;
pub type RelationReferenceIndexEntry = ReferenceIndexEntry<(String, String)>;

/// Persisted row in the `text_chunks` index: the chunk's text and placement
/// inside its document, independent of the `llm_cache` entry keyed by the
/// same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredTextChunk {
    pub content: String,
    pub tokens: usize,
    pub chunk_order_index: usize,
    pub full_doc_id: String,
    pub file_path: String,
}

/// Persisted document record; its presence in `full_docs` is what makes a
/// re-insert idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FullDocumentRecord {
    pub doc_id: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a queued ingestion task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Labelled checkpoint inside ingestion, used for progress reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProcessingStage {
    DocumentChunking,
    ProcessingChunks,
    StoringTextChunks,
    StoringChunkVectors,
    MergingEntities,
    MergingRelations,
    UpdatingStorage,
    StoringFullDocument,
    Persisting,
    Completed,
}

impl ProcessingStage {
    /// Only these stages report a countable `current/total` progress; the
    /// rest are marker-only (progress stays `None`).
    pub fn is_countable(self) -> bool {
        matches!(
            self,
            ProcessingStage::ProcessingChunks
                | ProcessingStage::MergingEntities
                | ProcessingStage::MergingRelations
        )
    }
}

/// A unit of queued work to ingest one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub document_id: String,
    pub rag_document_id: String,
    pub content: String,
    pub file_path: String,
    pub status: TaskStatus,
    pub current_stage: Option<ProcessingStage>,
    pub progress: Option<u8>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub priority: i64,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Task {
    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Single progress event published on the `ProgressBus` by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskState {
    pub stage: ProcessingStage,
    pub current: usize,
    pub total: usize,
    pub description: String,
    pub details: Option<String>,
    pub doc_id: Option<String>,
}

impl TaskState {
    pub fn marker(stage: ProcessingStage, description: impl Into<String>) -> Self {
        Self {
            stage,
            current: 0,
            total: 0,
            description: description.into(),
            details: None,
            doc_id: None,
        }
    }

    pub fn countable(
        stage: ProcessingStage,
        current: usize,
        total: usize,
        description: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            current,
            total,
            description: description.into(),
            details: None,
            doc_id: None,
        }
    }

    /// Percent-complete in `[0, 100]` when this event carries countable
    /// progress, or `None` for a stage-only (marker) update.
    pub fn percent(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let pct = (self.current as f64 / self.total as f64 * 100.0).clamp(0.0, 100.0);
        Some(pct as u8)
    }
}
