//! Turns a document's raw text into graph nodes/edges and vector records:
//! chunking, per-chunk LLM extraction, and the entity/relation merge engine
//! that collapses chunk-level mentions into the persisted knowledge graph.

pub mod chunk_processor;
pub mod chunker;
pub mod merge;
pub mod orchestrator;
pub mod tokenizer;

pub use chunk_processor::{ChunkProcessor, ChunkProcessorConfig};
pub use chunker::{chunk, ChunkerConfig};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorDeps};
