//! Cross-module scenarios that exercise more than one pipeline stage
//! together, the way a single unit test colocated in one module cannot.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::collaborators::llm::ExtractionResult;
use common::collaborators::memory::{InMemoryEmbeddingClient, InMemoryGraphStore, InMemoryLlmClient, InMemoryVectorStore};
use common::collaborators::{EmbeddingClient, GraphStore, LlmClient, VectorStore};
use common::config::SourceIdsLimitMethod;
use common::domain::{ChunkIdIndexEntry, ChunkResult, Entity, EntityReferenceIndexEntry, RelationReferenceIndexEntry};
use common::domain::{Chunk, GraphNodeData};
use common::ids;
use common::kv::{JsonFileKvStore, KvStore};
use common::progress::ProgressBus;
use ingestion_pipeline::chunk_processor::{ChunkProcessor, ChunkProcessorConfig};
use ingestion_pipeline::merge::{DescriptionMergeConfig, EntityMergeConfig, EntityMerger, IndexUpdater};
use tempfile::tempdir;

fn make_chunk(content: &str, doc_id: &str, file_path: &str) -> Chunk {
    Chunk {
        id: ids::chunk_id(content.trim()),
        content: content.trim().to_string(),
        token_count: content.split_whitespace().count().max(1),
        order_index: 0,
        doc_id: doc_id.to_string(),
        file_path: file_path.to_string(),
    }
}

fn merge_config() -> EntityMergeConfig {
    EntityMergeConfig {
        max_source_ids_per_entity: 20,
        max_file_paths: 10,
        method: SourceIdsLimitMethod::Fifo,
        description: DescriptionMergeConfig {
            summary_context_size: 2000,
            summary_max_tokens: 500,
            force_llm_summary_on_merge: 4,
            summary_length_recommended: 200,
        },
    }
}

/// Scenario 3: two documents sharing an identical chunk. The second
/// document's `ChunkProcessor::process` must not call the LLM again, and
/// both documents must still end up with the entity recorded against their
/// own `docId` in `full_entities`.
#[tokio::test]
async fn second_document_with_identical_chunk_skips_llm_but_still_attributes_entity() {
    let dir = tempdir().unwrap();
    let llm_cache = JsonFileKvStore::<ChunkResult>::open(dir.path(), "llm_cache").await.unwrap();
    let entity_chunks = JsonFileKvStore::<ChunkIdIndexEntry>::open(dir.path(), "entity_chunks").await.unwrap();
    let full_entities = JsonFileKvStore::<EntityReferenceIndexEntry>::open(dir.path(), "full_entities").await.unwrap();
    let full_relations = JsonFileKvStore::<RelationReferenceIndexEntry>::open(dir.path(), "full_relations").await.unwrap();

    let llm = Arc::new(InMemoryLlmClient::new().with_extraction_result(ExtractionResult {
        entities: vec![Entity {
            name: "SHARED".to_string(),
            entity_type: "CONCEPT".to_string(),
            description: "appears in both documents".to_string(),
            source_id: String::new(),
            file_path: String::new(),
            timestamp: 0,
        }],
        relations: vec![],
    }));
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(InMemoryEmbeddingClient::new(8));
    let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
    let vector: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());

    let processor = ChunkProcessor::new(
        llm.clone(),
        Arc::clone(&embedder),
        llm_cache,
        vec!["CONCEPT".to_string()],
        ChunkProcessorConfig::default(),
    );
    let merger = EntityMerger::new(
        Arc::clone(&graph),
        Arc::clone(&vector),
        embedder,
        llm.clone(),
        entity_chunks.clone(),
        merge_config(),
    );
    let updater = IndexUpdater::new(Arc::clone(&full_entities), full_relations);

    let shared_content = "A shared sentence about SHARED.";
    let chunk_doc1 = make_chunk(shared_content, "doc-1", "doc1.txt");
    let chunk_doc2 = make_chunk(shared_content, "doc-2", "doc2.txt");
    assert_eq!(chunk_doc1.id, chunk_doc2.id, "identical content must hash to the same chunk id");

    let result1 = processor.process(&chunk_doc1).await.unwrap();
    let calls_after_doc1 = llm.call_count.load(Ordering::Relaxed);
    assert!(calls_after_doc1 > 0);

    let result2 = processor.process(&chunk_doc2).await.unwrap();
    assert_eq!(llm.call_count.load(Ordering::Relaxed), calls_after_doc1, "cache hit must not call the llm again");
    assert_eq!(result2.entities[0].file_path, "doc2.txt", "cache hit is restamped with the new chunk's file path");
    assert_ne!(result1.entities[0].file_path, result2.entities[0].file_path);

    let (bus1, _rx1) = ProgressBus::new(8);
    let grouped1: HashMap<String, Vec<Entity>> = HashMap::from([("SHARED".to_string(), result1.entities)]);
    let names1 = merger.merge(grouped1, &bus1, "doc-1").await.unwrap();
    updater.update("doc-1", names1, vec![]).await.unwrap();

    let (bus2, _rx2) = ProgressBus::new(8);
    let grouped2: HashMap<String, Vec<Entity>> = HashMap::from([("SHARED".to_string(), result2.entities)]);
    let names2 = merger.merge(grouped2, &bus2, "doc-2").await.unwrap();
    updater.update("doc-2", names2, vec![]).await.unwrap();

    let doc1_entities = full_entities.get_by_id("doc-1").await.unwrap().unwrap();
    let doc2_entities = full_entities.get_by_id("doc-2").await.unwrap().unwrap();
    assert_eq!(doc1_entities.items, vec!["SHARED".to_string()]);
    assert_eq!(doc2_entities.items, vec!["SHARED".to_string()]);

    let chunk_history = entity_chunks.get_by_id("SHARED").await.unwrap().unwrap();
    assert_eq!(chunk_history.chunk_ids.len(), 1, "the shared chunk id is recorded once, not once per document");

    let node: GraphNodeData = graph.get_node(&ids::entity_id("SHARED")).await.unwrap().unwrap();
    assert!(node.file_path.contains(&"doc2.txt".to_string()));
}
