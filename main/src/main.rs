//! Composes every collaborator and index into a single worker process: load
//! `AppConfig`, enqueue any file paths given on the command line, then drain
//! the persistent task queue until interrupted.

use std::sync::Arc;

use common::cancellation::CancellationRoots;
use common::collaborators::memory::{InMemoryGraphStore, InMemoryVectorStore};
use common::collaborators::openai::{OpenAiEmbeddingClient, OpenAiLlmClient};
use common::config::get_config;
use common::kv::JsonFileKvStore;
use ingestion_pipeline::merge::{DescriptionMergeConfig, EntityMergeConfig, RelationMergeConfig};
use ingestion_pipeline::{ChunkProcessorConfig, ChunkerConfig, Orchestrator, OrchestratorConfig, OrchestratorDeps};
use task_queue::{ProcessorConfig, TaskProcessor, TaskQueue, TaskStateStore};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    std::fs::create_dir_all(&config.working_dir)?;

    let llm = Arc::new(OpenAiLlmClient::new(&config));
    let embedder = Arc::new(OpenAiEmbeddingClient::new(&config));
    let graph = Arc::new(InMemoryGraphStore::new());
    let vector = Arc::new(InMemoryVectorStore::new());

    let text_chunks = JsonFileKvStore::open(&config.working_dir, "text_chunks").await?;
    let full_docs = JsonFileKvStore::open(&config.working_dir, "full_docs").await?;
    let llm_cache = JsonFileKvStore::open(&config.working_dir, "llm_cache").await?;
    let entity_chunks = JsonFileKvStore::open(&config.working_dir, "entity_chunks").await?;
    let relation_chunks = JsonFileKvStore::open(&config.working_dir, "relation_chunks").await?;
    let full_entities = JsonFileKvStore::open(&config.working_dir, "full_entities").await?;
    let full_relations = JsonFileKvStore::open(&config.working_dir, "full_relations").await?;

    let description_config = DescriptionMergeConfig {
        summary_context_size: config.summary_context_size,
        summary_max_tokens: config.summary_max_tokens,
        force_llm_summary_on_merge: config.force_llm_summary_on_merge,
        summary_length_recommended: config.summary_length_recommended,
    };

    let deps = OrchestratorDeps {
        llm,
        embedder,
        graph,
        vector,
        text_chunks,
        full_docs,
        llm_cache,
        entity_chunks,
        relation_chunks,
        full_entities,
        full_relations,
        entity_types: config.entity_types.clone(),
        config: OrchestratorConfig {
            chunker: ChunkerConfig {
                chunk_token_size: config.chunk_token_size,
                chunk_overlap_token_size: config.chunk_overlap_token_size,
            },
            chunk_processing_concurrency: config.chunk_processing_concurrency,
        },
        chunk_processor_config: ChunkProcessorConfig {
            entity_extraction_temperature: 0.3,
            max_entities: Some(config.max_entities),
            max_relationships: Some(config.max_relationships),
        },
        entity_merge_config: EntityMergeConfig {
            max_source_ids_per_entity: config.max_source_ids_per_entity,
            max_file_paths: config.max_file_paths,
            method: config.source_ids_limit_method.clone(),
            description: description_config.clone(),
        },
        relation_merge_config: RelationMergeConfig {
            max_source_ids_per_relation: config.max_source_ids_per_relation,
            max_file_paths: config.max_file_paths,
            method: config.source_ids_limit_method.clone(),
            description: description_config,
        },
    };

    let orchestrator = Arc::new(Orchestrator::new(deps));

    let state_store = Arc::new(TaskStateStore::open(&config.working_dir).await?);
    let queue = Arc::new(TaskQueue::open(state_store).await?);

    for path in std::env::args().skip(1) {
        let content = std::fs::read_to_string(&path)?;
        let task_id = queue.enqueue(path.clone(), content, path.clone()).await?;
        tracing::info!(task_id = %task_id, file_path = %path, "enqueued document from command line");
    }

    let cancellation_roots = CancellationRoots::new();
    let processor = Arc::new(TaskProcessor::new(
        Arc::clone(&queue),
        orchestrator,
        cancellation_roots,
        ProcessorConfig {
            poll_interval: std::time::Duration::from_secs(config.task_poll_interval_secs),
            retry_base_delay_ms: config.retry_base_delay_ms,
            retry_max_delay_ms: config.retry_max_delay_ms,
        },
    ));

    let run_processor = Arc::clone(&processor);
    let run_handle = tokio::spawn(async move { run_processor.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    processor.trigger_shutdown();
    run_handle.await?;

    Ok(())
}
