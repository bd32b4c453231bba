pub mod embedding;
pub mod graph_store;
pub mod llm;
pub mod memory;
pub mod openai;
pub mod vector_store;

pub use embedding::EmbeddingClient;
pub use graph_store::GraphStore;
pub use llm::LlmClient;
pub use vector_store::VectorStore;
