use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorQueryResult {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Value,
    pub content: String,
}

/// Collection names mirror the persisted-layout convention so existing
/// external tooling built against that naming keeps working.
pub fn collection_name(base: &str, dim: u32) -> String {
    format!("lightrag_vdb_dotnet_{base}_{dim}d")
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), AppError>;
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorQueryResult>, AppError>;
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), AppError>;
    async fn get_by_id(&self, collection: &str, ids: &[String]) -> Result<Vec<VectorRecord>, AppError>;
}
