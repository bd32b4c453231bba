use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{GraphEdgeData, GraphNodeData};
use crate::error::AppError;

/// Edges are undirected; every implementation must tolerate either
/// orientation on read (`get_edge(a, b) == get_edge(b, a)`).
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn has_node(&self, id: &str) -> Result<bool, AppError>;
    async fn get_node(&self, id: &str) -> Result<Option<GraphNodeData>, AppError>;
    async fn upsert_node(&self, id: &str, props: GraphNodeData) -> Result<(), AppError>;

    async fn has_edge(&self, a: &str, b: &str) -> Result<bool, AppError>;
    async fn get_edge(&self, a: &str, b: &str) -> Result<Option<GraphEdgeData>, AppError>;
    async fn upsert_edge(&self, a: &str, b: &str, props: GraphEdgeData) -> Result<(), AppError>;

    async fn get_nodes_batch(&self, ids: &[String]) -> Result<HashMap<String, GraphNodeData>, AppError>;
    async fn get_node_degrees_batch(&self, ids: &[String]) -> Result<HashMap<String, usize>, AppError>;
    async fn get_nodes_edges_batch(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<(String, String)>>, AppError>;
    async fn get_edges_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<HashMap<(String, String), GraphEdgeData>, AppError>;
}
