use async_trait::async_trait;

use crate::error::AppError;

/// All vectors returned by a given implementation share a fixed dimension
/// `D`, matching the vector-store configuration it is paired with.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
    fn dimensions(&self) -> u32;
}
