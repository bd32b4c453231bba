use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::domain::{Entity, Relation};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    Entity,
    Relation,
}

impl DescriptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DescriptionKind::Entity => "Entity",
            DescriptionKind::Relation => "Relation",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Everything the pipeline asks of a language model. Implementations are
/// injected; the core never constructs one directly.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String, AppError>;

    async fn generate_stream(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError>;

    /// `entity_types` is the enumerated type set from config; chunk content
    /// and chunk id are supplied so the extracted entities/relations can be
    /// stamped with `source_id`/`timestamp` by the caller.
    async fn extract_entities_and_relations(
        &self,
        text: &str,
        entity_types: &[String],
        temperature: f32,
        max_entities: Option<usize>,
        max_relationships: Option<usize>,
    ) -> Result<ExtractionResult, AppError>;

    async fn summarise(
        &self,
        kind: DescriptionKind,
        name: &str,
        descriptions: &[String],
        target_len: usize,
    ) -> Result<String, AppError>;
}
