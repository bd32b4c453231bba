//! Production-shaped collaborator implementations wired against the real
//! OpenAI API, the way the teacher's `enricher`/`embedding` modules wire
//! `async_openai::Client`. These are the only implementations in the
//! workspace that reach out over the network; the core never depends on
//! them directly, only on the `LlmClient`/`EmbeddingClient` traits.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs, ResponseFormat,
    ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use serde_json::json;

use crate::config::AppConfig;
use crate::error::AppError;

use super::embedding::EmbeddingClient;
use super::llm::{DescriptionKind, ExtractionResult, GenerateOptions, LlmClient};

pub struct OpenAiEmbeddingClient {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: u32,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: &AppConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.openai_api_key.clone())
            .with_api_base(config.openai_base_url.clone());
        Self {
            client: Client::with_config(openai_config),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        Ok(self.embed_batch(std::slice::from_ref(&text.to_string())).await?.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions)
            .input(texts.to_vec())
            .build()?;

        let response = self.client.embeddings().create(request).await?;
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    chat_model: String,
}

impl OpenAiLlmClient {
    pub fn new(config: &AppConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.openai_api_key.clone())
            .with_api_base(config.openai_base_url.clone());
        Self {
            client: Client::with_config(openai_config),
            chat_model: config.chat_model.clone(),
        }
    }

    fn extraction_schema(max_entities: Option<usize>, max_relationships: Option<usize>) -> serde_json::Value {
        let _ = (max_entities, max_relationships); // enforced post-hoc, the schema itself has no bound keyword
        json!({
            "type": "object",
            "properties": {
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "entity_type": { "type": "string" },
                            "description": { "type": "string" }
                        },
                        "required": ["name", "entity_type", "description"],
                        "additionalProperties": false
                    }
                },
                "relations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "source_name": { "type": "string" },
                            "target_name": { "type": "string" },
                            "keywords": { "type": "array", "items": { "type": "string" } },
                            "description": { "type": "string" },
                            "weight": { "type": "number" }
                        },
                        "required": ["source_name", "target_name", "keywords", "description", "weight"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["entities", "relations"],
            "additionalProperties": false
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String, AppError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.chat_model)
            .temperature(options.temperature)
            .messages([ChatCompletionRequestUserMessage::from(prompt).into()]);
        if let Some(max_tokens) = options.max_tokens {
            builder.max_tokens(max_tokens);
        }
        let request = builder.build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::InternalError("no content in chat completion response".into()))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError> {
        // The core pipeline never streams; this exists solely to satisfy the
        // LLMClient contract for callers outside the ingestion core.
        let text = self.generate(prompt, options).await?;
        Ok(Box::pin(stream::iter(vec![Ok(text)])))
    }

    async fn extract_entities_and_relations(
        &self,
        text: &str,
        entity_types: &[String],
        temperature: f32,
        max_entities: Option<usize>,
        max_relationships: Option<usize>,
    ) -> Result<ExtractionResult, AppError> {
        let system_message = format!(
            "Extract knowledge-graph entities and relations from the supplied text. \
             Use only these entity types when applicable, otherwise \"UNKNOWN\": {}.",
            entity_types.join(", ")
        );

        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Entities and relations extracted from a document chunk".into()),
                name: "chunk_extraction".into(),
                schema: Some(Self::extraction_schema(max_entities, max_relationships)),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .temperature(temperature)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_message).into(),
                ChatCompletionRequestUserMessage::from(text).into(),
            ])
            .response_format(response_format)
            .build()?;

        let response = self.client.chat().create(request).await?;
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| AppError::InternalError("no content in extraction response".into()))?;

        #[derive(serde::Deserialize)]
        struct RawEntity {
            name: String,
            entity_type: String,
            description: String,
        }
        #[derive(serde::Deserialize)]
        struct RawRelation {
            source_name: String,
            target_name: String,
            keywords: Vec<String>,
            description: String,
            weight: f64,
        }
        #[derive(serde::Deserialize)]
        struct RawResult {
            entities: Vec<RawEntity>,
            relations: Vec<RawRelation>,
        }

        let raw: RawResult = serde_json::from_str(content)
            .map_err(|e| AppError::InternalError(format!("failed to parse extraction result: {e}")))?;

        let now = chrono::Utc::now().timestamp();
        let mut entities: Vec<crate::domain::Entity> = raw
            .entities
            .into_iter()
            .map(|e| crate::domain::Entity {
                name: e.name,
                entity_type: e.entity_type,
                description: e.description,
                source_id: String::new(),
                file_path: String::new(),
                timestamp: now,
            })
            .collect();
        if let Some(limit) = max_entities {
            entities.truncate(limit);
        }

        let mut relations: Vec<crate::domain::Relation> = raw
            .relations
            .into_iter()
            .filter(|r| r.source_name != r.target_name)
            .map(|r| crate::domain::Relation {
                source_name: r.source_name,
                target_name: r.target_name,
                keywords: r.keywords,
                description: r.description,
                weight: r.weight,
                source_chunk_id: String::new(),
                file_path: String::new(),
                timestamp: now,
            })
            .collect();
        if let Some(limit) = max_relationships {
            relations.truncate(limit);
        }

        Ok(ExtractionResult { entities, relations })
    }

    async fn summarise(
        &self,
        kind: DescriptionKind,
        name: &str,
        descriptions: &[String],
        target_len: usize,
    ) -> Result<String, AppError> {
        let joined = descriptions.join("\n---\n");
        let prompt = format!(
            "Summarise the following {} descriptions of \"{}\" into a single coherent description of about {} tokens:\n{}",
            kind.as_str(),
            name,
            target_len,
            joined
        );
        self.generate(
            &prompt,
            GenerateOptions {
                temperature: 0.2,
                max_tokens: Some((target_len as u32).saturating_mul(2).max(64)),
            },
        )
        .await
    }
}
