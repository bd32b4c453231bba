use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceIdsLimitMethod {
    Fifo,
    Keep,
}

impl Default for SourceIdsLimitMethod {
    fn default() -> Self {
        SourceIdsLimitMethod::Fifo
    }
}

/// Ingestion pipeline and task queue configuration, loaded the way the teacher
/// loads `AppConfig`: a `config.{toml,yaml,...}` file layered under process
/// environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    #[serde(default = "default_chunk_token_size")]
    pub chunk_token_size: usize,
    #[serde(default = "default_chunk_overlap_token_size")]
    pub chunk_overlap_token_size: usize,

    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    #[serde(default = "default_max_relationships")]
    pub max_relationships: usize,

    #[serde(default = "default_max_source_ids_per_entity")]
    pub max_source_ids_per_entity: usize,
    #[serde(default = "default_max_source_ids_per_relation")]
    pub max_source_ids_per_relation: usize,
    #[serde(default = "default_max_file_paths")]
    pub max_file_paths: usize,
    #[serde(default)]
    pub source_ids_limit_method: SourceIdsLimitMethod,

    #[serde(default = "default_summary_context_size")]
    pub summary_context_size: usize,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,
    #[serde(default = "default_force_llm_summary_on_merge")]
    pub force_llm_summary_on_merge: usize,
    #[serde(default = "default_summary_length_recommended")]
    pub summary_length_recommended: usize,

    #[serde(default = "default_chunk_processing_concurrency")]
    pub chunk_processing_concurrency: usize,
    #[serde(default = "default_entity_embedding_concurrency")]
    pub entity_embedding_concurrency: usize,

    #[serde(default = "default_task_poll_interval_secs")]
    pub task_poll_interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,

    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
}

fn default_working_dir() -> String {
    "./data".to_string()
}
fn default_chunk_token_size() -> usize {
    1200
}
fn default_chunk_overlap_token_size() -> usize {
    100
}
fn default_max_entities() -> usize {
    40
}
fn default_max_relationships() -> usize {
    40
}
fn default_max_source_ids_per_entity() -> usize {
    20
}
fn default_max_source_ids_per_relation() -> usize {
    20
}
fn default_max_file_paths() -> usize {
    10
}
fn default_summary_context_size() -> usize {
    2000
}
fn default_summary_max_tokens() -> usize {
    500
}
fn default_force_llm_summary_on_merge() -> usize {
    4
}
fn default_summary_length_recommended() -> usize {
    200
}
fn default_chunk_processing_concurrency() -> usize {
    8
}
fn default_entity_embedding_concurrency() -> usize {
    8
}
fn default_task_poll_interval_secs() -> u64 {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_entity_types() -> Vec<String> {
    [
        "PERSON",
        "ORGANIZATION",
        "LOCATION",
        "EVENT",
        "CONCEPT",
        "TECHNOLOGY",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dimensions() -> u32 {
    1536
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

pub fn get_config() -> Result<AppConfig, AppError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    Ok(config.try_deserialize()?)
}
