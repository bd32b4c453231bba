//! The contract the task processor drives; implemented by
//! `ingestion_pipeline::Orchestrator`. Kept in `common` so `task-queue`
//! (the caller) and `ingestion-pipeline` (the implementer) never need to
//! depend on each other.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cancellation::TaskCancellation;
use crate::error::AppError;
use crate::progress::ProgressBus;

#[async_trait]
pub trait IngestionOrchestrator: Send + Sync {
    /// Ingests `content`, returning the content-addressed `docId`. Returns
    /// immediately with no emitted events if the document was already
    /// ingested (idempotent re-insert).
    async fn insert(
        &self,
        content: String,
        file_path: String,
        progress: Arc<ProgressBus>,
        cancellation: TaskCancellation,
    ) -> Result<String, AppError>;
}
