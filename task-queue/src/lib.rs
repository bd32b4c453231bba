//! Persistent task queue: durable state storage, the in-memory priority
//! queue built on top of it, and the worker loop that drains it through an
//! injected ingestion orchestrator.

pub mod processor;
pub mod queue;
pub mod state_store;

pub use processor::{ProcessorConfig, TaskProcessor};
pub use queue::{TaskChangeEvent, TaskQueue};
pub use state_store::TaskStateStore;
