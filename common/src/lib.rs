pub mod atomic_file;
pub mod cancellation;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error;
pub mod ids;
pub mod kv;
pub mod orchestrator;
pub mod progress;
pub mod retry;

pub use error::AppError;
