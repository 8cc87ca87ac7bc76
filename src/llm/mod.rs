pub mod backend;
pub mod client;
pub mod gateway;
pub mod health;
pub mod ollama;
pub mod orchestrator;
pub mod prompt;

pub use backend::{create_backend, GenerateOptions, HealthStatus, LlmBackend, ProviderKind};
pub use gateway::{Gateway, RetryPolicy};
pub use orchestrator::{CancelToken, Orchestrator, Selection};
