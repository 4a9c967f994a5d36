pub mod auth;
pub mod registry;
pub mod retry;
pub mod scripted;
pub mod traits;

// Re-exports for convenience.
pub use auth::{resolve_credentials, Credentials};
pub use registry::build_provider;
pub use retry::{is_retryable, RetryPolicy, RetryingProvider};
pub use scripted::{ScriptStep, ScriptedProvider};
pub use traits::{collect_text, ChatRequest, CollectedText, LlmProvider};
