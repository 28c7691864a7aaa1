pub mod openrouter;
pub mod traits;

pub use openrouter::OpenRouterClient;
pub use traits::{ChatMessage, LlmClient, LlmError, Role};
