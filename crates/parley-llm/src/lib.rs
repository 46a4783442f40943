pub mod error;
pub mod factory;
pub mod openai;
pub mod provider;
pub mod types;

pub use error::{LlmError, Result};
pub use factory::{LlmFactory, OpenAiProviderFactory};
pub use openai::OpenAiProvider;
pub use provider::LlmProvider;
pub use types::{ChatMessage, ChatRequest, ImageAttachment, StreamChunk, StreamEvent, ToolCall, ToolDefinition, Usage};
