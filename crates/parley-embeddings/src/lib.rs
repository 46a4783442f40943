pub mod client;
pub mod error;
pub mod similarity;

pub use client::{EmbeddingClient, OpenAiEmbeddingClient};
pub use error::{EmbeddingError, Result};
pub use similarity::cosine_similarity;
