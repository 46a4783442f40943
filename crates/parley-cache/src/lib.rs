pub mod cache;
pub mod dirty;
pub mod error;
pub mod sync;
pub mod types;

pub use cache::Cache;
pub use error::{CacheError, Result};
pub use sync::SyncEngine;
pub use types::{ApiPreset, ConversationMessage, Memory, Persona, PersonaTokenUsage, Session, UserSettings};
