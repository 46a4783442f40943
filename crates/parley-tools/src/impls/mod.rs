pub mod fetch;
pub mod memory;
pub mod search;
pub mod tts;
pub mod wikipedia;

pub use fetch::FetchTool;
pub use memory::MemoryTool;
pub use search::SearchTool;
pub use tts::{TtsTool, VoiceClip};
pub use wikipedia::WikipediaTool;
