pub mod error;
pub mod impls;
pub mod registry;

pub use error::{Result, ToolError};
pub use impls::{FetchTool, MemoryTool, SearchTool, TtsTool, VoiceClip, WikipediaTool};
pub use registry::{Tool, ToolOutcome, ToolRegistry};
