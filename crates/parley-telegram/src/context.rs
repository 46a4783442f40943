//! Shared application handles threaded through the Telegram dispatcher via
//! `dptree::deps!`.
//!
//! There is exactly one channel in this system, so (unlike a multi-channel
//! adapter that would abstract this behind a trait) the handler just takes
//! this struct directly.

use std::sync::Arc;

use parley_llm::LlmFactory;
use parley_pipeline::ChatPipeline;
use parley_services::Services;
use parley_tools::ToolRegistry;

#[derive(Clone)]
pub struct AppContext {
    pub services: Arc<Services>,
    pub llm_factory: Arc<dyn LlmFactory>,
    pub tools: Arc<ToolRegistry>,
    pub pipeline: Arc<ChatPipeline>,
}
