//! Assembles the shared tool registry plus the concrete TTS tool the
//! pipeline needs to drain pending voice clips after a turn.

use std::sync::Arc;

use parley_core::config::ToolsConfig;
use parley_services::Services;
use parley_tools::{FetchTool, MemoryTool, SearchTool, Tool, ToolRegistry, TtsTool, WikipediaTool};

pub fn build_tools(config: &ToolsConfig, services: Arc<Services>) -> (Arc<ToolRegistry>, Arc<TtsTool>) {
    let client = reqwest::Client::new();

    let tts = Arc::new(TtsTool::new(client.clone(), config.tts.clone(), Arc::clone(&services)));

    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(MemoryTool::new(Arc::clone(&services))),
        Arc::new(SearchTool::new(client.clone(), config.search.clone())),
        Arc::new(FetchTool::new(config.fetch.clone())),
        Arc::new(WikipediaTool::new(client)),
        tts.clone(),
    ];

    (Arc::new(ToolRegistry::new(tools)), tts)
}
