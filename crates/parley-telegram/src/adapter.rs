//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling event
//! loop until the process exits.

use dashmap::DashMap;
use parley_core::config::TelegramConfig;
use teloxide::prelude::*;
use tracing::info;

use crate::context::AppContext;
use crate::handler::{handle_message, MediaGroupBuffers};

/// Wraps a teloxide `Bot` and drives the Dispatcher event loop until the
/// process exits. Long polling — no public URL required.
pub struct TelegramAdapter {
    ctx: AppContext,
    config: TelegramConfig,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig, ctx: AppContext) -> Self {
        Self { ctx, config }
    }

    /// Connect to Telegram and drive the long-polling loop until
    /// `shutdown` fires, then returns once the current update batch
    /// finishes.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let bot = Bot::new(&self.config.bot_token);
        let groups: MediaGroupBuffers = std::sync::Arc::new(DashMap::new());

        info!("telegram: starting long-polling dispatcher");

        let handler = Update::filter_message().endpoint(handle_message);

        let mut dispatcher = Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![self.ctx, self.config, groups])
            .default_handler(|_upd| async {})
            .build();

        let shutdown_token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            let _ = shutdown.changed().await;
            shutdown_token.shutdown().ok();
        });

        dispatcher.dispatch().await;
        info!("telegram: dispatcher stopped");
    }
}
