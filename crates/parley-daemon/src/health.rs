//! `GET`/`HEAD /health` liveness probe, served alongside the Telegram
//! long-poll loop so deployment tooling has something to point a
//! readiness check at. Deliberately undecorated: plain `"OK"` body, no
//! request tracing, since every orchestrator's probe interval would
//! otherwise flood the log with identical lines.

use axum::{routing::get, Router};

pub fn router() -> Router {
    Router::new().route("/health", get(health_handler))
}

async fn health_handler() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handler_returns_plain_ok_body() {
        assert_eq!(health_handler().await, "OK");
    }
}
