use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{error, info};

use crate::cache::Cache;

/// Drives the periodic write-back of a [`Cache`] to its backing store.
///
/// Owns the connection outright — the cache's dirty sets are the only
/// handle any other task needs, so there is no reason to share the
/// connection beyond this loop.
pub struct SyncEngine {
    cache: Arc<Cache>,
    conn: Mutex<Connection>,
    interval_secs: u64,
}

impl SyncEngine {
    pub fn new(cache: Arc<Cache>, conn: Connection, interval_secs: u64) -> Self {
        Self {
            cache,
            conn: Mutex::new(conn),
            interval_secs,
        }
    }

    fn tick(&self) {
        let mut conn = self.conn.lock().unwrap();
        if let Err(e) = self.cache.sync_once(&mut conn) {
            error!("cache sync cycle failed: {e}");
        }
    }

    /// Runs until `shutdown` broadcasts `true`, then performs one last
    /// sync so nothing written in the final turn is lost.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("cache sync engine started");
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cache sync engine shutting down, running final sync");
                        self.tick();
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{Role, UserId};
    use parley_store::schema::init_db;

    #[test]
    fn tick_persists_a_new_session_and_message() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let cache = Arc::new(Cache::new());
        let session = cache.create_session(UserId(1), "default", "hi there");
        cache.add_message(session.id, Role::User, "hello");

        let engine = SyncEngine::new(cache.clone(), conn, 30);
        engine.tick();

        let conn2 = engine.conn.lock().unwrap();
        let sessions = parley_store::Store::load_sessions(&conn2, 1, "default").unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].id > 0);
    }
}
