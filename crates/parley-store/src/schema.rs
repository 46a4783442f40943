use rusqlite::Connection;

use crate::error::Result;

/// Initialise every table and index. Safe to call on every startup —
/// additive only, `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_user_settings(conn)?;
    create_personas(conn)?;
    create_sessions(conn)?;
    create_conversation_messages(conn)?;
    create_persona_token_usage(conn)?;
    create_memories(conn)?;
    Ok(())
}

fn create_user_settings(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_settings (
            user_id             INTEGER PRIMARY KEY,
            api_key             TEXT,
            base_url            TEXT,
            model               TEXT,
            temperature         REAL NOT NULL DEFAULT 0.7,
            token_limit         INTEGER NOT NULL DEFAULT 0,
            current_persona     TEXT NOT NULL DEFAULT 'default',
            enabled_tools       TEXT NOT NULL DEFAULT 'memory,url_fetch,web_search,wikipedia_search,tts',
            title_model         TEXT,
            tts_voice           TEXT,
            tts_style           TEXT,
            tts_endpoint        TEXT,
            api_presets         TEXT NOT NULL DEFAULT '{}',
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_personas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS personas (
            user_id              INTEGER NOT NULL,
            name                 TEXT NOT NULL,
            system_prompt        TEXT NOT NULL DEFAULT '',
            current_session_id   INTEGER,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL,
            PRIMARY KEY (user_id, name)
        );
        CREATE INDEX IF NOT EXISTS idx_personas_user ON personas(user_id);",
    )?;
    Ok(())
}

fn create_sessions(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       INTEGER NOT NULL,
            persona_name  TEXT NOT NULL,
            title         TEXT NOT NULL DEFAULT '',
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_persona
            ON sessions(user_id, persona_name);",
    )?;
    Ok(())
}

fn create_conversation_messages(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id  INTEGER NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conv_session
            ON conversation_messages(session_id, created_at, id);",
    )?;
    Ok(())
}

fn create_persona_token_usage(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS persona_token_usage (
            user_id           INTEGER NOT NULL,
            persona_name      TEXT NOT NULL,
            prompt_tokens     INTEGER NOT NULL DEFAULT 0,
            completion_tokens INTEGER NOT NULL DEFAULT 0,
            total_tokens      INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, persona_name)
        );",
    )?;
    Ok(())
}

fn create_memories(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL,
            content     TEXT NOT NULL,
            source      TEXT NOT NULL,
            embedding   TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }
}
