use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

use crate::error::Result;
use crate::rows::{
    ApiPreset, ConversationMessageRow, MemoryRow, PersonaRow, PersonaTokenUsageRow, SessionRow,
    UserSettingsRow,
};

/// Typed, no-business-logic access to the five relational tables. Every
/// method takes `&Connection` rather than owning one — the cache owns
/// connection lifetime and transaction boundaries.
pub struct Store;

impl Store {
    pub fn load_user_settings(conn: &Connection, user_id: i64) -> Result<Option<UserSettingsRow>> {
        conn.query_row(
            "SELECT user_id, api_key, base_url, model, temperature, token_limit,
                    current_persona, enabled_tools, title_model, tts_voice,
                    tts_style, tts_endpoint, api_presets, created_at, updated_at
             FROM user_settings WHERE user_id = ?1",
            params![user_id],
            row_to_user_settings,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn load_all_user_settings(conn: &Connection) -> Result<Vec<UserSettingsRow>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, api_key, base_url, model, temperature, token_limit,
                    current_persona, enabled_tools, title_model, tts_voice,
                    tts_style, tts_endpoint, api_presets, created_at, updated_at
             FROM user_settings",
        )?;
        let rows = stmt
            .query_map([], row_to_user_settings)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn upsert_user_settings(conn: &Connection, row: &UserSettingsRow) -> Result<()> {
        let presets_json = serde_json::to_string(&row.api_presets)?;
        conn.execute(
            "INSERT INTO user_settings
                (user_id, api_key, base_url, model, temperature, token_limit,
                 current_persona, enabled_tools, title_model, tts_voice,
                 tts_style, tts_endpoint, api_presets, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
             ON CONFLICT(user_id) DO UPDATE SET
                api_key=excluded.api_key, base_url=excluded.base_url,
                model=excluded.model, temperature=excluded.temperature,
                token_limit=excluded.token_limit, current_persona=excluded.current_persona,
                enabled_tools=excluded.enabled_tools, title_model=excluded.title_model,
                tts_voice=excluded.tts_voice, tts_style=excluded.tts_style,
                tts_endpoint=excluded.tts_endpoint, api_presets=excluded.api_presets,
                updated_at=excluded.updated_at",
            params![
                row.user_id,
                row.api_key,
                row.base_url,
                row.model,
                row.temperature,
                row.token_limit,
                row.current_persona,
                row.enabled_tools,
                row.title_model,
                row.tts_voice,
                row.tts_style,
                row.tts_endpoint,
                presets_json,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn load_personas(conn: &Connection, user_id: i64) -> Result<Vec<PersonaRow>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, name, system_prompt, current_session_id, created_at, updated_at
             FROM personas WHERE user_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_persona)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn load_all_personas(conn: &Connection) -> Result<Vec<PersonaRow>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, name, system_prompt, current_session_id, created_at, updated_at
             FROM personas",
        )?;
        let rows = stmt
            .query_map([], row_to_persona)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn upsert_persona(conn: &Connection, row: &PersonaRow) -> Result<()> {
        conn.execute(
            "INSERT INTO personas (user_id, name, system_prompt, current_session_id, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(user_id, name) DO UPDATE SET
                system_prompt=excluded.system_prompt,
                current_session_id=excluded.current_session_id,
                updated_at=excluded.updated_at",
            params![
                row.user_id,
                row.name,
                row.system_prompt,
                row.current_session_id,
                row.created_at,
                row.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn delete_persona(conn: &Connection, user_id: i64, name: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM personas WHERE user_id = ?1 AND name = ?2",
            params![user_id, name],
        )?;
        conn.execute(
            "DELETE FROM persona_token_usage WHERE user_id = ?1 AND persona_name = ?2",
            params![user_id, name],
        )?;
        let session_ids: Vec<i64> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM sessions WHERE user_id = ?1 AND persona_name = ?2",
            )?;
            stmt.query_map(params![user_id, name], |r| r.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };
        for sid in session_ids {
            conn.execute(
                "DELETE FROM conversation_messages WHERE session_id = ?1",
                params![sid],
            )?;
        }
        conn.execute(
            "DELETE FROM sessions WHERE user_id = ?1 AND persona_name = ?2",
            params![user_id, name],
        )?;
        Ok(())
    }

    pub fn load_sessions(conn: &Connection, user_id: i64, persona_name: &str) -> Result<Vec<SessionRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, persona_name, title, created_at
             FROM sessions WHERE user_id = ?1 AND persona_name = ?2
             ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![user_id, persona_name], row_to_session)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn load_all_sessions(conn: &Connection) -> Result<Vec<SessionRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, persona_name, title, created_at FROM sessions",
        )?;
        let rows = stmt
            .query_map([], row_to_session)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Insert a brand-new session and return the store-assigned id.
    pub fn insert_session(conn: &Connection, user_id: i64, persona_name: &str, title: &str, created_at: &str) -> Result<i64> {
        conn.execute(
            "INSERT INTO sessions (user_id, persona_name, title, created_at) VALUES (?1,?2,?3,?4)",
            params![user_id, persona_name, title, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_session_title(conn: &Connection, session_id: i64, title: &str) -> Result<()> {
        conn.execute(
            "UPDATE sessions SET title = ?1 WHERE id = ?2",
            params![title, session_id],
        )?;
        Ok(())
    }

    pub fn delete_session(conn: &Connection, session_id: i64) -> Result<()> {
        conn.execute(
            "DELETE FROM conversation_messages WHERE session_id = ?1",
            params![session_id],
        )?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(())
    }

    pub fn count_conversation_messages(conn: &Connection, session_id: i64) -> Result<usize> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversation_messages WHERE session_id = ?1",
            params![session_id],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn insert_conversation_message(conn: &Connection, session_id: i64, role: &str, content: &str, created_at: &str) -> Result<i64> {
        conn.execute(
            "INSERT INTO conversation_messages (session_id, role, content, created_at) VALUES (?1,?2,?3,?4)",
            params![session_id, role, content, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn load_conversation_messages(conn: &Connection, session_id: i64) -> Result<Vec<ConversationMessageRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, created_at
             FROM conversation_messages WHERE session_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![session_id], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn clear_conversation(conn: &Connection, session_id: i64) -> Result<()> {
        conn.execute(
            "DELETE FROM conversation_messages WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    pub fn upsert_persona_token_usage(conn: &Connection, row: &PersonaTokenUsageRow) -> Result<()> {
        conn.execute(
            "INSERT INTO persona_token_usage (user_id, persona_name, prompt_tokens, completion_tokens, total_tokens)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(user_id, persona_name) DO UPDATE SET
                prompt_tokens=excluded.prompt_tokens,
                completion_tokens=excluded.completion_tokens,
                total_tokens=excluded.total_tokens",
            params![row.user_id, row.persona_name, row.prompt_tokens, row.completion_tokens, row.total_tokens],
        )?;
        Ok(())
    }

    pub fn load_persona_token_usage(conn: &Connection, user_id: i64) -> Result<Vec<PersonaTokenUsageRow>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, persona_name, prompt_tokens, completion_tokens, total_tokens
             FROM persona_token_usage WHERE user_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(PersonaTokenUsageRow {
                    user_id: row.get(0)?,
                    persona_name: row.get(1)?,
                    prompt_tokens: row.get(2)?,
                    completion_tokens: row.get(3)?,
                    total_tokens: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn load_all_persona_token_usage(conn: &Connection) -> Result<Vec<PersonaTokenUsageRow>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, persona_name, prompt_tokens, completion_tokens, total_tokens
             FROM persona_token_usage",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PersonaTokenUsageRow {
                    user_id: row.get(0)?,
                    persona_name: row.get(1)?,
                    prompt_tokens: row.get(2)?,
                    completion_tokens: row.get(3)?,
                    total_tokens: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn insert_memory(conn: &Connection, user_id: i64, content: &str, source: &str, embedding: Option<&[f32]>, created_at: &str) -> Result<i64> {
        let embedding_json = match embedding {
            Some(v) => Some(serde_json::to_string(v)?),
            None => None,
        };
        conn.execute(
            "INSERT INTO memories (user_id, content, source, embedding, created_at) VALUES (?1,?2,?3,?4,?5)",
            params![user_id, content, source, embedding_json, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn delete_memory(conn: &Connection, memory_id: i64) -> Result<()> {
        conn.execute("DELETE FROM memories WHERE id = ?1", params![memory_id])?;
        Ok(())
    }

    pub fn clear_memories(conn: &Connection, user_id: i64) -> Result<()> {
        conn.execute("DELETE FROM memories WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }

    pub fn load_memories(conn: &Connection, user_id: i64) -> Result<Vec<MemoryRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, content, source, embedding, created_at
             FROM memories WHERE user_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_memory)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn load_all_memories(conn: &Connection) -> Result<Vec<MemoryRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, content, source, embedding, created_at FROM memories",
        )?;
        let rows = stmt
            .query_map([], row_to_memory)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

fn row_to_user_settings(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserSettingsRow> {
    let presets_json: String = row.get(12)?;
    let api_presets: HashMap<String, ApiPreset> =
        serde_json::from_str(&presets_json).unwrap_or_default();
    Ok(UserSettingsRow {
        user_id: row.get(0)?,
        api_key: row.get(1)?,
        base_url: row.get(2)?,
        model: row.get(3)?,
        temperature: row.get(4)?,
        token_limit: row.get(5)?,
        current_persona: row.get(6)?,
        enabled_tools: row.get(7)?,
        title_model: row.get(8)?,
        tts_voice: row.get(9)?,
        tts_style: row.get(10)?,
        tts_endpoint: row.get(11)?,
        api_presets,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn row_to_persona(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonaRow> {
    Ok(PersonaRow {
        user_id: row.get(0)?,
        name: row.get(1)?,
        system_prompt: row.get(2)?,
        current_session_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        persona_name: row.get(2)?,
        title: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationMessageRow> {
    Ok(ConversationMessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    let embedding_json: Option<String> = row.get(4)?;
    let embedding = match embedding_json {
        Some(s) => serde_json::from_str(&s).ok(),
        None => None,
    };
    Ok(MemoryRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        source: row.get(3)?,
        embedding,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::init_db;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        init_db(&c).unwrap();
        c
    }

    #[test]
    fn session_insert_assigns_positive_id() {
        let c = conn();
        let id = Store::insert_session(&c, 1, "default", "", "2026-01-01T00:00:00Z").unwrap();
        assert!(id > 0);
    }

    #[test]
    fn conversation_messages_are_appended_in_order() {
        let c = conn();
        let sid = Store::insert_session(&c, 1, "default", "", "2026-01-01T00:00:00Z").unwrap();
        Store::insert_conversation_message(&c, sid, "user", "hi", "2026-01-01T00:00:01Z").unwrap();
        Store::insert_conversation_message(&c, sid, "assistant", "hello", "2026-01-01T00:00:02Z").unwrap();
        let msgs = Store::load_conversation_messages(&c, sid).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[1].role, "assistant");
    }

    #[test]
    fn delete_persona_cascades_sessions_and_messages() {
        let c = conn();
        let sid = Store::insert_session(&c, 1, "default", "", "2026-01-01T00:00:00Z").unwrap();
        Store::insert_conversation_message(&c, sid, "user", "hi", "2026-01-01T00:00:01Z").unwrap();
        Store::delete_persona(&c, 1, "default").unwrap();
        assert!(Store::load_sessions(&c, 1, "default").unwrap().is_empty());
        assert!(Store::load_conversation_messages(&c, sid).unwrap().is_empty());
    }

    #[test]
    fn memory_embedding_roundtrips_as_json() {
        let c = conn();
        let id = Store::insert_memory(&c, 1, "likes tea", "user", Some(&[0.1, 0.2, 0.3]), "2026-01-01T00:00:00Z").unwrap();
        let rows = Store::load_memories(&c, 1).unwrap();
        let row = rows.iter().find(|r| r.id == id).unwrap();
        assert_eq!(row.embedding.as_deref(), Some([0.1f32, 0.2, 0.3].as_slice()));
    }
}
