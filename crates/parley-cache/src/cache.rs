use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use parley_core::{MemorySource, Role, SessionId, TempIdCounter, UserId};
use parley_store::rows::{
    ConversationMessageRow, MemoryRow, PersonaRow, PersonaTokenUsageRow, SessionRow, UserSettingsRow,
};
use parley_store::Store;
use rusqlite::Connection;
use tracing::{instrument, warn};

use crate::dirty::DirtySets;
use crate::error::{CacheError, Result};
use crate::types::{ApiPreset, ConversationMessage, Memory, Persona, PersonaTokenUsage, Session, UserSettings};

#[derive(Default)]
struct CacheInner {
    settings: HashMap<UserId, UserSettings>,
    personas: HashMap<(UserId, String), Persona>,
    sessions: HashMap<SessionId, Session>,
    conversations: HashMap<SessionId, Vec<ConversationMessage>>,
    persona_tokens: HashMap<(UserId, String), PersonaTokenUsage>,
    memories: HashMap<UserId, Vec<Memory>>,
    dirty: DirtySets,
}

/// Process-wide in-memory state with dirty-set tracking. The single source
/// of truth during a turn; the store lags behind by up to one sync cycle.
pub struct Cache {
    inner: Mutex<CacheInner>,
    session_ids: TempIdCounter,
    memory_ids: TempIdCounter,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            session_ids: TempIdCounter::new(),
            memory_ids: TempIdCounter::new(),
        }
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }

    // ---- user settings -----------------------------------------------

    #[instrument(skip(self))]
    pub fn get_or_create_settings(&self, user_id: UserId) -> UserSettings {
        let mut inner = self.inner.lock().unwrap();
        inner
            .settings
            .entry(user_id)
            .or_insert_with(|| UserSettings::new_default(user_id, &Self::now()))
            .clone()
    }

    pub fn update_settings<F>(&self, user_id: UserId, f: F)
    where
        F: FnOnce(&mut UserSettings),
    {
        let mut inner = self.inner.lock().unwrap();
        let now = Self::now();
        let settings = inner
            .settings
            .entry(user_id)
            .or_insert_with(|| UserSettings::new_default(user_id, &now));
        f(settings);
        settings.updated_at = now;
        inner.dirty.dirty_settings.insert(user_id);
    }

    pub fn save_api_preset(&self, user_id: UserId, name: String, preset: ApiPreset) {
        self.update_settings(user_id, |s| {
            s.api_presets.insert(name, preset);
        });
    }

    pub fn delete_api_preset(&self, user_id: UserId, name: &str) {
        self.update_settings(user_id, |s| {
            s.api_presets.remove(name);
        });
    }

    // ---- personas -------------------------------------------------------

    /// `default_prompt` seeds `system_prompt` only the moment this persona
    /// is first created; it has no effect on an already-existing one.
    #[instrument(skip(self, default_prompt))]
    pub fn get_or_create_persona(&self, user_id: UserId, name: &str, default_prompt: &str) -> Persona {
        let mut inner = self.inner.lock().unwrap();
        let now = Self::now();
        let key = (user_id, name.to_string());
        let is_new = !inner.personas.contains_key(&key);
        let persona = inner
            .personas
            .entry(key.clone())
            .or_insert_with(|| Persona {
                user_id,
                name: name.to_string(),
                system_prompt: default_prompt.to_string(),
                current_session_id: None,
                created_at: now.clone(),
                updated_at: now.clone(),
            })
            .clone();
        if is_new {
            inner.dirty.dirty_personas.insert(key);
        }
        persona
    }

    pub fn list_personas(&self, user_id: UserId) -> Vec<Persona> {
        let inner = self.inner.lock().unwrap();
        inner
            .personas
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn set_persona_prompt(&self, user_id: UserId, name: &str, prompt: String) {
        let mut inner = self.inner.lock().unwrap();
        let now = Self::now();
        let key = (user_id, name.to_string());
        if let Some(p) = inner.personas.get_mut(&key) {
            p.system_prompt = prompt;
            p.updated_at = now;
        }
        inner.dirty.dirty_personas.insert(key);
    }

    /// Deleting the `"default"` persona is a precondition violation.
    pub fn delete_persona(&self, user_id: UserId, name: &str) -> Result<()> {
        if name == Persona::DEFAULT_NAME {
            return Err(CacheError::PreconditionViolation(
                "the default persona cannot be deleted".to_string(),
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        let key = (user_id, name.to_string());
        inner.personas.remove(&key);
        inner.persona_tokens.remove(&key);
        let session_ids: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.persona_name == name)
            .map(|s| s.id)
            .collect();
        for sid in &session_ids {
            inner.sessions.remove(sid);
            inner.conversations.remove(sid);
        }
        inner.dirty.dirty_personas.remove(&key);
        inner.dirty.deleted_personas.insert(key);
        Ok(())
    }

    // ---- sessions ---------------------------------------------------

    pub fn list_sessions(&self, user_id: UserId, persona_name: &str) -> Vec<Session> {
        let inner = self.inner.lock().unwrap();
        let mut v: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.persona_name == persona_name)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        v
    }

    #[instrument(skip(self))]
    pub fn create_session(&self, user_id: UserId, persona_name: &str, title: &str) -> Session {
        let mut inner = self.inner.lock().unwrap();
        let id = self.session_ids.next();
        let session = Session {
            id,
            user_id,
            persona_name: persona_name.to_string(),
            title: title.to_string(),
            created_at: Self::now(),
        };
        inner.sessions.insert(id, session.clone());
        inner.conversations.insert(id, Vec::new());
        inner.dirty.new_sessions.insert(id);
        let key = (user_id, persona_name.to_string());
        if let Some(p) = inner.personas.get_mut(&key) {
            p.current_session_id = Some(id);
        }
        inner.dirty.dirty_personas.insert(key);
        session
    }

    pub fn rename_session(&self, session_id: SessionId, title: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(s) = inner.sessions.get_mut(&session_id) {
            s.title = title.to_string();
        }
        inner.dirty.dirty_session_titles.insert(session_id);
    }

    pub fn delete_session(&self, session_id: SessionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.remove(&session_id);
        inner.conversations.remove(&session_id);
        inner.dirty.new_sessions.remove(&session_id);
        inner.dirty.dirty_session_titles.remove(&session_id);
        inner.dirty.dirty_conversations.remove(&session_id);
        if !session_id.is_temporary() {
            inner.dirty.deleted_sessions.insert(session_id);
        }
    }

    pub fn set_current_session(&self, user_id: UserId, persona_name: &str, session_id: SessionId) {
        let mut inner = self.inner.lock().unwrap();
        let key = (user_id, persona_name.to_string());
        if let Some(p) = inner.personas.get_mut(&key) {
            p.current_session_id = Some(session_id);
        }
        inner.dirty.dirty_personas.insert(key);
    }

    // ---- conversation -------------------------------------------------

    pub fn add_message(&self, session_id: SessionId, role: Role, content: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .conversations
            .entry(session_id)
            .or_default()
            .push(ConversationMessage {
                session_id,
                role,
                content: content.to_string(),
                created_at: Self::now(),
            });
        inner.dirty.dirty_conversations.insert(session_id);
    }

    pub fn get_history(&self, session_id: SessionId, limit: usize) -> Vec<ConversationMessage> {
        let inner = self.inner.lock().unwrap();
        match inner.conversations.get(&session_id) {
            Some(msgs) => {
                let start = msgs.len().saturating_sub(limit);
                msgs[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Remove the last user+assistant exchange (used by `/retry`).
    /// Returns the popped user message content, if any.
    pub fn pop_last_exchange(&self, session_id: SessionId) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let msgs = inner.conversations.get_mut(&session_id)?;
        let mut user_content = None;
        if matches!(msgs.last(), Some(m) if m.role == Role::Assistant) {
            msgs.pop();
        }
        if matches!(msgs.last(), Some(m) if m.role == Role::User) {
            user_content = msgs.pop().map(|m| m.content);
        }
        inner.dirty.cleared_conversations.insert(session_id);
        inner.dirty.dirty_conversations.remove(&session_id);
        user_content
    }

    pub fn clear_conversation(&self, session_id: SessionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.conversations.insert(session_id, Vec::new());
        inner.dirty.cleared_conversations.insert(session_id);
        inner.dirty.dirty_conversations.remove(&session_id);
    }

    // ---- token usage ----------------------------------------------------

    pub fn add_token_usage(&self, user_id: UserId, persona_name: &str, prompt: i64, completion: i64) {
        let mut inner = self.inner.lock().unwrap();
        let key = (user_id, persona_name.to_string());
        inner.persona_tokens.entry(key.clone()).or_default().add(prompt, completion);
        inner.dirty.dirty_tokens.insert(key);
    }

    pub fn get_persona_token_usage(&self, user_id: UserId, persona_name: &str) -> PersonaTokenUsage {
        let inner = self.inner.lock().unwrap();
        inner
            .persona_tokens
            .get(&(user_id, persona_name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// `None` means unlimited (token_limit == 0).
    pub fn remaining_tokens(&self, user_id: UserId) -> Option<i64> {
        let inner = self.inner.lock().unwrap();
        let settings = inner.settings.get(&user_id)?;
        if settings.token_limit == 0 {
            return None;
        }
        let used: i64 = inner
            .persona_tokens
            .iter()
            .filter(|((uid, _), _)| *uid == user_id)
            .map(|(_, t)| t.total_tokens)
            .sum();
        Some((settings.token_limit - used).max(0))
    }

    // ---- memory ---------------------------------------------------------

    pub fn add_memory(&self, user_id: UserId, content: &str, source: MemorySource, embedding: Option<Vec<f32>>) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = self.memory_ids.next().get();
        inner.memories.entry(user_id).or_default().push(Memory {
            id,
            user_id,
            content: content.to_string(),
            source,
            embedding,
            created_at: Self::now(),
        });
        inner.dirty.new_memories.insert(id);
        id
    }

    pub fn list_memories(&self, user_id: UserId) -> Vec<Memory> {
        let inner = self.inner.lock().unwrap();
        inner.memories.get(&user_id).cloned().unwrap_or_default()
    }

    pub fn delete_memory(&self, user_id: UserId, memory_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(v) = inner.memories.get_mut(&user_id) {
            v.retain(|m| m.id != memory_id);
        }
        if inner.dirty.new_memories.remove(&memory_id) {
            // never synced — nothing to delete from the store
        } else {
            inner.dirty.deleted_memory_ids.insert(memory_id);
        }
    }

    pub fn clear_memories(&self, user_id: UserId) {
        let mut inner = self.inner.lock().unwrap();
        inner.memories.insert(user_id, Vec::new());
        inner.dirty.new_memories.clear();
        inner.dirty.cleared_memories.insert(user_id);
    }

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut CacheInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap();
        f(&mut guard)
    }

    // ---- hydration (startup) -------------------------------------------

    /// Load the full persisted image into an empty cache. Called once at
    /// process startup, before the sync loop or any chat turn runs.
    pub fn hydrate(&self, conn: &Connection) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        for row in Store::load_all_user_settings(conn)? {
            inner
                .settings
                .insert(UserId(row.user_id), settings_from_row(row));
        }
        for row in Store::load_all_personas(conn)? {
            let key = (UserId(row.user_id), row.name.clone());
            inner.personas.insert(key, persona_from_row(row));
        }
        for row in Store::load_all_sessions(conn)? {
            let id = SessionId(row.id);
            inner.sessions.insert(id, session_from_row(row));
            inner.conversations.entry(id).or_default();
        }
        for row in Store::load_all_persona_token_usage(conn)? {
            let key = (UserId(row.user_id), row.persona_name.clone());
            inner.persona_tokens.insert(key, token_usage_from_row(row));
        }
        for row in Store::load_all_memories(conn)? {
            let user_id = UserId(row.user_id);
            inner
                .memories
                .entry(user_id)
                .or_default()
                .push(memory_from_row(row));
        }
        // conversation messages are loaded lazily per session below, since
        // `load_all_sessions` already gave us every session id.
        let session_ids: Vec<SessionId> = inner.sessions.keys().copied().collect();
        drop(inner);
        for id in session_ids {
            let rows = Store::load_conversation_messages(conn, id.get())?;
            let mut inner = self.inner.lock().unwrap();
            inner.conversations.insert(
                id,
                rows.into_iter().map(|r| message_from_row(id, r)).collect(),
            );
        }
        Ok(())
    }

    // ---- sync -----------------------------------------------------------

    /// Run one sync cycle: swap out the dirty sets, write every change to
    /// the store in a single transaction, remap temporary session ids, and
    /// restore the dirty sets on any failure so the next cycle retries.
    #[instrument(skip(self, conn))]
    pub fn sync_once(&self, conn: &mut Connection) -> Result<()> {
        let (dirty, snapshot) = {
            let mut inner = self.inner.lock().unwrap();
            let dirty = inner.dirty.take();
            let snapshot = Snapshot::capture(&inner, &dirty);
            (dirty, snapshot)
        };

        if dirty.is_empty() {
            return Ok(());
        }

        match self.apply(conn, &dirty, &snapshot) {
            Ok((session_remap, memory_remap)) => {
                let mut inner = self.inner.lock().unwrap();
                for (old, new) in session_remap {
                    remap_session_everywhere(&mut inner, old, new);
                }
                for (user_id, old, new) in memory_remap {
                    remap_memory_everywhere(&mut inner, user_id, old, new);
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "sync cycle failed; restoring dirty sets for retry");
                let mut inner = self.inner.lock().unwrap();
                inner.dirty.restore(dirty);
                Err(e)
            }
        }
    }

    /// Perform the writes for one sync cycle inside a single transaction.
    /// Returns the `(temp_id, real_id)` pairs for newly-inserted sessions
    /// and, separately, the `(user_id, temp_id, real_id)` triples for
    /// newly-inserted memories.
    fn apply(
        &self,
        conn: &mut Connection,
        dirty: &DirtySets,
        snapshot: &Snapshot,
    ) -> Result<(Vec<(SessionId, SessionId)>, Vec<(UserId, i64, i64)>)> {
        let tx = conn.transaction().map_err(|e| CacheError::Store(e.into()))?;

        for key in &dirty.deleted_personas {
            Store::delete_persona(&tx, key.0.get(), &key.1)?;
        }
        for id in &dirty.deleted_sessions {
            Store::delete_session(&tx, id.get())?;
        }
        for id in &dirty.deleted_memory_ids {
            Store::delete_memory(&tx, *id)?;
        }
        for user_id in &dirty.cleared_memories {
            Store::clear_memories(&tx, user_id.get())?;
        }

        for (user_id, settings) in &snapshot.settings {
            Store::upsert_user_settings(&tx, &settings_to_row(*user_id, settings))?;
        }

        let mut session_remap = Vec::new();
        for (temp_id, session) in &snapshot.new_sessions {
            let real = Store::insert_session(
                &tx,
                session.user_id.get(),
                &session.persona_name,
                &session.title,
                &session.created_at,
            )?;
            session_remap.push((*temp_id, SessionId(real)));
        }

        // Resolve a (possibly temporary) session id to its post-remap real id.
        let resolve = |id: SessionId| -> SessionId {
            session_remap
                .iter()
                .find(|(old, _)| *old == id)
                .map(|(_, new)| *new)
                .unwrap_or(id)
        };

        // Personas are upserted after sessions so a persona's
        // `current_session_id` is resolved to the session's real row id
        // before it is written — upserting in the opposite order would
        // persist a dangling temporary id whenever the persona isn't
        // touched again before the next sync cycle.
        for (_key, persona) in &snapshot.personas {
            let mut row = persona_to_row(persona);
            row.current_session_id = row.current_session_id.map(|sid| resolve(SessionId(sid)).get());
            Store::upsert_persona(&tx, &row)?;
        }

        for (session_id, title) in &snapshot.session_titles {
            Store::update_session_title(&tx, resolve(*session_id).get(), title)?;
        }

        for session_id in &dirty.cleared_conversations {
            Store::clear_conversation(&tx, resolve(*session_id).get())?;
        }
        for (session_id, messages) in &snapshot.conversations {
            let real_id = resolve(*session_id);
            let known_len = Store::count_conversation_messages(&tx, real_id.get())?;
            for msg in messages.iter().skip(known_len) {
                Store::insert_conversation_message(
                    &tx,
                    real_id.get(),
                    &msg.role.to_string(),
                    &msg.content,
                    &msg.created_at,
                )?;
            }
        }

        let mut memory_remap = Vec::new();
        for m in &snapshot.new_memories {
            let real = Store::insert_memory(
                &tx,
                m.user_id.get(),
                &m.content,
                &m.source.to_string(),
                m.embedding.as_deref(),
                &m.created_at,
            )?;
            memory_remap.push((m.user_id, m.id, real));
        }

        for (key, usage) in &snapshot.tokens {
            Store::upsert_persona_token_usage(
                &tx,
                &PersonaTokenUsageRow {
                    user_id: key.0.get(),
                    persona_name: key.1.clone(),
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                },
            )?;
        }

        tx.commit().map_err(|e| CacheError::Store(e.into()))?;
        Ok((session_remap, memory_remap))
    }
}

/// Values read out of the cache under lock, by value, for one sync attempt.
/// Captured before the lock is released so the transaction below never
/// touches the live maps directly.
struct Snapshot {
    settings: Vec<(UserId, UserSettings)>,
    personas: Vec<((UserId, String), Persona)>,
    new_sessions: Vec<(SessionId, Session)>,
    session_titles: Vec<(SessionId, String)>,
    conversations: Vec<(SessionId, Vec<ConversationMessage>)>,
    new_memories: Vec<Memory>,
    tokens: Vec<((UserId, String), PersonaTokenUsage)>,
}

impl Snapshot {
    fn capture(inner: &CacheInner, dirty: &DirtySets) -> Self {
        let settings = dirty
            .dirty_settings
            .iter()
            .filter_map(|uid| inner.settings.get(uid).map(|s| (*uid, s.clone())))
            .collect();

        let personas = dirty
            .dirty_personas
            .iter()
            .filter_map(|key| inner.personas.get(key).map(|p| (key.clone(), p.clone())))
            .collect();

        let new_sessions = dirty
            .new_sessions
            .iter()
            .filter_map(|id| inner.sessions.get(id).map(|s| (*id, s.clone())))
            .collect();

        let session_titles = dirty
            .dirty_session_titles
            .iter()
            .filter_map(|id| inner.sessions.get(id).map(|s| (*id, s.title.clone())))
            .collect();

        let mut conv_ids: std::collections::HashSet<SessionId> =
            dirty.dirty_conversations.iter().copied().collect();
        conv_ids.extend(dirty.cleared_conversations.iter().copied());
        let conversations = conv_ids
            .into_iter()
            .filter_map(|id| inner.conversations.get(&id).map(|m| (id, m.clone())))
            .collect();

        let mut memories_by_id: HashMap<i64, Memory> = HashMap::new();
        for list in inner.memories.values() {
            for m in list {
                if dirty.new_memories.contains(&m.id) {
                    memories_by_id.insert(m.id, m.clone());
                }
            }
        }
        let new_memories: Vec<Memory> = memories_by_id.into_values().collect();

        let tokens = dirty
            .dirty_tokens
            .iter()
            .filter_map(|key| inner.persona_tokens.get(key).map(|t| (key.clone(), t.clone())))
            .collect();

        Self {
            settings,
            personas,
            new_sessions,
            session_titles,
            conversations,
            new_memories,
            tokens,
        }
    }
}

fn remap_session_everywhere(inner: &mut CacheInner, old: SessionId, new: SessionId) {
    if let Some(mut session) = inner.sessions.remove(&old) {
        session.id = new;
        inner.sessions.insert(new, session);
    }
    if let Some(messages) = inner.conversations.remove(&old) {
        inner.conversations.insert(new, messages);
    }
    for persona in inner.personas.values_mut() {
        if persona.current_session_id == Some(old) {
            persona.current_session_id = Some(new);
        }
    }
    inner.dirty.remap_session(old, new);
}

fn remap_memory_everywhere(inner: &mut CacheInner, user_id: UserId, old: i64, new: i64) {
    if let Some(list) = inner.memories.get_mut(&user_id) {
        for m in list.iter_mut() {
            if m.id == old {
                m.id = new;
            }
        }
    }
    inner.dirty.remap_memory(old, new);
}

fn settings_from_row(row: UserSettingsRow) -> UserSettings {
    UserSettings {
        user_id: UserId(row.user_id),
        api_key: row.api_key,
        base_url: row.base_url,
        model: row.model,
        temperature: row.temperature,
        token_limit: row.token_limit,
        current_persona: row.current_persona,
        enabled_tools: row.enabled_tools.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        title_model: row.title_model,
        tts_voice: row.tts_voice,
        tts_style: row.tts_style,
        tts_endpoint: row.tts_endpoint,
        api_presets: row
            .api_presets
            .into_iter()
            .map(|(k, v)| {
                (
                    k,
                    ApiPreset {
                        api_key: v.api_key,
                        base_url: v.base_url,
                        model: v.model,
                    },
                )
            })
            .collect(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn settings_to_row(user_id: UserId, s: &UserSettings) -> UserSettingsRow {
    UserSettingsRow {
        user_id: user_id.get(),
        api_key: s.api_key.clone(),
        base_url: s.base_url.clone(),
        model: s.model.clone(),
        temperature: s.temperature,
        token_limit: s.token_limit,
        current_persona: s.current_persona.clone(),
        enabled_tools: s.enabled_tools.join(","),
        title_model: s.title_model.clone(),
        tts_voice: s.tts_voice.clone(),
        tts_style: s.tts_style.clone(),
        tts_endpoint: s.tts_endpoint.clone(),
        api_presets: s
            .api_presets
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    parley_store::rows::ApiPreset {
                        api_key: v.api_key.clone(),
                        base_url: v.base_url.clone(),
                        model: v.model.clone(),
                    },
                )
            })
            .collect(),
        created_at: s.created_at.clone(),
        updated_at: s.updated_at.clone(),
    }
}

fn persona_from_row(row: PersonaRow) -> Persona {
    Persona {
        user_id: UserId(row.user_id),
        name: row.name,
        system_prompt: row.system_prompt,
        current_session_id: row.current_session_id.map(SessionId),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn persona_to_row(p: &Persona) -> PersonaRow {
    PersonaRow {
        user_id: p.user_id.get(),
        name: p.name.clone(),
        system_prompt: p.system_prompt.clone(),
        current_session_id: p.current_session_id.map(|s| s.get()),
        created_at: p.created_at.clone(),
        updated_at: p.updated_at.clone(),
    }
}

fn session_from_row(row: SessionRow) -> Session {
    Session {
        id: SessionId(row.id),
        user_id: UserId(row.user_id),
        persona_name: row.persona_name,
        title: row.title,
        created_at: row.created_at,
    }
}

fn token_usage_from_row(row: PersonaTokenUsageRow) -> PersonaTokenUsage {
    PersonaTokenUsage {
        prompt_tokens: row.prompt_tokens,
        completion_tokens: row.completion_tokens,
        total_tokens: row.total_tokens,
    }
}

fn memory_from_row(row: MemoryRow) -> Memory {
    Memory {
        id: row.id,
        user_id: UserId(row.user_id),
        content: row.content,
        source: row.source.parse().unwrap_or(MemorySource::User),
        embedding: row.embedding,
        created_at: row.created_at,
    }
}

fn message_from_row(session_id: SessionId, row: ConversationMessageRow) -> ConversationMessage {
    ConversationMessage {
        session_id,
        role: row.role.parse().unwrap_or(Role::User),
        content: row.content,
        created_at: row.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_session_uses_negative_temp_id() {
        let cache = Cache::new();
        let s = cache.create_session(UserId(1), "default", "");
        assert!(s.id.is_temporary());
    }

    #[test]
    fn remaining_tokens_is_none_when_unlimited() {
        let cache = Cache::new();
        cache.get_or_create_settings(UserId(1));
        assert_eq!(cache.remaining_tokens(UserId(1)), None);
    }

    #[test]
    fn remaining_tokens_decreases_with_usage() {
        let cache = Cache::new();
        cache.update_settings(UserId(1), |s| s.token_limit = 100);
        cache.add_token_usage(UserId(1), "default", 10, 20);
        assert_eq!(cache.remaining_tokens(UserId(1)), Some(70));
    }

    #[test]
    fn pop_last_exchange_restores_message_count() {
        let cache = Cache::new();
        let s = cache.create_session(UserId(1), "default", "");
        cache.add_message(s.id, Role::User, "hi");
        cache.add_message(s.id, Role::Assistant, "hello");
        assert_eq!(cache.get_history(s.id, 100).len(), 2);
        cache.pop_last_exchange(s.id);
        assert_eq!(cache.get_history(s.id, 100).len(), 0);
    }

    #[test]
    fn deleting_default_persona_is_rejected() {
        let cache = Cache::new();
        cache.get_or_create_persona(UserId(1), "default", "");
        assert!(cache.delete_persona(UserId(1), "default").is_err());
    }

    #[test]
    fn sync_remaps_new_memory_id_so_a_later_delete_hits_the_real_row() {
        let conn = Connection::open_in_memory().unwrap();
        parley_store::schema::init_db(&conn).unwrap();
        let cache = Cache::new();
        let temp_id = cache.add_memory(UserId(1), "likes coffee", MemorySource::User, None);
        assert!(temp_id < 0);

        let mut conn = conn;
        cache.sync_once(&mut conn).unwrap();

        let stored = Store::load_memories(&conn, 1).unwrap();
        assert_eq!(stored.len(), 1);
        let real_id = stored[0].id;
        assert!(real_id > 0);

        // The cache's own copy must now carry the real id, not the stale
        // temporary one, or a delete here would target no row at all.
        let cached = cache.list_memories(UserId(1));
        assert_eq!(cached[0].id, real_id);

        cache.delete_memory(UserId(1), real_id);
        cache.sync_once(&mut conn).unwrap();
        assert!(Store::load_memories(&conn, 1).unwrap().is_empty());
    }

    #[test]
    fn sync_remaps_persona_current_session_id_before_persisting() {
        let conn = Connection::open_in_memory().unwrap();
        parley_store::schema::init_db(&conn).unwrap();
        let cache = Cache::new();
        cache.get_or_create_persona(UserId(1), "default", "");
        let session = cache.create_session(UserId(1), "default", "chat");
        assert!(session.id.is_temporary());

        let mut conn = conn;
        cache.sync_once(&mut conn).unwrap();

        let personas = Store::load_all_personas(&conn).unwrap();
        let persona = personas.iter().find(|p| p.user_id == 1 && p.name == "default").unwrap();
        let persisted_session_id = persona.current_session_id.expect("persona should point at a session");
        assert!(persisted_session_id > 0, "persisted current_session_id must be the real row id, not a temp id");

        let sessions = Store::load_sessions(&conn, 1, "default").unwrap();
        assert_eq!(sessions[0].id, persisted_session_id);
    }
}
