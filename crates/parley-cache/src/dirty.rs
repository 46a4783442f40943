use std::collections::HashSet;

use parley_core::{SessionId, UserId};

/// The nine disjoint change kinds the sync cycle must account for.
///
/// Swapped out for an empty set at the start of each sync attempt
/// (`take`), and re-unioned back in (`restore`) if that attempt fails so
/// nothing is lost.
#[derive(Debug, Default)]
pub struct DirtySets {
    pub dirty_settings: HashSet<UserId>,
    pub dirty_personas: HashSet<(UserId, String)>,
    pub deleted_personas: HashSet<(UserId, String)>,
    pub new_sessions: HashSet<SessionId>,
    pub dirty_session_titles: HashSet<SessionId>,
    pub deleted_sessions: HashSet<SessionId>,
    pub dirty_conversations: HashSet<SessionId>,
    pub cleared_conversations: HashSet<SessionId>,
    pub dirty_tokens: HashSet<(UserId, String)>,
    pub new_memories: HashSet<i64>,
    pub deleted_memory_ids: HashSet<i64>,
    pub cleared_memories: HashSet<UserId>,
}

impl DirtySets {
    pub fn take(&mut self) -> DirtySets {
        std::mem::take(self)
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_settings.is_empty()
            && self.dirty_personas.is_empty()
            && self.deleted_personas.is_empty()
            && self.new_sessions.is_empty()
            && self.dirty_session_titles.is_empty()
            && self.deleted_sessions.is_empty()
            && self.dirty_conversations.is_empty()
            && self.cleared_conversations.is_empty()
            && self.dirty_tokens.is_empty()
            && self.new_memories.is_empty()
            && self.deleted_memory_ids.is_empty()
            && self.cleared_memories.is_empty()
    }

    pub fn restore(&mut self, other: DirtySets) {
        self.dirty_settings.extend(other.dirty_settings);
        self.dirty_personas.extend(other.dirty_personas);
        self.deleted_personas.extend(other.deleted_personas);
        self.new_sessions.extend(other.new_sessions);
        self.dirty_session_titles.extend(other.dirty_session_titles);
        self.deleted_sessions.extend(other.deleted_sessions);
        self.dirty_conversations.extend(other.dirty_conversations);
        self.cleared_conversations.extend(other.cleared_conversations);
        self.dirty_tokens.extend(other.dirty_tokens);
        self.new_memories.extend(other.new_memories);
        self.deleted_memory_ids.extend(other.deleted_memory_ids);
        self.cleared_memories.extend(other.cleared_memories);
    }

    /// Replace every occurrence of `old` session id with `new` across every
    /// set that can reference a session id. Called immediately after a new
    /// session's store-assigned id is known.
    pub fn remap_session(&mut self, old: SessionId, new: SessionId) {
        remap_in(&mut self.dirty_session_titles, old, new);
        remap_in(&mut self.deleted_sessions, old, new);
        remap_in(&mut self.dirty_conversations, old, new);
        remap_in(&mut self.cleared_conversations, old, new);
    }

    /// Replace every occurrence of a memory's temporary id with its
    /// store-assigned id. Called immediately after the memory's insert is
    /// known to have committed, so a delete racing in during that same
    /// sync window still targets the right row next cycle.
    pub fn remap_memory(&mut self, old: i64, new: i64) {
        if self.deleted_memory_ids.remove(&old) {
            self.deleted_memory_ids.insert(new);
        }
    }
}

fn remap_in(set: &mut HashSet<SessionId>, old: SessionId, new: SessionId) {
    if set.remove(&old) {
        set.insert(new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_leaves_empty_sets_behind() {
        let mut d = DirtySets::default();
        d.dirty_settings.insert(UserId(1));
        let taken = d.take();
        assert!(d.dirty_settings.is_empty());
        assert_eq!(taken.dirty_settings.len(), 1);
    }

    #[test]
    fn restore_reunions_sets_accumulated_during_the_attempt() {
        let mut d = DirtySets::default();
        let taken = d.take();
        d.dirty_settings.insert(UserId(2));
        d.restore(taken);
        // nothing was in `taken` here, so just the mid-attempt entry remains
        assert!(d.dirty_settings.contains(&UserId(2)));
    }

    #[test]
    fn remap_session_moves_temp_id_references_to_the_real_id() {
        let mut d = DirtySets::default();
        let temp = SessionId(-1);
        let real = SessionId(42);
        d.dirty_conversations.insert(temp);
        d.dirty_session_titles.insert(temp);
        d.remap_session(temp, real);
        assert!(d.dirty_conversations.contains(&real));
        assert!(!d.dirty_conversations.contains(&temp));
        assert!(d.dirty_session_titles.contains(&real));
    }
}
