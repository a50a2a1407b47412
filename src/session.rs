use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scrape::CharacterProfile;

/// Turns kept in the store per session. Prompt rendering uses fewer; see
/// [`crate::prompt::PROMPT_HISTORY_TURNS`].
pub const MAX_STORED_TURNS: usize = 15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub user: String,
    pub bot: String,
}

/// Per-browser-session state: the active character and the conversation so
/// far. The profile is immutable once stored; only the history mutates.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    pub character: Option<CharacterProfile>,
    pub history: Vec<ConversationTurn>,
}

/// In-memory session state keyed by the browser session cookie.
///
/// Concurrent requests for the same session can interleave between reads and
/// writes; each operation is individually consistent but no cross-request
/// atomicity is provided.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, ChatSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a character for the session, resetting its history.
    pub fn set_character(&self, id: Uuid, profile: CharacterProfile) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(
            id,
            ChatSession {
                character: Some(profile),
                history: Vec::new(),
            },
        );
    }

    pub fn character(&self, id: Uuid) -> Option<CharacterProfile> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&id).and_then(|s| s.character.clone())
    }

    pub fn history(&self, id: Uuid) -> Vec<ConversationTurn> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&id).map(|s| s.history.clone()).unwrap_or_default()
    }

    /// Append a completed exchange, trimming the history to the most recent
    /// [`MAX_STORED_TURNS`]. Creates the session entry when absent so turns
    /// survive even if the character was never set.
    pub fn append_turn(&self, id: Uuid, turn: ConversationTurn) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.entry(id).or_default();
        session.history.push(turn);
        if session.history.len() > MAX_STORED_TURNS {
            let excess = session.history.len() - MAX_STORED_TURNS;
            session.history.drain(..excess);
        }
    }

    pub fn clear_history(&self, id: Uuid) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = sessions.get_mut(&id) {
            session.history.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> ConversationTurn {
        ConversationTurn {
            user: format!("u{}", i),
            bot: format!("b{}", i),
        }
    }

    #[test]
    fn test_set_character_resets_history() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();

        store.append_turn(id, turn(0));
        store.set_character(id, CharacterProfile::default());

        assert!(store.history(id).is_empty());
        assert!(store.character(id).is_some());
    }

    #[test]
    fn test_history_bounded_to_max_stored_turns() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();

        for i in 0..40 {
            store.append_turn(id, turn(i));
        }

        let history = store.history(id);
        assert_eq!(history.len(), MAX_STORED_TURNS);
        assert_eq!(history.first().unwrap().user, "u25");
        assert_eq!(history.last().unwrap().user, "u39");
    }

    #[test]
    fn test_clear_history_keeps_character() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();

        store.set_character(id, CharacterProfile::default());
        store.append_turn(id, turn(0));
        store.clear_history(id);

        assert!(store.history(id).is_empty());
        assert!(store.character(id).is_some());
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();

        assert!(store.history(id).is_empty());
        assert!(store.character(id).is_none());
    }
}
