//! In-memory chat sessions.
//!
//! Sessions live for the process lifetime. When the store is full the
//! least recently updated session is dropped, and each session keeps at
//! most `max_messages` messages.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::config::SessionConfig;
use crate::providers::ChatMessage;

/// Prior turns handed to the model, excluding the message being answered.
pub const LLM_HISTORY_TURNS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn speaker(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub case_id: Option<String>,
    pub messages: Vec<SessionMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            case_id: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The last `turns` messages as "User: ..." / "Assistant: ..." lines.
    pub fn history_text(&self, turns: usize) -> String {
        let start = self.messages.len().saturating_sub(turns);
        self.messages[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role.speaker(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Up to [`LLM_HISTORY_TURNS`] turns before the newest message.
    pub fn llm_history(&self) -> Vec<ChatMessage> {
        let end = self.messages.len().saturating_sub(1);
        let start = end.saturating_sub(LLM_HISTORY_TURNS);
        self.messages[start..end]
            .iter()
            .map(|m| match m.role {
                Role::User => ChatMessage::user(m.content.clone()),
                Role::Assistant => ChatMessage::assistant(m.content.clone()),
            })
            .collect()
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    max_sessions: usize,
    max_messages: usize,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.read().len())
            .field("max_sessions", &self.max_sessions)
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl SessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            max_messages: SessionConfig::default().max_messages,
        }
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.max_sessions).with_max_messages(config.max_messages)
    }

    /// Return the id of an existing session, creating one if needed.
    ///
    /// An unknown or missing id starts a new session; a non-blank unknown id
    /// is kept so the client can keep using it.
    pub fn get_or_create(&self, session_id: Option<&str>) -> String {
        let requested = session_id.map(str::trim).filter(|s| !s.is_empty());

        if let Some(id) = requested {
            if self.sessions.read().contains_key(id) {
                return id.to_string();
            }
        }

        let id = requested
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut sessions = self.sessions.write();
        sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id.clone()));
        debug!(session_id = %id, total = sessions.len(), "session created");
        Self::evict_oldest(&mut sessions, self.max_sessions, &id);
        id
    }

    fn evict_oldest(sessions: &mut HashMap<String, Session>, max: usize, keep: &str) {
        while sessions.len() > max {
            let oldest = sessions
                .values()
                .filter(|s| s.id != keep)
                .min_by_key(|s| s.updated_at)
                .map(|s| s.id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                    debug!(session_id = %id, "session evicted");
                }
                None => break,
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn case_id(&self, session_id: &str) -> Option<String> {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|s| s.case_id.clone())
    }

    pub fn set_case_id(&self, session_id: &str, case_id: &str) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.case_id = Some(case_id.to_string());
            session.updated_at = Utc::now();
        }
    }

    /// Append a message, dropping the oldest ones past the per-session cap.
    /// Returns false if the session does not exist.
    pub fn append(&self, session_id: &str, role: Role, content: impl Into<String>) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };
        let now = Utc::now();
        session.messages.push(SessionMessage {
            role,
            content: content.into(),
            at: now,
        });
        let overflow = session.messages.len().saturating_sub(self.max_messages);
        if overflow > 0 {
            session.messages.drain(..overflow);
            debug!(session_id = %session_id, dropped = overflow, "session messages trimmed");
        }
        session.updated_at = now;
        true
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_gets_uuid() {
        let store = SessionStore::new(10);
        let id = store.get_or_create(None);
        assert_eq!(id.len(), 36);
        assert_eq!(store.get_or_create(Some(&id)), id);
        assert_eq!(store.len(), 1);

        let blank = store.get_or_create(Some("  "));
        assert_ne!(blank, id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_unknown_id_is_adopted() {
        let store = SessionStore::new(10);
        assert_eq!(store.get_or_create(Some("abc")), "abc");
        assert!(store.get("abc").is_some());
    }

    #[test]
    fn test_case_id_and_messages() {
        let store = SessionStore::new(10);
        let id = store.get_or_create(None);
        assert_eq!(store.case_id(&id), None);

        store.set_case_id(&id, "123");
        assert!(store.append(&id, Role::User, "hi"));
        assert!(store.append(&id, Role::Assistant, "hello"));
        assert!(!store.append("missing", Role::User, "lost"));

        let session = store.get(&id).unwrap();
        assert_eq!(session.case_id.as_deref(), Some("123"));
        assert_eq!(session.history_text(12), "User: hi\nAssistant: hello");
    }

    #[test]
    fn test_history_keeps_last_turns() {
        let store = SessionStore::new(10);
        let id = store.get_or_create(None);
        for i in 0..20 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.append(&id, role, format!("m{}", i));
        }
        let session = store.get(&id).unwrap();

        let text = session.history_text(12);
        assert_eq!(text.lines().count(), 12);
        assert!(text.starts_with("User: m8"));
        assert!(text.ends_with("Assistant: m19"));

        // Newest message excluded; twelve before it.
        let history = session.llm_history();
        assert_eq!(history.len(), 12);
        assert_eq!(history[0].content, "m7");
        assert_eq!(history[11].content, "m18");
    }

    #[test]
    fn test_short_history() {
        let store = SessionStore::new(10);
        let id = store.get_or_create(None);
        assert!(store.get(&id).unwrap().llm_history().is_empty());

        store.append(&id, Role::User, "only");
        assert!(store.get(&id).unwrap().llm_history().is_empty());
    }

    #[test]
    fn test_evicts_least_recently_updated() {
        let store = SessionStore::new(2);
        store.get_or_create(Some("a"));
        store.get_or_create(Some("b"));
        store.append("a", Role::User, "still here");

        store.get_or_create(Some("c"));
        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn test_messages_capped_per_session() {
        let store = SessionStore::new(10).with_max_messages(4);
        let id = store.get_or_create(None);
        for i in 0..10 {
            assert!(store.append(&id, Role::User, format!("m{}", i)));
        }

        let session = store.get(&id).unwrap();
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.messages[0].content, "m6");
        assert_eq!(session.messages[3].content, "m9");
    }

    #[test]
    fn test_from_config_applies_message_cap() {
        let config = SessionConfig {
            max_messages: 2,
            ..SessionConfig::default()
        };
        let store = SessionStore::from_config(&config);
        let id = store.get_or_create(None);
        store.append(&id, Role::User, "a");
        store.append(&id, Role::Assistant, "b");
        store.append(&id, Role::User, "c");
        assert_eq!(store.get(&id).unwrap().history_text(12), "Assistant: b\nUser: c");
    }
}
