use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use flowhost_core::types::{ChatMessage, Role, SessionId};

#[derive(Debug, Clone, Serialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub session_id: SessionId,
    pub agent_id: Option<String>,
    pub messages: Vec<SessionMessage>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl ChatSession {
    fn new(session_id: SessionId, agent_id: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            agent_id: agent_id.map(str::to_string),
            messages: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }

    /// The last `limit` messages as chat messages.
    pub fn history(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages[skip..]
            .iter()
            .map(|m| match m.role {
                Role::Assistant => ChatMessage::assistant_text(&m.content),
                Role::System => ChatMessage::system(&m.content),
                Role::User => ChatMessage::user(&m.content),
            })
            .collect()
    }

    /// History as `User: ...` / `Assistant: ...` lines for prompt text.
    pub fn history_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let prefix = match m.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::System => "System",
                };
                format!("{prefix}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Stored messages per session, as a multiple of the replayed history.
const RETAINED_HISTORY_FACTOR: usize = 2;

/// In-memory chat sessions with idle expiry.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, ChatSession>>,
    ttl: Duration,
    history_limit: usize,
}

impl SessionManager {
    pub fn new(ttl_secs: u64, history_limit: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs.min(i64::MAX as u64 / 1000) as i64),
            history_limit,
        }
    }

    pub async fn create(&self, agent_id: Option<&str>) -> SessionId {
        let id = SessionId::new();
        self.sessions
            .write()
            .await
            .insert(id.0.clone(), ChatSession::new(id.clone(), agent_id));
        debug!(session_id = %id, "Session created");
        id
    }

    /// Existing session `id`, or a new one. An unknown id is kept so
    /// clients can choose their own session ids.
    pub async fn get_or_create(&self, id: Option<&str>, agent_id: &str) -> SessionId {
        let Some(id) = id.filter(|s| !s.trim().is_empty()) else {
            return self.create(Some(agent_id)).await;
        };
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| ChatSession::new(SessionId::from_string(id), Some(agent_id)));
        session.last_active = Utc::now();
        session.session_id.clone()
    }

    pub async fn get(&self, id: &str) -> Option<ChatSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Messages kept per session. Older ones are dropped on append.
    fn retained(&self) -> usize {
        self.history_limit.max(1).saturating_mul(RETAINED_HISTORY_FACTOR)
    }

    /// Append a message. Returns `false` for an unknown session.
    pub async fn append(&self, id: &str, role: Role, content: &str) -> bool {
        let retained = self.retained();
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        let now = Utc::now();
        session.messages.push(SessionMessage {
            role,
            content: content.to_string(),
            timestamp: now,
        });
        let excess = session.messages.len().saturating_sub(retained);
        if excess > 0 {
            session.messages.drain(..excess);
        }
        session.last_active = now;
        true
    }

    /// Recent messages for replay into a prompt, bounded by the history limit.
    pub async fn history(&self, id: &str) -> Vec<ChatMessage> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|s| s.history(self.history_limit))
            .unwrap_or_default()
    }

    pub async fn history_text(&self, id: &str) -> String {
        self.sessions
            .read()
            .await
            .get(id)
            .map(ChatSession::history_text)
            .unwrap_or_default()
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Drop sessions idle for longer than the TTL. Returns how many went.
    pub async fn expire(&self) -> usize {
        match Utc::now().checked_sub_signed(self.ttl) {
            Some(cutoff) => self.expire_before(cutoff).await,
            None => 0,
        }
    }

    async fn expire_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_active >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "Expired idle sessions");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(3600, 20)
    }
}
