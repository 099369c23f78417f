//! Session store — bounded per-conversation message history.
//!
//! Maps `(channel, sender, agent)` to a session holding an ordered,
//! bounded message list. Capacity pressure is resolved by LRU eviction,
//! staleness by an idle-TTL sweep; no operation can fail.
//!
//! Locking is two-level: one mutex guards the LRU map, a second per-session
//! mutex guards the message list. Callers snapshot messages and never hold
//! either lock across an LLM call or tool execution.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::debug;

use relayclaw_core::message::Message;

/// Session key: one conversation partner talking to one agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub channel: String,
    pub sender_id: String,
    pub agent_id: String,
}

impl SessionKey {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            agent_id: agent_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.channel, self.sender_id, self.agent_id)
    }
}

/// One conversation's state. Shared via `Arc`; the inner mutex is taken
/// only while appending or snapshotting.
pub struct Session {
    pub key: SessionKey,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    messages: Vec<Message>,
    last_activity: DateTime<Utc>,
}

impl Session {
    fn new(key: SessionKey) -> Self {
        Self {
            key,
            inner: Mutex::new(SessionInner {
                messages: Vec::new(),
                last_activity: Utc::now(),
            }),
        }
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.inner.lock().expect("session lock").last_activity
    }

    fn touch(&self) {
        self.inner.lock().expect("session lock").last_activity = Utc::now();
    }
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub max_messages: usize,
    pub idle_timeout_s: u64,
}

/// The bounded session store.
pub struct SessionStore {
    sessions: Mutex<LruCache<SessionKey, Arc<Session>>>,
    max_messages: usize,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(max_messages: usize, idle_timeout_s: u64, max_sessions: usize) -> Arc<Self> {
        let cap = NonZeroUsize::new(max_sessions.max(1)).expect("max(1) is nonzero");
        Arc::new(Self {
            sessions: Mutex::new(LruCache::new(cap)),
            max_messages: max_messages.max(1),
            max_sessions: max_sessions.max(1),
            idle_timeout: Duration::seconds(idle_timeout_s as i64),
        })
    }

    /// Return the existing session (touching its LRU position) or create a
    /// fresh one. At capacity, the least-recently-touched session is
    /// evicted to make room.
    pub fn get_or_create(
        &self,
        channel: &str,
        sender_id: &str,
        agent_id: &str,
    ) -> Arc<Session> {
        let key = SessionKey::new(channel, sender_id, agent_id);
        let mut cache = self.sessions.lock().expect("store lock");

        if let Some(session) = cache.get(&key).cloned() {
            drop(cache);
            session.touch();
            return session;
        }

        let session = Arc::new(Session::new(key.clone()));
        if let Some((evicted_key, _)) = cache.push(key.clone(), session.clone()) {
            if evicted_key != key {
                debug!(key = %evicted_key, reason = "lru", "session evicted");
            }
        }
        debug!(key = %key, total = cache.len(), "session created");
        session
    }

    /// Look up without creating. Still touches the LRU position.
    pub fn get(&self, channel: &str, sender_id: &str, agent_id: &str) -> Option<Arc<Session>> {
        let key = SessionKey::new(channel, sender_id, agent_id);
        self.sessions.lock().expect("store lock").get(&key).cloned()
    }

    /// Append one message, updating activity. When the list exceeds
    /// `max_messages` the oldest overflow is dropped, preserving order.
    pub fn append(&self, session: &Session, message: Message) {
        let mut inner = session.inner.lock().expect("session lock");
        inner.messages.push(message);
        inner.last_activity = Utc::now();

        let len = inner.messages.len();
        if len > self.max_messages {
            inner.messages.drain(..len - self.max_messages);
        }
    }

    /// Snapshot copy of the message history. Callers never mutate in place.
    pub fn messages(&self, session: &Session) -> Vec<Message> {
        session.inner.lock().expect("session lock").messages.clone()
    }

    /// Empty the message list, keeping the session alive.
    pub fn clear(&self, session: &Session) {
        let mut inner = session.inner.lock().expect("session lock");
        inner.messages.clear();
        inner.last_activity = Utc::now();
    }

    /// Remove a session. Unknown keys are a no-op.
    pub fn delete(&self, channel: &str, sender_id: &str, agent_id: &str) {
        let key = SessionKey::new(channel, sender_id, agent_id);
        if self
            .sessions
            .lock()
            .expect("store lock")
            .pop(&key)
            .is_some()
        {
            debug!(key = %key, "session deleted");
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            total_sessions: self.sessions.lock().expect("store lock").len(),
            max_sessions: self.max_sessions,
            max_messages: self.max_messages,
            idle_timeout_s: self.idle_timeout.num_seconds() as u64,
        }
    }

    /// Remove sessions idle longer than the timeout. Walks from the LRU
    /// tail and stops at the first fresh entry — valid because touches move
    /// entries to the front and never to the middle.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        let mut cache = self.sessions.lock().expect("store lock");

        loop {
            let stale = match cache.peek_lru() {
                Some((_, session)) => now - session.last_activity() > self.idle_timeout,
                None => break,
            };
            if !stale {
                break;
            }
            if let Some((key, _)) = cache.pop_lru() {
                debug!(key = %key, reason = "idle", "session evicted");
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(count = removed, "idle sessions cleaned up");
        }
        removed
    }

    /// Spawn the periodic cleanup task (one tick per minute).
    pub fn spawn_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                store.cleanup();
            }
        })
    }
}
