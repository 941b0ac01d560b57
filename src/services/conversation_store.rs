//! Conversation Store
//!
//! Per-session message histories and per-branch context, in memory.
//! Two bounds apply: a per-session message cap (oldest dropped first) and
//! a global idle TTL (expired sessions purged wholesale by a periodic
//! reaper). Operations on a single session serialize on its map entry;
//! different sessions proceed independently.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    #[schema(value_type = Object)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug)]
struct SessionEntry {
    messages: Vec<StoredMessage>,
    touched: DateTime<Utc>,
}

const FOLLOW_UP_INDICATORS: &[&str] = &[
    "continue",
    "more",
    "also",
    "and",
    "what about",
    "how about",
    "tell me more",
    "what else",
];

/// In-memory conversation store with per-session locking
pub struct ConversationStore {
    sessions: DashMap<String, SessionEntry>,
    branch_context: DashMap<String, serde_json::Value>,
    max_history: usize,
    ttl: Duration,
}

impl ConversationStore {
    pub fn new(max_history: usize, ttl_hours: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            branch_context: DashMap::new(),
            max_history,
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Append a message to a session's history
    pub fn append(
        &self,
        session_id: &str,
        role: MessageRole,
        content: impl Into<String>,
        branch_id: Option<String>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) {
        let message = StoredMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            branch_id,
            metadata: metadata.unwrap_or_default(),
        };

        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry { messages: Vec::new(), touched: Utc::now() });
        entry.messages.push(message);
        entry.touched = Utc::now();

        // Evict oldest once the history grows past twice the cap
        if entry.messages.len() > self.max_history * 2 {
            let keep_from = entry.messages.len() - self.max_history;
            entry.messages.drain(..keep_from);
        }
    }

    /// Last `max` messages of a session, oldest first
    pub fn history(&self, session_id: &str, max: Option<usize>) -> Vec<StoredMessage> {
        let Some(entry) = self.sessions.get(session_id) else {
            return Vec::new();
        };
        let messages = &entry.messages;
        let start = match max {
            Some(max) if messages.len() > max => messages.len() - max,
            _ => 0,
        };
        messages[start..].to_vec()
    }

    /// Heuristic summary of the recent exchange, used as SQL generation
    /// context. Flags a follow-up when the latest utterance is short or
    /// starts with a connective word.
    pub fn summary(&self, session_id: &str) -> String {
        let Some(entry) = self.sessions.get(session_id) else {
            return String::new();
        };
        if entry.messages.len() < 2 {
            return String::new();
        }

        let recent: Vec<&StoredMessage> =
            entry.messages.iter().rev().take(6).collect::<Vec<_>>();
        let recent: Vec<&StoredMessage> = recent.into_iter().rev().collect();

        let user_queries: Vec<&str> = recent
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .collect();

        let branch_mentioned = recent.iter().find_map(|m| m.branch_id.as_deref());

        let mut parts: Vec<String> = Vec::new();

        if let Some(branch) = branch_mentioned {
            parts.push(format!(
                "Current conversation is about the {} branch.",
                branch.to_uppercase()
            ));
        }

        match user_queries.as_slice() {
            [] => {},
            [only] => parts.push(format!("User is asking: {}", only)),
            [.., current] => {
                let previous: Vec<&str> = user_queries[..user_queries.len() - 1]
                    .iter()
                    .rev()
                    .take(2)
                    .rev()
                    .copied()
                    .collect();
                parts.push(format!("Previous questions: {}", previous.join("; ")));
                parts.push(format!("Current question: {}", current));

                let current_lower = current.to_lowercase();
                let looks_like_follow_up = FOLLOW_UP_INDICATORS
                    .iter()
                    .any(|ind| current_lower.contains(ind))
                    || current_lower.split_whitespace().count() < 5;
                if looks_like_follow_up {
                    parts.push(
                        "This appears to be a follow-up question. Use the previous conversation \
                         context to provide a complete answer."
                            .to_string(),
                    );
                }
            },
        }

        parts.join(" ")
    }

    pub fn branch_context(&self, branch_id: &str) -> Option<serde_json::Value> {
        self.branch_context.get(branch_id).map(|v| v.clone())
    }

    pub fn set_branch_context(&self, branch_id: &str, context: serde_json::Value) {
        self.branch_context.insert(branch_id.to_string(), context);
    }

    /// Drop one session's history
    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Purge sessions idle past the TTL. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().touched < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        for session_id in &expired {
            self.sessions.remove(session_id);
        }
        if !expired.is_empty() {
            tracing::info!("Purged {} expired conversation sessions", expired.len());
        }
        expired.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Spawn the TTL reaper: purges expired sessions every `every`.
    /// Runs until the returned handle is aborted or the runtime stops.
    pub fn spawn_reaper(
        store: Arc<ConversationStore>,
        every: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Conversation reaper running every {:?}", every);
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately on the first tick; skip it so the
            // reaper waits a full period before its first sweep
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.purge_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(10, 24)
    }

    #[test]
    fn test_append_and_history_order() {
        let store = store();
        for i in 0..3 {
            store.append("s1", MessageRole::User, format!("question {}", i), None, None);
        }

        let history = store.history("s1", None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "question 0");
        assert_eq!(history[2].content, "question 2");
    }

    #[test]
    fn test_history_max_returns_latest() {
        let store = store();
        for i in 0..5 {
            store.append("s1", MessageRole::User, format!("q{}", i), None, None);
        }

        let history = store.history("s1", Some(2));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "q3");
        assert_eq!(history[1].content, "q4");
    }

    #[test]
    fn test_history_cap_evicts_oldest() {
        let store = ConversationStore::new(3, 24);
        for i in 0..10 {
            store.append("s1", MessageRole::User, format!("q{}", i), None, None);
        }

        let history = store.history("s1", None);
        assert!(history.len() <= 6);
        // The newest message always survives
        assert_eq!(history.last().unwrap().content, "q9");
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let store = store();
        assert!(store.history("nope", None).is_empty());
        assert_eq!(store.summary("nope"), "");
    }

    #[test]
    fn test_clear() {
        let store = store();
        store.append("s1", MessageRole::User, "hello", None, None);
        assert!(store.clear("s1"));
        assert!(store.history("s1", None).is_empty());
        assert!(!store.clear("s1"));
    }

    #[test]
    fn test_summary_flags_follow_up() {
        let store = store();
        store.append("s1", MessageRole::User, "top 5 diagnoses last year", None, None);
        store.append("s1", MessageRole::Assistant, "Malaria leads with 8,500 claims.", None, None);
        store.append("s1", MessageRole::User, "what about Kogi", None, None);

        let summary = store.summary("s1");
        assert!(summary.contains("Previous questions: top 5 diagnoses last year"));
        assert!(summary.contains("Current question: what about Kogi"));
        assert!(summary.contains("follow-up"));
    }

    #[test]
    fn test_summary_includes_branch() {
        let store = store();
        store.append("s1", MessageRole::User, "claims volume", Some("abuja".to_string()), None);
        store.append("s1", MessageRole::Assistant, "12,402 claims.", None, None);

        let summary = store.summary("s1");
        assert!(summary.contains("ABUJA branch"));
    }

    #[test]
    fn test_purge_expired() {
        let store = ConversationStore::new(10, 0);
        store.append("s1", MessageRole::User, "hello", None, None);
        // TTL of zero hours expires immediately
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_reaper_sweeps_idle_sessions() {
        let store = Arc::new(ConversationStore::new(10, 0));
        store.append("s1", MessageRole::User, "hello", None, None);

        let handle = ConversationStore::spawn_reaper(
            Arc::clone(&store),
            std::time::Duration::from_millis(20),
        );
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        handle.abort();

        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_branch_context_round_trip() {
        let store = store();
        store.set_branch_context("abuja", serde_json::json!({"mode": "strict"}));
        assert_eq!(
            store.branch_context("abuja"),
            Some(serde_json::json!({"mode": "strict"}))
        );
        assert_eq!(store.branch_context("kano"), None);
    }
}
