//! The conversation context store.
//!
//! An in-memory map from conversation id to an ordered, role-tagged message
//! history, bounded by a character budget. The system message always sits at
//! index 0 and is never evicted; when the budget is exceeded, the *oldest
//! user/assistant pair* is dropped — never a single message — so the
//! role alternation expected by completion APIs stays well-formed.
//!
//! Concurrency: one `tokio::sync::Mutex` per conversation, fetched through a
//! sharded read-write map. Reads and writes to the same conversation are
//! serialized; different conversations never contend.

use std::collections::HashMap;
use std::sync::Arc;

use lorebook_core::error::ContextError;
use lorebook_core::message::{ConversationId, Message, Role, total_content_chars};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// In-memory bounded conversation histories.
///
/// Lifecycle is tied to the service instance: histories are created lazily
/// on first access and live for the process lifetime. The durable,
/// unbounded record is the transcript log, not this store.
pub struct ContextStore {
    system_prompt: String,
    max_context_chars: usize,
    conversations: RwLock<HashMap<String, Arc<Mutex<Vec<Message>>>>>,
}

impl ContextStore {
    pub fn new(system_prompt: impl Into<String>, max_context_chars: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_context_chars,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// The configured character budget.
    pub fn max_context_chars(&self) -> usize {
        self.max_context_chars
    }

    /// Number of conversations currently held.
    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    /// Fetch (or lazily create) the per-conversation slot.
    async fn slot(&self, id: &ConversationId) -> Arc<Mutex<Vec<Message>>> {
        {
            let map = self.conversations.read().await;
            if let Some(slot) = map.get(id.as_str()) {
                return slot.clone();
            }
        }

        let mut map = self.conversations.write().await;
        map.entry(id.as_str().to_string())
            .or_insert_with(|| {
                debug!(conversation = %id, "Initializing conversation history");
                Arc::new(Mutex::new(vec![Message::system(self.system_prompt.clone())]))
            })
            .clone()
    }

    /// Return the conversation's history, initializing it if absent.
    ///
    /// The budget is re-validated on every read, not only on write, so the
    /// returned sequence is always trim-compliant.
    pub async fn history(&self, id: &ConversationId) -> Result<Vec<Message>, ContextError> {
        let slot = self.slot(id).await;
        let mut messages = slot.lock().await;
        Self::verify(&messages)?;
        Self::trim(&mut messages, self.max_context_chars);
        Ok(messages.clone())
    }

    /// Append a user/assistant exchange, then re-apply trimming.
    ///
    /// Initializes the history first if absent, so calling this without a
    /// prior `history()` is fine.
    pub async fn push_turn(
        &self,
        id: &ConversationId,
        query: &str,
        response: &str,
    ) -> Result<(), ContextError> {
        let slot = self.slot(id).await;
        let mut messages = slot.lock().await;
        Self::verify(&messages)?;
        messages.push(Message::user(query));
        messages.push(Message::assistant(response));
        Self::trim(&mut messages, self.max_context_chars);
        debug!(
            conversation = %id,
            len = messages.len(),
            chars = total_content_chars(&messages),
            "Turn appended"
        );
        Ok(())
    }

    /// Invariant check: index 0 holds the sole system message.
    fn verify(messages: &[Message]) -> Result<(), ContextError> {
        match messages.first() {
            Some(first) if first.role == Role::System => {}
            Some(_) => {
                return Err(ContextError::Corrupted(
                    "history does not start with the system message".into(),
                ));
            }
            None => {
                return Err(ContextError::Corrupted("history is empty".into()));
            }
        }

        if messages.iter().skip(1).any(|m| m.role == Role::System) {
            return Err(ContextError::Corrupted(
                "history holds more than one system message".into(),
            ));
        }

        Ok(())
    }

    /// Drop oldest user/assistant pairs until the character budget holds.
    ///
    /// The budget is inclusive: a history exactly at the limit is kept. A
    /// single message over budget is never removed — the invariant
    /// `len > 1` bounds the loop, so the budget may be exceeded in that
    /// degenerate case.
    fn trim(messages: &mut Vec<Message>, max_chars: usize) {
        let mut total = total_content_chars(messages);
        while total > max_chars && messages.len() > 1 {
            messages.remove(1);
            if messages.len() > 1 {
                messages.remove(1);
            }
            total = total_content_chars(messages);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(budget: usize) -> ContextStore {
        // 10-char system prompt keeps the arithmetic legible
        ContextStore::new("0123456789", budget)
    }

    fn id(s: &str) -> ConversationId {
        ConversationId::from(s)
    }

    #[tokio::test]
    async fn first_access_seeds_system_message() {
        let store = store(100);
        let history = store.history(&id("c1")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, "0123456789");
    }

    #[tokio::test]
    async fn history_is_idempotent_between_writes() {
        let store = store(100);
        let conv = id("c1");
        let first = store.history(&conv).await.unwrap();
        let second = store.history(&conv).await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].content, second[0].content);
    }

    #[tokio::test]
    async fn push_turn_appends_pair_in_order() {
        let store = store(1000);
        let conv = id("c1");
        store.push_turn(&conv, "What is AI?", "Simulated intelligence.").await.unwrap();

        let history = store.history(&conv).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, Role::User);
        assert_eq!(history[1].content, "What is AI?");
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].content, "Simulated intelligence.");
    }

    #[tokio::test]
    async fn push_turn_initializes_absent_history() {
        let store = store(1000);
        let conv = id("fresh");
        store.push_turn(&conv, "q", "a").await.unwrap();
        let history = store.history(&conv).await.unwrap();
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn message_count_is_system_plus_pairs() {
        let store = store(10_000);
        let conv = id("c1");
        for i in 0..4 {
            store.push_turn(&conv, &format!("q{i}"), &format!("a{i}")).await.unwrap();
            let history = store.history(&conv).await.unwrap();
            assert_eq!(history.len(), 1 + 2 * (i + 1));
        }
    }

    /// The worked budget scenario: budget 50, system 10, three 10+10 pairs.
    #[tokio::test]
    async fn budget_scenario_boundary_inclusive() {
        let store = store(50);
        let conv = id("c1");

        store.push_turn(&conv, "1234567890", "abcdefghij").await.unwrap();
        let history = store.history(&conv).await.unwrap();
        assert_eq!(history.len(), 3); // total 30, no trim

        store.push_turn(&conv, "qqqqqqqqqq", "wwwwwwwwww").await.unwrap();
        let history = store.history(&conv).await.unwrap();
        assert_eq!(history.len(), 5); // total 50 == budget, boundary inclusive

        store.push_turn(&conv, "eeeeeeeeee", "rrrrrrrrrr").await.unwrap();
        let history = store.history(&conv).await.unwrap();
        // total hit 70 → oldest pair dropped → 50, loop stops
        assert_eq!(history.len(), 5);
        assert_eq!(total_content_chars(&history), 50);
        // pair 1 is gone; pairs 2 and 3 survive in order
        assert_eq!(history[1].content, "qqqqqqqqqq");
        assert_eq!(history[3].content, "eeeeeeeeee");
        assert_eq!(history[4].content, "rrrrrrrrrr");
    }

    #[tokio::test]
    async fn trim_never_removes_system_message() {
        let store = store(15);
        let conv = id("c1");
        for i in 0..5 {
            store.push_turn(&conv, &format!("query number {i}"), "a long reply here").await.unwrap();
        }
        let history = store.history(&conv).await.unwrap();
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, "0123456789");
    }

    #[tokio::test]
    async fn budget_holds_or_history_is_single() {
        let store = store(60);
        let conv = id("c1");
        for i in 0..6 {
            store.push_turn(&conv, &format!("question {i} text"), &format!("answer {i} text")).await.unwrap();
            let history = store.history(&conv).await.unwrap();
            assert!(
                total_content_chars(&history) <= 60 || history.len() == 1,
                "invariant violated at turn {i}"
            );
        }
    }

    #[tokio::test]
    async fn oversized_single_message_survives() {
        // System message alone exceeds the budget: never evicted, budget
        // exceeded by design.
        let store = ContextStore::new("x".repeat(100), 50);
        let conv = id("c1");
        let history = store.history(&conv).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(total_content_chars(&history), 100);
    }

    #[tokio::test]
    async fn oversized_pair_trims_to_system_only() {
        let store = store(20);
        let conv = id("c1");
        store.push_turn(&conv, &"q".repeat(40), &"a".repeat(40)).await.unwrap();
        let history = store.history(&conv).await.unwrap();
        // the fresh pair itself blows the budget and gets evicted
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
    }

    #[tokio::test]
    async fn character_budget_counts_scalars_not_bytes() {
        // 10 CJK chars = 30 bytes but 10 chars; must fit a 25-char budget
        // next to the 10-char system message.
        let store = store(30);
        let conv = id("c1");
        store.push_turn(&conv, "日本語のテキスト一つ", "短い答え").await.unwrap();
        let history = store.history(&conv).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn conversations_are_independent() {
        let store = store(1000);
        store.push_turn(&id("a"), "qa", "ra").await.unwrap();
        store.push_turn(&id("b"), "qb", "rb").await.unwrap();

        let a = store.history(&id("a")).await.unwrap();
        let b = store.history(&id("b")).await.unwrap();
        assert_eq!(a[1].content, "qa");
        assert_eq!(b[1].content, "qb");
        assert_eq!(store.conversation_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_writers_lose_no_turns() {
        let store = Arc::new(store(1_000_000));
        let conv = id("shared");

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let conv = conv.clone();
            handles.push(tokio::spawn(async move {
                store.push_turn(&conv, &format!("q{i}"), &format!("a{i}")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let history = store.history(&conv).await.unwrap();
        assert_eq!(history.len(), 1 + 2 * 32);
        // every pair is adjacent: user then assistant
        for pair in history[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }
}
