//! Ordered message log with bounded-window trimming.
//!
//! The store is the only writer. Readers (a rendering front-end on another
//! thread, iteration logging) get a [`LogReader`] that can only take
//! snapshots.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::core::types::{Message, Role};

/// How [`ConversationStore::apply_trim`] bounds the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimPolicy {
    /// Keep exactly the most recent N messages, even if that separates a tool
    /// result from the assistant message that issued the call.
    #[default]
    Window,
    /// Keep at most N messages and never start the log with a tool result
    /// whose call was trimmed away.
    PairAware,
}

/// What a trim removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub dropped: usize,
    /// Tool messages left at the head whose originating call is gone.
    pub orphaned_results: usize,
}

/// Owned, single-writer conversation log.
#[derive(Debug, Default)]
pub struct ConversationStore {
    log: Arc<RwLock<Vec<Message>>>,
}

/// Read-only handle onto a [`ConversationStore`].
#[derive(Debug, Clone)]
pub struct LogReader {
    log: Arc<RwLock<Vec<Message>>>,
}

impl LogReader {
    pub fn snapshot(&self) -> Vec<Message> {
        read(&self.log).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.log).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> LogReader {
        LogReader {
            log: Arc::clone(&self.log),
        }
    }

    pub fn append(&mut self, msg: Message) {
        write(&self.log).push(msg);
    }

    pub fn snapshot(&self) -> Vec<Message> {
        read(&self.log).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.log).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep the most recent `max_messages` entries, dropping oldest first.
    ///
    /// Not pairing-aware: the report counts tool results left without their
    /// originating call so the caller can flag it.
    pub fn trim(&mut self, max_messages: usize) -> TrimReport {
        let mut log = write(&self.log);
        if log.len() <= max_messages {
            return TrimReport::default();
        }
        let dropped = log.len() - max_messages;
        log.drain(..dropped);
        TrimReport {
            dropped,
            orphaned_results: count_orphaned_results(&log),
        }
    }

    /// Like [`trim`](Self::trim), then also drop leading tool results whose
    /// call was removed. May keep fewer than `max_messages`.
    pub fn trim_pair_aware(&mut self, max_messages: usize) -> TrimReport {
        let mut log = write(&self.log);
        if log.len() <= max_messages {
            return TrimReport::default();
        }
        let mut cut = log.len() - max_messages;
        while cut < log.len() && log[cut].role == Role::Tool {
            cut += 1;
        }
        log.drain(..cut);
        TrimReport {
            dropped: cut,
            orphaned_results: 0,
        }
    }

    pub fn apply_trim(&mut self, policy: TrimPolicy, max_messages: usize) -> TrimReport {
        match policy {
            TrimPolicy::Window => self.trim(max_messages),
            TrimPolicy::PairAware => self.trim_pair_aware(max_messages),
        }
    }
}

fn count_orphaned_results(log: &[Message]) -> usize {
    let issued: HashSet<&str> = log
        .iter()
        .flat_map(|msg| msg.tool_calls.iter().map(|call| call.id.as_str()))
        .collect();
    log.iter()
        .filter(|msg| msg.role == Role::Tool)
        .filter(|msg| {
            msg.tool_call_id
                .as_deref()
                .is_none_or(|id| !issued.contains(id))
        })
        .count()
}

fn read(log: &RwLock<Vec<Message>>) -> RwLockReadGuard<'_, Vec<Message>> {
    log.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(log: &RwLock<Vec<Message>>) -> RwLockWriteGuard<'_, Vec<Message>> {
    log.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ToolCall, ToolOutput, ToolResult};
    use serde_json::json;

    fn numbered(n: usize) -> ConversationStore {
        let mut store = ConversationStore::new();
        for i in 0..n {
            store.append(Message::user(format!("m{i}")));
        }
        store
    }

    fn contents(store: &ConversationStore) -> Vec<String> {
        store.snapshot().into_iter().map(|m| m.content).collect()
    }

    #[test]
    fn trim_keeps_most_recent_in_order() {
        let mut store = numbered(6);
        let report = store.trim(4);
        assert_eq!(report.dropped, 2);
        assert_eq!(contents(&store), vec!["m2", "m3", "m4", "m5"]);
    }

    #[test]
    fn trim_short_log_is_noop() {
        let mut store = numbered(3);
        assert_eq!(store.trim(3), TrimReport::default());
        assert_eq!(store.trim(10), TrimReport::default());
        assert_eq!(contents(&store), vec!["m0", "m1", "m2"]);
    }

    fn tool_exchange(store: &mut ConversationStore, id: &str) {
        let call = ToolCall::new(id, "list_directory", json!({"path": "."}));
        store.append(Message::assistant("", vec![call.clone()]));
        store.append(Message::tool_result(&ToolResult::new(
            &call,
            ToolOutput::ok("a.txt"),
        )));
    }

    #[test]
    fn window_trim_reports_orphaned_results() {
        let mut store = ConversationStore::new();
        store.append(Message::user("start"));
        tool_exchange(&mut store, "c1");
        store.append(Message::user("next"));

        // Cutting 2 leaves the c1 result at the head without its call.
        let report = store.trim(2);
        assert_eq!(report.dropped, 2);
        assert_eq!(report.orphaned_results, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.snapshot()[0].role, Role::Tool);
    }

    #[test]
    fn pair_aware_trim_skips_orphaned_results() {
        let mut store = ConversationStore::new();
        store.append(Message::user("start"));
        tool_exchange(&mut store, "c1");
        store.append(Message::user("next"));

        let report = store.trim_pair_aware(2);
        assert_eq!(report.dropped, 3);
        assert_eq!(contents(&store), vec!["next"]);
    }

    #[test]
    fn reader_sees_appends_but_cannot_write() {
        let mut store = ConversationStore::new();
        let reader = store.reader();
        assert!(reader.is_empty());
        store.append(Message::user("hello"));
        assert_eq!(reader.len(), 1);
        assert_eq!(reader.snapshot()[0].content, "hello");
    }
}
