//! One agent session: the conversation log a single orchestrator loop mutates.
//!
//! Mutation goes through `&mut Session`, so two loops over the same session
//! cannot run at once. Other threads observe the log through a
//! [`LogReader`].

use crate::core::conversation::{ConversationStore, LogReader, TrimPolicy, TrimReport};
use crate::core::types::Message;

#[derive(Debug, Default)]
pub struct Session {
    store: ConversationStore,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> LogReader {
        self.store.reader()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Append, then trim to the window. The report says what the trim removed.
    pub(crate) fn append(
        &mut self,
        msg: Message,
        policy: TrimPolicy,
        max_messages: usize,
    ) -> TrimReport {
        self.store.append(msg);
        self.store.apply_trim(policy, max_messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_trims_to_window() {
        let mut session = Session::new();
        let reader = session.reader();
        for i in 0..5 {
            session.append(Message::user(format!("m{i}")), TrimPolicy::Window, 3);
        }
        let contents: Vec<String> = reader.snapshot().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn reader_sees_updates_from_another_thread() {
        let mut session = Session::new();
        let reader = session.reader();
        let handle = std::thread::spawn(move || {
            while reader.is_empty() {
                std::thread::yield_now();
            }
            reader.snapshot()[0].content.clone()
        });
        session.append(Message::user("hello"), TrimPolicy::Window, 10);
        assert_eq!(handle.join().expect("join"), "hello");
    }
}
