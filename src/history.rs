//! Conversation model and its persisted form.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::storage::{KeyValueStore, HISTORY_KEY};

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message. `text` is always fully decoded and free of reasoning blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into() }
    }
}

/// Messages in chronological order. The system prompt is never part of it.
pub type Conversation = Vec<Message>;

/// On-disk record, kept compatible with the browser client's `chatHistory`.
#[derive(Serialize, Deserialize)]
struct StoredMessage {
    sender: String,
    #[serde(rename = "textContent", default)]
    text_content: String,
}

impl From<&Message> for StoredMessage {
    fn from(msg: &Message) -> Self {
        let sender = match msg.role {
            Role::User => "user",
            Role::Assistant | Role::System => "ai",
        };
        Self {
            sender: sender.to_string(),
            text_content: msg.text.clone(),
        }
    }
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        let role = if stored.sender == "user" { Role::User } else { Role::Assistant };
        Self { role, text: stored.text_content }
    }
}

pub struct HistoryStore<S> {
    store: S,
}

impl<S: KeyValueStore> HistoryStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Load the saved conversation. Never fails: a corrupt record is removed
    /// and an empty conversation returned.
    pub fn load(&mut self) -> Conversation {
        let Some(raw) = self.store.get(HISTORY_KEY) else {
            return Conversation::new();
        };

        match serde_json::from_str::<Vec<StoredMessage>>(&raw) {
            Ok(stored) => stored
                .into_iter()
                .filter(|m| !m.text_content.is_empty())
                .map(Message::from)
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse chat history, clearing it");
                if let Err(e) = self.store.remove(HISTORY_KEY) {
                    tracing::error!(error = %e, "failed to clear corrupt chat history");
                }
                Conversation::new()
            }
        }
    }

    /// Overwrite the saved conversation with `conversation`.
    pub fn save(&mut self, conversation: &[Message]) -> Result<(), ChatError> {
        let stored: Vec<StoredMessage> = conversation.iter().map(StoredMessage::from).collect();
        let raw = serde_json::to_string(&stored)?;
        self.store.set(HISTORY_KEY, &raw)
    }

    pub fn clear(&mut self) -> Result<(), ChatError> {
        self.store.remove(HISTORY_KEY)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_save_then_load_round_trip() {
        let mut history = HistoryStore::new(MemoryStore::new());
        let conversation = vec![
            Message::user("What is Rust?"),
            Message::assistant("A systems language.\n\nWith ownership."),
            Message::user("Thanks"),
        ];

        history.save(&conversation).unwrap();
        assert_eq!(history.load(), conversation);
    }

    #[test]
    fn test_save_overwrites() {
        let mut history = HistoryStore::new(MemoryStore::new());
        history.save(&[Message::user("one"), Message::assistant("two")]).unwrap();
        history.save(&[Message::user("three")]).unwrap();

        assert_eq!(history.load(), vec![Message::user("three")]);
    }

    #[test]
    fn test_corrupt_history_is_cleared() {
        let mut store = MemoryStore::new();
        store.set(HISTORY_KEY, "[{\"sender\": \"user\", \"textContent\": ").unwrap();
        let mut history = HistoryStore::new(store);

        assert!(history.load().is_empty());
        assert!(history.store().get(HISTORY_KEY).is_none());
        // Loading again is still empty, not an error
        assert!(history.load().is_empty());
    }

    #[test]
    fn test_browser_format_is_understood() {
        let mut store = MemoryStore::new();
        store
            .set(
                HISTORY_KEY,
                r#"[{"sender":"user","textContent":"hi"},{"sender":"ai","textContent":""},{"sender":"ai","textContent":"hello"}]"#,
            )
            .unwrap();
        let mut history = HistoryStore::new(store);

        // Empty entries are skipped on load
        assert_eq!(history.load(), vec![Message::user("hi"), Message::assistant("hello")]);
    }

    #[test]
    fn test_saved_form_uses_sender_and_text_content() {
        let mut history = HistoryStore::new(MemoryStore::new());
        history.save(&[Message::user("a"), Message::assistant("b")]).unwrap();

        let raw = history.store().get(HISTORY_KEY).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["sender"], "user");
        assert_eq!(value[1]["sender"], "ai");
        assert_eq!(value[1]["textContent"], "b");
    }

    #[test]
    fn test_clear_removes_record() {
        let mut history = HistoryStore::new(MemoryStore::new());
        history.save(&[Message::user("a")]).unwrap();
        history.clear().unwrap();

        assert!(history.store().get(HISTORY_KEY).is_none());
        assert!(history.load().is_empty());
    }
}
