pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod ollama;
pub mod prefs;
pub mod reasoning;
pub mod session;
pub mod storage;
pub mod stream;

// Re-export main types for convenience
pub use config::Config;
pub use error::ChatError;
pub use history::{Conversation, HistoryStore, Message, Role};
pub use ollama::{ChatBackend, ChatRequest, OllamaClient};
pub use prefs::{Preferences, Theme};
pub use session::{ChatSession, RequestHandle, SessionEvent};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use stream::{RequestState, TurnEvent, TurnOutcome, STOP_MARKER};
