//! Chat session controller
//!
//! Owns the conversation, the selected model, the system prompt and at most
//! one in-flight request. Streaming happens in a spawned task that reports
//! back through a channel; the owner of the session feeds those events to
//! [`ChatSession::apply`]. All mutation of the conversation happens there, on
//! the owner's side, so only one turn can ever write to it.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::history::{Conversation, HistoryStore, Message};
use crate::ollama::{select_model, ChatBackend, ChatRequest};
use crate::prefs::Preferences;
use crate::storage::KeyValueStore;
use crate::stream::{run_turn, stopped_text, RequestState, TurnEvent, TurnOutcome};

pub type RequestId = u64;

/// Cancellation handle for one request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: RequestId,
    token: CancellationToken,
}

impl RequestHandle {
    fn new(id: RequestId) -> Self {
        Self { id, token: CancellationToken::new() }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// An event from the task streaming request `id`.
#[derive(Debug)]
pub struct SessionEvent {
    pub id: RequestId,
    pub event: TurnEvent,
}

struct ActiveTurn {
    handle: RequestHandle,
    state: RequestState,
    snapshot: String,
}

pub struct ChatSession<S> {
    backend: Arc<dyn ChatBackend>,
    history: HistoryStore<S>,
    conversation: Conversation,
    model: Option<String>,
    system_prompt: String,
    active: Option<ActiveTurn>,
    last_state: RequestState,
    next_id: RequestId,
    events: UnboundedSender<SessionEvent>,
}

impl<S: KeyValueStore> ChatSession<S> {
    pub fn new(backend: Arc<dyn ChatBackend>, store: S, events: UnboundedSender<SessionEvent>) -> Self {
        let mut history = HistoryStore::new(store);
        let conversation = history.load();
        let model = history.store().selected_model();
        tracing::info!(messages = conversation.len(), model = ?model, "session started");

        Self {
            backend,
            history,
            conversation,
            model,
            system_prompt: String::new(),
            active: None,
            last_state: RequestState::Idle,
            next_id: 1,
            events,
        }
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn store(&self) -> &S {
        self.history.store()
    }

    pub fn store_mut(&mut self) -> &mut S {
        self.history.store_mut()
    }

    /// State of the current request, or of the last one once it has ended.
    pub fn state(&self) -> RequestState {
        self.active.as_ref().map(|turn| turn.state).unwrap_or(self.last_state)
    }

    pub fn is_generating(&self) -> bool {
        self.active.is_some()
    }

    /// Text of the reply being streamed, once the response has started.
    pub fn streaming_text(&self) -> Option<&str> {
        self.active
            .as_ref()
            .filter(|turn| turn.state == RequestState::Streaming)
            .map(|turn| turn.snapshot.as_str())
    }

    /// Select and remember a model.
    pub fn set_model(&mut self, model: &str) {
        self.model = Some(model.to_string());
        if let Err(e) = self.history.store_mut().remember_model(model) {
            tracing::warn!(error = %e, "failed to remember selected model");
        }
    }

    /// Ask the server for its models and pick the default selection.
    pub async fn refresh_models(&mut self) -> Result<Vec<String>, ChatError> {
        let models = self.backend.list_models().await?;
        let remembered = self.model.clone().or_else(|| self.history.store().selected_model());

        match select_model(&models, remembered.as_deref()) {
            Some(model) => self.set_model(&model),
            None => self.model = None,
        }
        Ok(models)
    }

    /// Start a new turn with `text` as the user message. Any request still
    /// running is stopped and recorded first.
    pub fn submit(&mut self, text: &str) -> Result<RequestHandle, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let model = self.model.clone().ok_or(ChatError::NoModel)?;

        self.supersede();

        self.conversation.push(Message::user(text));
        self.persist();

        let id = self.next_id;
        self.next_id += 1;
        let handle = RequestHandle::new(id);
        let request = ChatRequest::new(&model, &self.conversation, &self.system_prompt);

        tracing::info!(id, %model, "submitting chat turn");
        self.spawn_turn(&handle, request);

        self.active = Some(ActiveTurn {
            handle: handle.clone(),
            state: RequestState::Requesting,
            snapshot: String::new(),
        });
        Ok(handle)
    }

    fn spawn_turn(&self, handle: &RequestHandle, request: ChatRequest) {
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let token = handle.token.clone();
        let id = handle.id;

        tokio::spawn(async move {
            let outcome = run_turn(backend.as_ref(), &request, &token, |event| {
                let _ = events.send(SessionEvent { id, event });
            })
            .await;
            let _ = events.send(SessionEvent { id, event: TurnEvent::Finished(outcome) });
        });
    }

    /// Stop the current request. Its final message arrives as a normal event.
    pub fn cancel(&mut self) {
        if let Some(turn) = &self.active {
            tracing::debug!(id = turn.handle.id, "cancelling chat turn");
            turn.handle.cancel();
        }
    }

    /// Apply an event from a streaming task. Returns false if the event is
    /// from a request that is no longer current.
    pub fn apply(&mut self, update: SessionEvent) -> bool {
        let Some(turn) = self.active.as_mut().filter(|turn| turn.handle.id == update.id) else {
            tracing::trace!(id = update.id, "ignoring event from stale request");
            return false;
        };

        match update.event {
            TurnEvent::Streaming => turn.state = RequestState::Streaming,
            TurnEvent::Delta(snapshot) => {
                turn.state = RequestState::Streaming;
                turn.snapshot = snapshot;
            }
            TurnEvent::Finished(outcome) => self.finish(outcome),
        }
        true
    }

    /// Record the end of the active turn. Runs once per turn: the turn is
    /// taken out of `active` here.
    fn finish(&mut self, outcome: TurnOutcome) {
        let Some(turn) = self.active.take() else {
            return;
        };

        let state = outcome.state();
        tracing::info!(id = turn.handle.id, ?state, "chat turn finished");

        self.last_state = state;
        let message = outcome.into_message();
        if message.text.is_empty() {
            // A reply that was all reasoning has nothing to show or save
            tracing::debug!(id = turn.handle.id, "empty reply not recorded");
            return;
        }
        self.conversation.push(message);
        self.persist();
    }

    /// Stop the active turn, if any, and record it as stopped with the text
    /// it had shown so far. Later events from its task are stale.
    fn supersede(&mut self) {
        if let Some(turn) = &self.active {
            turn.handle.cancel();
            let text = stopped_text(&turn.snapshot);
            self.finish(TurnOutcome::Cancelled(text));
        }
    }

    /// Forget the whole conversation. A running request is stopped and not
    /// recorded.
    pub fn clear(&mut self) {
        if let Some(turn) = self.active.take() {
            turn.handle.cancel();
        }
        self.last_state = RequestState::Idle;
        self.conversation.clear();
        if let Err(e) = self.history.clear() {
            tracing::error!(error = %e, "failed to clear chat history");
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.history.save(&self.conversation) {
            tracing::error!(error = %e, "failed to save chat history");
        }
    }
}
