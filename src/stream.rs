//! Streaming chat consumer
//!
//! Turns the body of a `POST /chat` response into displayable snapshots and a
//! single final outcome. The body is newline-delimited JSON; each record may
//! carry one delta of assistant text in `message.content`. Transport end of
//! stream is what completes a turn; `done` flags in the records are ignored.

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::history::Message;
use crate::ollama::{ChatBackend, ChatRequest};
use crate::reasoning::strip_reasoning;

/// Appended to the text of a reply the user stopped.
pub const STOP_MARKER: &str = "\n\n[Generation stopped]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// How a turn ended. Each turn produces exactly one.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed(String),
    Cancelled(String),
    Failed(ChatError),
}

impl TurnOutcome {
    pub fn state(&self) -> RequestState {
        match self {
            TurnOutcome::Completed(_) => RequestState::Completed,
            TurnOutcome::Cancelled(_) => RequestState::Cancelled,
            TurnOutcome::Failed(_) => RequestState::Failed,
        }
    }

    /// The assistant message recorded for this turn.
    pub fn into_message(self) -> Message {
        match self {
            TurnOutcome::Completed(text) | TurnOutcome::Cancelled(text) => Message::assistant(text),
            TurnOutcome::Failed(err) => Message::assistant(failure_text(&err)),
        }
    }
}

/// Progress of one turn as reported to whoever drives it.
#[derive(Debug)]
pub enum TurnEvent {
    /// Response headers arrived and the body is being read.
    Streaming,
    /// Current displayable text after a new delta.
    Delta(String),
    Finished(TurnOutcome),
}

pub fn failure_text(err: &ChatError) -> String {
    format!("An unexpected error occurred.\n\nDetails: {err}")
}

/// Final text of a stopped reply, given what was on screen when it stopped.
pub fn stopped_text(displayed: &str) -> String {
    format!("{displayed}{STOP_MARKER}")
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Splits a byte stream into lines. Bytes are held until their line is
/// complete, so a character split across two chunks is decoded whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk and get back every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(String::from_utf8_lossy(&line[..newline]).into_owned());
        }
        lines
    }

    /// Whatever is left once the transport has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Extract the assistant delta carried by one line, if any.
pub fn parse_line(line: &str) -> Result<Option<String>, ChatError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let chunk: ChatChunk = serde_json::from_str(line).map_err(ChatError::Decode)?;
    if let Some(error) = chunk.error {
        tracing::warn!(%error, "server reported an error in the stream");
    }

    Ok(chunk
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty()))
}

/// Raw assistant text received so far for one request.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    raw: String,
}

impl StreamAccumulator {
    pub fn push(&mut self, delta: &str) {
        self.raw.push_str(delta);
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The text received so far with complete reasoning blocks removed.
    /// Shown while streaming and kept when the reply is stopped.
    pub fn snapshot(&self) -> String {
        strip_reasoning(&self.raw)
    }

    pub fn final_text(&self) -> String {
        self.snapshot()
    }

    pub fn stopped_text(&self) -> String {
        stopped_text(&self.snapshot())
    }

    fn apply_line(&mut self, line: &str, on_snapshot: &mut impl FnMut(&str)) {
        match parse_line(line) {
            Ok(Some(delta)) => {
                self.push(&delta);
                on_snapshot(&self.snapshot());
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "skipping line"),
        }
    }
}

/// Read `body` to the end, or until `cancel` fires.
///
/// `on_snapshot` receives the displayable text after every delta.
pub async fn consume<S, B, F>(body: S, cancel: &CancellationToken, mut on_snapshot: F) -> TurnOutcome
where
    S: Stream<Item = Result<B, ChatError>>,
    B: AsRef<[u8]>,
    F: FnMut(&str),
{
    let mut body = std::pin::pin!(body);
    let mut lines = LineBuffer::default();
    let mut accumulator = StreamAccumulator::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(reason = %ChatError::Cancelled, received = accumulator.raw().len(), "stream abandoned");
                return TurnOutcome::Cancelled(accumulator.stopped_text());
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for line in lines.push(chunk.as_ref()) {
                    accumulator.apply_line(&line, &mut on_snapshot);
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "chat stream failed");
                return TurnOutcome::Failed(e);
            }
            None => {
                if let Some(line) = lines.finish() {
                    accumulator.apply_line(&line, &mut on_snapshot);
                }
                tracing::debug!(received = accumulator.raw().len(), "chat stream completed");
                return TurnOutcome::Completed(accumulator.final_text());
            }
        }
    }
}

/// Send `request` and consume the reply.
pub async fn run_turn<F>(
    backend: &dyn ChatBackend,
    request: &ChatRequest,
    cancel: &CancellationToken,
    mut on_event: F,
) -> TurnOutcome
where
    F: FnMut(TurnEvent),
{
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::info!(reason = %ChatError::Cancelled, "request abandoned before the response arrived");
            return TurnOutcome::Cancelled(stopped_text(""));
        }
        response = backend.chat_stream(request) => response,
    };

    let body = match response {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "chat request failed");
            return TurnOutcome::Failed(e);
        }
    };

    on_event(TurnEvent::Streaming);
    consume(body, cancel, |snapshot| on_event(TurnEvent::Delta(snapshot.to_string()))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn record(content: &str) -> String {
        format!("{}\n", serde_json::json!({ "message": { "role": "assistant", "content": content }, "done": false }))
    }

    fn body(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>, ChatError>> {
        stream::iter(chunks.into_iter().map(Ok))
    }

    async fn final_text_of(chunks: Vec<Vec<u8>>) -> String {
        let cancel = CancellationToken::new();
        match consume(body(chunks), &cancel, |_| {}).await {
            TurnOutcome::Completed(text) => text,
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reasoning_removed_across_deltas() {
        let chunks = vec![
            record("Hel").into_bytes(),
            record("lo <think>ignore me</think> world").into_bytes(),
        ];
        assert_eq!(final_text_of(chunks).await, "Hello  world");
    }

    #[tokio::test]
    async fn test_reasoning_block_split_across_chunks() {
        let chunks = vec![
            record("<thi").into_bytes(),
            record("nk>secret plan").into_bytes(),
            record(" more</thi").into_bytes(),
            record("nk>\n\nThe answer is 42.").into_bytes(),
        ];
        assert_eq!(final_text_of(chunks).await, "The answer is 42.");
    }

    #[tokio::test]
    async fn test_chunk_boundaries_do_not_change_result() {
        let mut whole = String::new();
        whole.push_str(&record("Grüße "));
        whole.push_str("keep-alive\n");
        whole.push_str(&record("<think>日本語 reasoning</think>"));
        whole.push_str(&record("从 Rust 🦀"));
        let bytes = whole.into_bytes();

        let expected = final_text_of(vec![bytes.clone()]).await;
        assert_eq!(expected, "Grüße 从 Rust 🦀");

        for split in 1..bytes.len() {
            let chunks = vec![bytes[..split].to_vec(), bytes[split..].to_vec()];
            assert_eq!(final_text_of(chunks).await, expected, "split at byte {split}");
        }
    }

    #[tokio::test]
    async fn test_non_json_lines_are_skipped() {
        let chunks = vec![
            b"\n\n: ping\n".to_vec(),
            record("a").into_bytes(),
            b"{\"message\": {\"content\": \"broken\"\n".to_vec(),
            b"{\"done\":true}\n".to_vec(),
            record("b").into_bytes(),
        ];
        assert_eq!(final_text_of(chunks).await, "ab");
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_used() {
        let last = record("end");
        let chunks = vec![record("the ").into_bytes(), last.trim_end().as_bytes().to_vec()];
        assert_eq!(final_text_of(chunks).await, "the end");
    }

    #[tokio::test]
    async fn test_snapshots_strip_complete_blocks() {
        let chunks = vec![
            record("Hi").into_bytes(),
            record(" <think>hmm").into_bytes(),
            record("</think> there").into_bytes(),
        ];
        let cancel = CancellationToken::new();
        let mut snapshots = Vec::new();
        let outcome = consume(body(chunks), &cancel, |s| snapshots.push(s.to_string())).await;

        assert_eq!(snapshots, vec!["Hi", "Hi <think>hmm", "Hi  there"]);
        assert!(matches!(outcome, TurnOutcome::Completed(ref t) if t == "Hi  there"));
    }

    #[tokio::test]
    async fn test_snapshot_keeps_trailing_angle_bracket() {
        let cancel = CancellationToken::new();
        let mut snapshots = Vec::new();
        consume(body(vec![record("a <").into_bytes()]), &cancel, |s| snapshots.push(s.to_string())).await;

        assert_eq!(snapshots, vec![strip_reasoning("a <")]);
        assert_eq!(snapshots, vec!["a <"]);
    }

    #[tokio::test]
    async fn test_cancel_before_any_delta() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pending = stream::pending::<Result<Vec<u8>, ChatError>>();

        match consume(pending, &cancel, |_| {}).await {
            TurnOutcome::Cancelled(text) => assert_eq!(text, STOP_MARKER),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_after_deltas_keeps_displayed_text() {
        let cancel = CancellationToken::new();
        let chunks = vec![
            Ok(record("Hello").into_bytes()),
            Ok(record(" <think>x</think>world").into_bytes()),
            Ok(record(" never seen").into_bytes()),
        ];
        let body = stream::iter(chunks).chain(stream::pending());

        let trigger = cancel.clone();
        let mut seen = 0;
        let outcome = consume(body, &cancel, |_| {
            seen += 1;
            if seen == 2 {
                trigger.cancel();
            }
        })
        .await;

        match outcome {
            TurnOutcome::Cancelled(text) => assert_eq!(text, format!("Hello world{STOP_MARKER}")),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    async fn cancelled_after_first_delta(delta: &str) -> String {
        let cancel = CancellationToken::new();
        let body = stream::iter(vec![Ok(record(delta).into_bytes())]).chain(stream::pending());

        let trigger = cancel.clone();
        match consume(body, &cancel, |_| trigger.cancel()).await {
            TurnOutcome::Cancelled(text) => text,
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_keeps_text_that_looks_like_a_tag() {
        assert_eq!(cancelled_after_first_delta("Is 3 <").await, format!("Is 3 <{STOP_MARKER}"));
        assert_eq!(cancelled_after_first_delta("Answer: x <t").await, format!("Answer: x <t{STOP_MARKER}"));
    }

    #[tokio::test]
    async fn test_transport_error_fails_turn() {
        let chunks = vec![
            Ok(record("partial").into_bytes()),
            Err(ChatError::Storage(std::io::Error::other("connection reset"))),
        ];
        let cancel = CancellationToken::new();

        match consume(stream::iter(chunks), &cancel, |_| {}).await {
            TurnOutcome::Failed(e) => assert!(e.to_string().contains("connection reset")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_line_buffer_keeps_split_character() {
        let text = "é\n".as_bytes();
        let mut lines = LineBuffer::default();

        assert!(lines.push(&text[..1]).is_empty());
        assert_eq!(lines.push(&text[1..]), vec!["é".to_string()]);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line(r#"{"message":{"content":""}}"#).unwrap(), None);
        assert_eq!(parse_line(r#"{"error":"model not found"}"#).unwrap(), None);
        assert_eq!(parse_line(r#"{"message":{"content":"x"}}"#).unwrap().as_deref(), Some("x"));
        assert!(matches!(parse_line("nope"), Err(ChatError::Decode(_))));
    }

    #[test]
    fn test_failed_outcome_message() {
        let outcome = TurnOutcome::Failed(ChatError::Status {
            code: 500,
            reason: "Internal Server Error".to_string(),
        });
        assert_eq!(outcome.state(), RequestState::Failed);

        let message = outcome.into_message();
        assert!(message.text.starts_with("An unexpected error occurred."));
        assert!(message.text.contains("500"));
        assert!(message.text.contains("Internal Server Error"));
    }
}
