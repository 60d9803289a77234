use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::history::{Message, Role};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/api";

/// Raw response body, chunk by chunk, exactly as the transport delivers it.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChatError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub stream: bool,
}

impl ChatRequest {
    /// Streaming request for `conversation`, with the system prompt in front
    /// when it has any content.
    pub fn new(model: &str, conversation: &[Message], system_prompt: &str) -> Self {
        let mut messages = Vec::with_capacity(conversation.len() + 1);

        let system_prompt = system_prompt.trim();
        if !system_prompt.is_empty() {
            messages.push(ApiMessage {
                role: Role::System,
                content: system_prompt.to_string(),
            });
        }

        messages.extend(
            conversation
                .iter()
                .filter(|msg| !msg.text.trim().is_empty())
                .map(|msg| ApiMessage {
                    role: msg.role,
                    content: msg.text.clone(),
                }),
        );

        Self {
            model: model.to_string(),
            messages,
            stream: true,
        }
    }
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

/// Parse the body of `GET /tags` into model names.
pub fn parse_models(body: &str) -> Result<Vec<String>, ChatError> {
    let response: OllamaModelsResponse =
        serde_json::from_str(body).map_err(ChatError::MalformedBody)?;
    Ok(response.models.into_iter().map(|model| model.name).collect())
}

/// The remembered model if the server still has it, else the first one.
pub fn select_model(models: &[String], remembered: Option<&str>) -> Option<String> {
    remembered
        .and_then(|name| models.iter().find(|m| m.as_str() == name))
        .or_else(|| models.first())
        .cloned()
}

/// What the chat session needs from a model server.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, ChatError>;

    /// Send a chat request. Resolves once the response headers arrive; the
    /// body is returned unread.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError>;
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let url = format!("{}/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ChatError::status(response.status()));
        }

        let body = response.text().await?;
        let models = parse_models(&body)?;
        tracing::debug!(count = models.len(), "listed models");
        Ok(models)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError> {
        let url = format!("{}/chat", self.base_url);
        tracing::debug!(model = %request.model, messages = request.messages.len(), "sending chat request");

        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(ChatError::status(response.status()));
        }

        Ok(response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(ChatError::from)
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_models() {
        let body = r#"{"models":[{"name":"llama3.2:latest","size":123},{"name":"qwen3:8b"}]}"#;
        assert_eq!(parse_models(body).unwrap(), names(&["llama3.2:latest", "qwen3:8b"]));
    }

    #[test]
    fn test_parse_models_rejects_unexpected_shape() {
        assert!(matches!(parse_models(r#"{"tags":[]}"#), Err(ChatError::MalformedBody(_))));
        assert!(matches!(parse_models("<html>"), Err(ChatError::MalformedBody(_))));
    }

    #[test]
    fn test_select_model_prefers_remembered() {
        let models = names(&["a", "b", "c"]);
        assert_eq!(select_model(&models, Some("b")).as_deref(), Some("b"));
    }

    #[test]
    fn test_select_model_falls_back_to_first() {
        let models = names(&["a", "b"]);
        assert_eq!(select_model(&models, Some("gone")).as_deref(), Some("a"));
        assert_eq!(select_model(&models, None).as_deref(), Some("a"));
        assert_eq!(select_model(&[], Some("a")), None);
    }

    #[test]
    fn test_request_prepends_system_prompt() {
        let conversation = vec![Message::user("hi"), Message::assistant("hello")];
        let request = ChatRequest::new("m", &conversation, "  Be brief.  ");

        assert!(request.stream);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, "Be brief.");
        assert_eq!(request.messages[2].role, Role::Assistant);
    }

    #[test]
    fn test_request_skips_blank_system_prompt_and_messages() {
        let conversation = vec![Message::user("hi"), Message::assistant("   ")];
        let request = ChatRequest::new("m", &conversation, " \n ");

        assert_eq!(request.messages, vec![ApiMessage { role: Role::User, content: "hi".to_string() }]);
    }

    #[test]
    fn test_request_wire_format() {
        let request = ChatRequest::new("llama3", &[Message::user("hi")], "sys");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "llama3");
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        assert_eq!(OllamaClient::new("http://host:11434/api/").base_url(), "http://host:11434/api");
    }
}
