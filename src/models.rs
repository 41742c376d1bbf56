use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Speaker of a chat message, serialized the way the completion API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

// Chat message format shared by requests, responses and memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Total characters across all message bodies. Rough stand-in for prompt size.
    pub fn content_len_total(messages: &[Message]) -> usize {
        messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

// Completion API request format
#[derive(Debug, Serialize, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub temperature: f64,
    pub messages: Vec<Message>,
    pub stream: bool,
}

// Completion API response format (non-streaming)
#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token accounting reported by the API.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

// One `data: ` payload of a streaming response
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Deserialize, Default)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

// Error body returned on non-2xx responses
#[derive(Debug, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}

/// A ranked piece of context returned by a retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RetrievedSnippet {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            metadata: HashMap::new(),
        }
    }
}

/// One incremental piece of streamed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    pub text: String,
    pub finish_reason: Option<String>,
}

/// Visible record of one user submission and the response it produced so far.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    pub id: Uuid,
    pub input: String,
    pub response: String,
    pub in_flight: bool,
    pub error: Option<String>,
    pub finish_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExchangeRecord {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input: input.into(),
            response: String::new(),
            in_flight: true,
            error: None,
            finish_reason: None,
            created_at: Utc::now(),
        }
    }

    /// Response text as it should be rendered: surrounding whitespace trimmed.
    pub fn display_text(&self) -> &str {
        self.response.trim()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_wire_format() {
        let request = CompletionRequest {
            model: "gpt-test".to_string(),
            temperature: 0.5,
            messages: vec![Message::system("be nice"), Message::user("User Input: hi")],
            stream: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-test");
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "User Input: hi");
    }

    #[test]
    fn test_completion_response_with_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        }"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "Hello");
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.usage.unwrap().total_tokens, Some(12));
    }

    #[test]
    fn test_stream_chunk_tolerates_missing_fields() {
        let parsed: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"finish_reason":"stop"}]}"#).unwrap();
        assert!(parsed.choices[0].delta.content.is_none());
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_error_envelope_type_is_optional() {
        let parsed: ApiErrorEnvelope =
            serde_json::from_str(r#"{"error":{"message":"rate limited"}}"#).unwrap();
        assert_eq!(parsed.error.message, "rate limited");
        assert!(parsed.error.error_type.is_none());
    }

    #[test]
    fn test_display_text_trims_whitespace() {
        let mut record = ExchangeRecord::new("Hello");
        record.response = "\n  Hi there!  \n".to_string();
        assert_eq!(record.display_text(), "Hi there!");
        assert!(record.in_flight);
        assert!(!record.is_failed());
    }

    #[test]
    fn test_content_len_total() {
        let messages = vec![Message::user("abc"), Message::assistant("de")];
        assert_eq!(Message::content_len_total(&messages), 5);
    }
}
