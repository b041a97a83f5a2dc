// OpenAI-compatible API types for the chat surface this gateway exposes.
// Based on OpenAI's API specification: https://platform.openai.com/docs/api-reference

use serde::{Deserialize, Serialize};

// ============= Chat Completions API (v1/chat/completions) =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    /// ID of the model to use, `openspg/<project>` for namespaced models
    pub model: String,

    /// A list of messages comprising the conversation so far
    pub messages: Vec<ChatMessage>,

    /// What sampling temperature to use, between 0 and 2
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// An alternative to sampling with temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// The maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream back partial progress
    #[serde(default)]
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,

    /// Target project when the model string carries no namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// A unique identifier representing your end-user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    pub fn is_stream(&self) -> bool {
        self.stream
    }

    /// The query sent to the solver is the content of the last message,
    /// which must come from the user.
    pub fn last_user_query(&self) -> Option<&str> {
        match self.messages.last() {
            Some(msg) if msg.role == Role::User => Some(&msg.content),
            _ => None,
        }
    }

    /// Project name extracted from a namespaced model id ("openspg/BaiKe"
    /// yields "BaiKe"); bare model strings fall back to `project_id`.
    pub fn project_name(&self) -> Option<&str> {
        if let Some((_, name)) = self.model.rsplit_once('/') {
            Some(name)
        } else {
            self.project_id.as_deref()
        }
    }
}

// ============= Model listing (v1/models) =============

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String, // "model"
    pub created: u64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelList {
    pub object: String, // "list"
    pub data: Vec<ModelCard>,
}

// ============= Response Types =============

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String, // "chat.completion"
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>, // "stop", "error", "cancelled"
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ============= Streaming Response Types =============

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionStreamResponse {
    pub id: String,
    pub object: String, // "chat.completion.chunk"
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatStreamChoice {
    pub index: u32,
    pub delta: ChatMessageDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatMessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// ============= Error Response Types =============

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

// ============= Config validation endpoint =============

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidateConfigRequest {
    pub project_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        ValidationResult {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        ValidationResult {
            valid: false,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_json(model: &str, stream: bool) -> String {
        format!(
            r#"{{"model":"{}","messages":[{{"role":"user","content":"Q"}}],"stream":{}}}"#,
            model, stream
        )
    }

    #[test]
    fn test_project_name_from_namespaced_model() {
        let req: ChatCompletionRequest =
            serde_json::from_str(&request_json("openspg/BaiKe", false)).unwrap();
        assert_eq!(req.project_name(), Some("BaiKe"));
    }

    #[test]
    fn test_project_name_falls_back_to_project_id() {
        let mut req: ChatCompletionRequest =
            serde_json::from_str(&request_json("kag", false)).unwrap();
        assert_eq!(req.project_name(), None);
        req.project_id = Some("3".to_string());
        assert_eq!(req.project_name(), Some("3"));
    }

    #[test]
    fn test_last_user_query_requires_user_role() {
        let json = r#"{"model":"openspg/BaiKe","messages":[
            {"role":"user","content":"Q"},
            {"role":"assistant","content":"A"}
        ]}"#;
        let req: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert!(req.last_user_query().is_none());
    }

    #[test]
    fn test_stream_defaults_to_false() {
        let json = r#"{"model":"openspg/BaiKe","messages":[{"role":"user","content":"Q"}]}"#;
        let req: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert!(!req.is_stream());
    }

    #[test]
    fn test_delta_serialization_skips_absent_fields() {
        let delta = ChatMessageDelta {
            role: Some("assistant".to_string()),
            content: None,
        };
        let json = serde_json::to_string(&delta).unwrap();
        assert_eq!(json, r#"{"role":"assistant"}"#);
    }
}
