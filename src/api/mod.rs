use serde::{Deserialize, Serialize};

/// Stop sequence sent with every completion request so an unterminated code
/// fence cannot swallow the rest of the reply.
pub const CODE_FENCE_STOP: &str = "```";

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<bool>,
}

#[derive(Serialize, Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub stop: Vec<String>,
}

#[derive(Deserialize, Default)]
pub struct ChatResponseDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    #[serde(default)]
    pub delta: ChatResponseDelta,
}

#[derive(Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatResponseChoice>,
}
