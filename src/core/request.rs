//! Chat-completion request construction

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::api::{ChatMessage, ChatRequest, CODE_FENCE_STOP};
use crate::core::credentials::Credential;
use crate::core::message::Message;
use crate::core::models::ModelDescriptor;

/// A fully-formed completion request, ready to be sent.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub credential: Credential,
    pub body: ChatRequest,
}

impl PreparedRequest {
    pub fn into_http(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        client
            .post(self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.credential.expose()),
            )
            .json(&self.body)
    }
}

/// Map the transcript onto the wire message list for `model`.
///
/// Reasoning models get `prefix: true` on the final message only, which asks
/// the provider to continue that message instead of starting a new one.
pub fn build_messages(transcript: &[Message], model: &ModelDescriptor) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = transcript
        .iter()
        .map(|message| ChatMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            prefix: message.prefix,
        })
        .collect();

    if model.supports_reasoning {
        if let Some(last) = messages.last_mut() {
            last.prefix = Some(true);
        }
    }

    messages
}

pub fn build(
    transcript: &[Message],
    model: &ModelDescriptor,
    credential: Credential,
) -> PreparedRequest {
    PreparedRequest {
        url: model.endpoint_url.to_string(),
        credential,
        body: ChatRequest {
            model: model.id.to_string(),
            messages: build_messages(transcript, model),
            stream: true,
            stop: vec![CODE_FENCE_STOP.to_string()],
        },
    }
}
