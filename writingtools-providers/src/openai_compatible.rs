use crate::request::{HttpRequest, join_url};
use base64::Engine;
use serde_json::{Value, json};
use writingtools_core::types::{ChatMessage, ImageAttachment};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, PartialEq, Eq)]
pub struct OpenAiCompatibleChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub organisation: Option<String>,
    pub project: Option<String>,
}

impl std::fmt::Debug for OpenAiCompatibleChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleChatConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("organisation", &self.organisation)
            .field("project", &self.project)
            .finish()
    }
}

/// Builds a `/chat/completions` request.
///
/// `images` are attached to the last user message as `image_url` data URLs.
pub fn build_chat_completions_request(
    cfg: &OpenAiCompatibleChatConfig,
    system: Option<&str>,
    messages: &[ChatMessage],
    images: &[ImageAttachment],
    stream: bool,
) -> HttpRequest {
    let mut wire: Vec<Value> = vec![];
    if let Some(s) = system.filter(|s| !s.trim().is_empty()) {
        wire.push(json!({"role": "system", "content": s}));
    }

    let last_user = messages
        .iter()
        .rposition(|m| m.role == writingtools_core::types::ChatRole::User);

    for (i, m) in messages.iter().enumerate() {
        if Some(i) == last_user && !images.is_empty() {
            let mut parts = vec![json!({"type": "text", "text": m.content})];
            for img in images {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {"url": data_url(img)},
                }));
            }
            wire.push(json!({"role": m.role.as_str(), "content": parts}));
        } else {
            wire.push(json!({"role": m.role.as_str(), "content": m.content}));
        }
    }

    let payload = json!({
        "model": cfg.model,
        "messages": wire,
        "temperature": 0.5,
        "stream": stream,
    });

    let mut req = HttpRequest::post_json(join_url(&cfg.base_url, "/chat/completions"), &payload)
        .with_header("Authorization", format!("Bearer {}", cfg.api_key));
    if let Some(org) = cfg.organisation.as_ref().filter(|s| !s.trim().is_empty()) {
        req = req.with_header("OpenAI-Organization", org.trim());
    }
    if let Some(project) = cfg.project.as_ref().filter(|s| !s.trim().is_empty()) {
        req = req.with_header("OpenAI-Project", project.trim());
    }
    if stream {
        req = req.with_header("Accept", "text/event-stream");
    }
    req
}

fn data_url(img: &ImageAttachment) -> String {
    format!(
        "data:{};base64,{}",
        img.mime_type,
        base64::engine::general_purpose::STANDARD.encode(&img.bytes)
    )
}
