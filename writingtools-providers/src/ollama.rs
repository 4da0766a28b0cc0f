use crate::request::{HttpRequest, join_url};
use base64::Engine;
use serde_json::{Value, json};
use writingtools_core::types::{ChatMessage, ChatRole, ImageAttachment};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub keep_alive_minutes: u32,
}

/// Builds an `/api/chat` request. The daemon takes images as bare base64 strings.
pub fn build_chat_request(
    cfg: &OllamaConfig,
    system: Option<&str>,
    messages: &[ChatMessage],
    images: &[ImageAttachment],
    stream: bool,
) -> HttpRequest {
    let last_user = messages.iter().rposition(|m| m.role == ChatRole::User);

    let mut wire: Vec<Value> = vec![];
    if let Some(s) = system.filter(|s| !s.trim().is_empty()) {
        wire.push(json!({"role": "system", "content": s}));
    }
    for (i, m) in messages.iter().enumerate() {
        let mut msg = json!({"role": m.role.as_str(), "content": m.content});
        if Some(i) == last_user && !images.is_empty() {
            msg["images"] = images
                .iter()
                .map(|img| Value::String(base64::engine::general_purpose::STANDARD.encode(&img.bytes)))
                .collect();
        }
        wire.push(msg);
    }

    let payload = json!({
        "model": cfg.model,
        "messages": wire,
        "stream": stream,
        "keep_alive": format!("{}m", cfg.keep_alive_minutes),
    });

    HttpRequest::post_json(join_url(&cfg.base_url, "/api/chat"), &payload)
}
