use crate::request::{HttpRequest, join_url};
use base64::Engine;
use serde_json::{Value, json};
use writingtools_core::types::{ChatMessage, ChatRole, ImageAttachment};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

pub fn build_generate_content_request(
    cfg: &GeminiConfig,
    system: Option<&str>,
    messages: &[ChatMessage],
    images: &[ImageAttachment],
    stream: bool,
) -> HttpRequest {
    let last_user = messages.iter().rposition(|m| m.role == ChatRole::User);

    let mut system_text: Vec<&str> = system.into_iter().filter(|s| !s.trim().is_empty()).collect();
    let mut contents: Vec<Value> = vec![];
    for (i, m) in messages.iter().enumerate() {
        let role = match m.role {
            ChatRole::System => {
                system_text.push(&m.content);
                continue;
            }
            ChatRole::User => "user",
            ChatRole::Assistant => "model",
        };

        let mut parts = vec![json!({"text": m.content})];
        if Some(i) == last_user {
            for img in images {
                parts.push(json!({
                    "inline_data": {
                        "mime_type": img.mime_type,
                        "data": base64::engine::general_purpose::STANDARD.encode(&img.bytes),
                    }
                }));
            }
        }
        contents.push(json!({"role": role, "parts": parts}));
    }

    let mut payload = json!({
        "contents": contents,
        "generationConfig": {
            "candidateCount": 1,
            "maxOutputTokens": 1000,
            "temperature": 0.5,
        },
        "safetySettings": SAFETY_CATEGORIES
            .iter()
            .map(|c| json!({"category": c, "threshold": "BLOCK_NONE"}))
            .collect::<Vec<_>>(),
    });
    if !system_text.is_empty() {
        payload["systemInstruction"] = json!({"parts": [{"text": system_text.join("\n\n")}]});
    }

    let action = if stream {
        "streamGenerateContent?alt=sse"
    } else {
        "generateContent"
    };
    let url = join_url(&cfg.base_url, &format!("models/{}:{}", cfg.model, action));

    HttpRequest::post_json(url, &payload).with_header("x-goog-api-key", cfg.api_key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> GeminiConfig {
        GeminiConfig {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: "g".into(),
            model: "gemini-2.0-flash".into(),
        }
    }

    #[test]
    fn streaming_uses_sse_endpoint() {
        let req = build_generate_content_request(&cfg(), None, &[ChatMessage::user("x")], &[], true);
        assert!(req.url.ends_with("models/gemini-2.0-flash:streamGenerateContent?alt=sse"));
        assert_eq!(req.header("x-goog-api-key"), Some("g"));
    }

    #[test]
    fn maps_roles_and_system_instruction() {
        let req = build_generate_content_request(
            &cfg(),
            Some("Be kind."),
            &[ChatMessage::user("q"), ChatMessage::assistant("a"), ChatMessage::user("q2")],
            &[ImageAttachment::new("image/jpeg", vec![0])],
            false,
        );
        let body = req.json_body().unwrap();
        assert!(req.url.ends_with(":generateContent"));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be kind.");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][1]["inline_data"]["mime_type"], "image/jpeg");
        assert!(body["contents"][0]["parts"].as_array().unwrap().len() == 1);
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
    }
}
