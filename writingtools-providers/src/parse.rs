use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

pub fn parse_openai_chat_completion(body: &[u8]) -> anyhow::Result<String> {
    let resp: OpenAiChatResponse = serde_json::from_slice(body).context("decode chat JSON")?;
    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("no content in chat completion response"))?;
    Ok(content)
}

/// Text carried by one `chat.completion.chunk` event.
pub fn openai_stream_delta(event: &Value) -> Option<String> {
    event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

fn gemini_text(resp: GeminiResponse) -> Option<String> {
    let content = resp.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    Some(text)
}

pub fn parse_gemini_generate_content(body: &[u8]) -> anyhow::Result<String> {
    let resp: GeminiResponse = serde_json::from_slice(body).context("decode Gemini JSON")?;
    gemini_text(resp)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("no candidate text in Gemini response"))
}

/// Text carried by one streamed `GenerateContentResponse`.
pub fn gemini_stream_text(event: &Value) -> Option<String> {
    serde_json::from_value::<GeminiResponse>(event.clone())
        .ok()
        .and_then(gemini_text)
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

pub fn parse_ollama_chat(body: &[u8]) -> anyhow::Result<String> {
    let resp: OllamaChatResponse = serde_json::from_slice(body).context("decode Ollama JSON")?;
    resp.message
        .map(|m| m.content)
        .ok_or_else(|| anyhow!("no message in Ollama response"))
}

/// One NDJSON line from a streaming chat: the text piece and whether it was the last line.
pub fn ollama_stream_chunk(event: &Value) -> (Option<String>, bool) {
    match serde_json::from_value::<OllamaChatResponse>(event.clone()) {
        Ok(r) => (r.message.map(|m| m.content), r.done),
        Err(_) => (None, false),
    }
}

/// Best-effort extraction of a human-readable message from an error body.
pub fn error_message(body: &[u8]) -> Option<String> {
    let v: Value = serde_json::from_slice(body).ok()?;
    let err = v.get("error")?;
    match err {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
