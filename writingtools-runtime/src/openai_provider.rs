use crate::remote_provider::{WorkGate, send_once, send_streaming};
use async_trait::async_trait;
use writingtools_core::types::{ChatMessage, ImageAttachment};
use writingtools_engine::error::ProviderError;
use writingtools_engine::traits::{ProviderCapabilities, TextProvider};
use writingtools_providers::openai_compatible::{
    OpenAiCompatibleChatConfig, build_chat_completions_request,
};
use writingtools_providers::parse::{openai_stream_delta, parse_openai_chat_completion};
use writingtools_providers::stream::Framing;

const NAME: &str = "OpenAI-compatible";

/// Any `/chat/completions` endpoint: OpenAI itself, or a local server speaking its API.
#[derive(Debug)]
pub struct OpenAiCompatibleProvider {
    config: OpenAiCompatibleChatConfig,
    gate: WorkGate,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiCompatibleChatConfig) -> Self {
        Self {
            config,
            gate: WorkGate::default(),
        }
    }

    async fn send(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        images: &[ImageAttachment],
        streaming: bool,
    ) -> Result<String, ProviderError> {
        if self.config.api_key.trim().is_empty() {
            return Err(ProviderError::missing_credential(NAME));
        }
        let (token, _busy) = self.gate.begin();
        let req = build_chat_completions_request(&self.config, system, messages, images, streaming);
        if streaming {
            send_streaming(NAME, &req, Framing::Sse, &token, |event| {
                (openai_stream_delta(event), false)
            })
            .await
        } else {
            send_once(NAME, &req, &token, parse_openai_chat_completion).await
        }
    }
}

#[async_trait]
impl TextProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            vision: true,
            streaming: true,
            multi_turn: true,
            requires_credential: true,
        }
    }

    async fn transform(
        &self,
        system: Option<&str>,
        user_text: &str,
        images: &[ImageAttachment],
        streaming: bool,
    ) -> Result<String, ProviderError> {
        self.send(system, &[ChatMessage::user(user_text)], images, streaming)
            .await
    }

    async fn chat(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        streaming: bool,
    ) -> Result<String, ProviderError> {
        self.send(system, messages, &[], streaming).await
    }

    fn cancel(&self) {
        self.gate.cancel();
    }

    fn is_processing(&self) -> bool {
        self.gate.is_processing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str, api_key: &str) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(OpenAiCompatibleChatConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: "gpt-4o-mini".into(),
            organisation: None,
            project: None,
        })
    }

    #[tokio::test]
    async fn empty_key_fails_without_network() {
        let server = MockServer::start().await;
        let p = provider(&server.uri(), "");

        let err = p.transform(Some("p"), "t", &[], false).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredential { .. }));
        assert!(!p.is_processing());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sends_system_and_user_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "Fix grammar"},
                    {"role": "user", "content": "i has a cat"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "I have a cat."}}]
            })))
            .mount(&server)
            .await;

        let p = provider(&server.uri(), "sk-test");
        let out = p
            .transform(Some("Fix grammar"), "i has a cat", &[], false)
            .await
            .unwrap();
        assert_eq!(out, "I have a cat.");
    }

    #[tokio::test]
    async fn streaming_accumulates_deltas_until_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"I have\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" a cat.\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let p = provider(&server.uri(), "sk-test");
        let out = p.transform(None, "i has a cat", &[], true).await.unwrap();
        assert_eq!(out, "I have a cat.");
    }

    #[tokio::test]
    async fn http_errors_are_remote_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"error":{"message":"Incorrect API key"}}"#),
            )
            .mount(&server)
            .await;

        let p = provider(&server.uri(), "sk-bad");
        let err = p.transform(None, "x", &[], false).await.unwrap_err();
        match err {
            ProviderError::RemoteRequestFailed { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("Incorrect API key"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_interrupts_in_flight_request_and_clears_busy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({"choices": [{"message": {"content": "late"}}]})),
            )
            .mount(&server)
            .await;

        let p = Arc::new(provider(&server.uri(), "sk-test"));
        let task = {
            let p = p.clone();
            tokio::spawn(async move { p.transform(None, "x", &[], false).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(p.is_processing());
        p.cancel();
        assert!(!p.is_processing());

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }
}
