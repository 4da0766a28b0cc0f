use crate::remote_provider::{WorkGate, send_once, send_streaming};
use async_trait::async_trait;
use writingtools_core::types::{ChatMessage, ImageAttachment};
use writingtools_engine::error::ProviderError;
use writingtools_engine::traits::{ProviderCapabilities, TextProvider};
use writingtools_providers::gemini::{GeminiConfig, build_generate_content_request};
use writingtools_providers::parse::{gemini_stream_text, parse_gemini_generate_content};
use writingtools_providers::stream::Framing;

const NAME: &str = "Gemini";

#[derive(Debug)]
pub struct GeminiProvider {
    config: GeminiConfig,
    gate: WorkGate,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Self {
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
        let req = build_generate_content_request(&self.config, system, messages, images, streaming);
        if streaming {
            send_streaming(NAME, &req, Framing::Sse, &token, |event| {
                (gemini_stream_text(event), false)
            })
            .await
        } else {
            send_once(NAME, &req, &token, parse_gemini_generate_content).await
        }
    }
}

#[async_trait]
impl TextProvider for GeminiProvider {
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
