use crate::remote_provider::{WorkGate, send_once, send_streaming};
use async_trait::async_trait;
use std::sync::Arc;
use writingtools_core::types::{ChatMessage, ImageAttachment};
use writingtools_engine::error::ProviderError;
use writingtools_engine::traits::{
    ProviderCapabilities, TextExtractor, TextProvider, fold_images_into_prompt,
};
use writingtools_providers::ollama::{OllamaConfig, build_chat_request};
use writingtools_providers::parse::{ollama_stream_chunk, parse_ollama_chat};
use writingtools_providers::stream::Framing;

const NAME: &str = "Ollama";

/// A self-hosted Ollama daemon. No credential; images go through OCR.
pub struct OllamaProvider {
    config: OllamaConfig,
    ocr: Option<Arc<dyn TextExtractor>>,
    gate: WorkGate,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig, ocr: Option<Arc<dyn TextExtractor>>) -> Self {
        Self {
            config,
            ocr,
            gate: WorkGate::default(),
        }
    }

    async fn send(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        streaming: bool,
    ) -> Result<String, ProviderError> {
        let (token, _busy) = self.gate.begin();
        let req = build_chat_request(&self.config, system, messages, &[], streaming);
        if streaming {
            send_streaming(NAME, &req, Framing::Ndjson, &token, ollama_stream_chunk).await
        } else {
            send_once(NAME, &req, &token, parse_ollama_chat).await
        }
    }
}

#[async_trait]
impl TextProvider for OllamaProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            vision: false,
            streaming: true,
            multi_turn: true,
            requires_credential: false,
        }
    }

    async fn transform(
        &self,
        system: Option<&str>,
        user_text: &str,
        images: &[ImageAttachment],
        streaming: bool,
    ) -> Result<String, ProviderError> {
        let prompt = fold_images_into_prompt(self.ocr.as_deref(), user_text, images).await?;
        self.send(system, &[ChatMessage::user(prompt)], streaming)
            .await
    }

    async fn chat(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        streaming: bool,
    ) -> Result<String, ProviderError> {
        self.send(system, messages, streaming).await
    }

    fn cancel(&self) {
        self.gate.cancel();
    }

    fn is_processing(&self) -> bool {
        self.gate.is_processing()
    }
}
