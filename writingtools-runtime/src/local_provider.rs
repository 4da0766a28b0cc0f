use crate::local_model::LocalModelManager;
use crate::remote_provider::WorkGate;
use async_trait::async_trait;
use std::sync::Arc;
use writingtools_core::types::{ChatMessage, ImageAttachment};
use writingtools_engine::error::ProviderError;
use writingtools_engine::traits::{
    ProviderCapabilities, TextExtractor, TextProvider, fold_images_into_prompt,
};

const NAME: &str = "Local model";

/// On-device inference. Drives the model lifecycle on first use.
pub struct LocalProvider {
    manager: LocalModelManager,
    ocr: Option<Arc<dyn TextExtractor>>,
    gate: WorkGate,
}

impl LocalProvider {
    pub fn new(manager: LocalModelManager, ocr: Option<Arc<dyn TextExtractor>>) -> Self {
        Self {
            manager,
            ocr,
            gate: WorkGate::default(),
        }
    }

    pub fn manager(&self) -> &LocalModelManager {
        &self.manager
    }

    async fn generate(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        images: &[ImageAttachment],
    ) -> Result<String, ProviderError> {
        let (token, _busy) = self.gate.begin();
        self.manager.generate(system, messages, images, &token).await
    }
}

#[async_trait]
impl TextProvider for LocalProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            vision: self.manager.descriptor().vision,
            streaming: false,
            multi_turn: true,
            requires_credential: false,
        }
    }

    async fn transform(
        &self,
        system: Option<&str>,
        user_text: &str,
        images: &[ImageAttachment],
        _streaming: bool,
    ) -> Result<String, ProviderError> {
        if self.manager.descriptor().vision {
            return self
                .generate(system, &[ChatMessage::user(user_text)], images)
                .await;
        }
        let prompt = fold_images_into_prompt(self.ocr.as_deref(), user_text, images).await?;
        self.generate(system, &[ChatMessage::user(prompt)], &[]).await
    }

    async fn chat(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        _streaming: bool,
    ) -> Result<String, ProviderError> {
        self.generate(system, messages, &[]).await
    }

    fn cancel(&self) {
        self.gate.cancel();
    }

    fn is_processing(&self) -> bool {
        self.gate.is_processing()
    }
}
