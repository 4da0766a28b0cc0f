//! The active backend, built from settings.

use crate::gemini_provider::GeminiProvider;
use crate::local_model::LocalModelManager;
use crate::local_provider::LocalProvider;
use crate::ollama_provider::OllamaProvider;
use crate::openai_provider::OpenAiCompatibleProvider;
use crate::secrets::{Credentials, SecretKey};
use async_trait::async_trait;
use std::sync::Arc;
use writingtools_core::config::{ProviderKind, Settings};
use writingtools_core::types::{ChatMessage, ImageAttachment};
use writingtools_engine::error::ProviderError;
use writingtools_engine::traits::{ProviderCapabilities, TextExtractor, TextProvider};
use writingtools_providers::gemini::{self, GeminiConfig};
use writingtools_providers::ollama::OllamaConfig;
use writingtools_providers::openai_compatible::OpenAiCompatibleChatConfig;

pub enum Backend {
    Gemini(GeminiProvider),
    OpenAiCompatible(OpenAiCompatibleProvider),
    Ollama(OllamaProvider),
    Local(LocalProvider),
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Backend {
    pub fn from_settings(
        settings: &Settings,
        credentials: &Credentials,
        local: &LocalModelManager,
        ocr: Option<Arc<dyn TextExtractor>>,
    ) -> Self {
        match settings.active_provider {
            ProviderKind::Gemini => Backend::Gemini(GeminiProvider::new(GeminiConfig {
                base_url: gemini::DEFAULT_BASE_URL.into(),
                api_key: credentials.get(SecretKey::GeminiApiKey).to_string(),
                model: settings.gemini.model.clone(),
            })),
            ProviderKind::OpenAiCompatible => {
                let s = &settings.openai_compatible;
                Backend::OpenAiCompatible(OpenAiCompatibleProvider::new(
                    OpenAiCompatibleChatConfig {
                        base_url: s.base_url.clone(),
                        api_key: credentials
                            .get(SecretKey::OpenAiCompatibleApiKey)
                            .to_string(),
                        model: s.model.clone(),
                        organisation: non_empty(&s.organisation),
                        project: non_empty(&s.project),
                    },
                ))
            }
            ProviderKind::Ollama => Backend::Ollama(OllamaProvider::new(
                OllamaConfig {
                    base_url: settings.ollama.base_url.clone(),
                    model: settings.ollama.model.clone(),
                    keep_alive_minutes: settings.ollama.keep_alive_minutes,
                },
                ocr,
            )),
            ProviderKind::Local => Backend::Local(LocalProvider::new(local.clone(), ocr)),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Backend::Gemini(_) => ProviderKind::Gemini,
            Backend::OpenAiCompatible(_) => ProviderKind::OpenAiCompatible,
            Backend::Ollama(_) => ProviderKind::Ollama,
            Backend::Local(_) => ProviderKind::Local,
        }
    }

    fn inner(&self) -> &dyn TextProvider {
        match self {
            Backend::Gemini(p) => p,
            Backend::OpenAiCompatible(p) => p,
            Backend::Ollama(p) => p,
            Backend::Local(p) => p,
        }
    }
}

#[async_trait]
impl TextProvider for Backend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.inner().capabilities()
    }

    async fn transform(
        &self,
        system: Option<&str>,
        user_text: &str,
        images: &[ImageAttachment],
        streaming: bool,
    ) -> Result<String, ProviderError> {
        self.inner()
            .transform(system, user_text, images, streaming)
            .await
    }

    async fn chat(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        streaming: bool,
    ) -> Result<String, ProviderError> {
        self.inner().chat(system, messages, streaming).await
    }

    fn cancel(&self) {
        self.inner().cancel();
    }

    fn is_processing(&self) -> bool {
        self.inner().is_processing()
    }
}
