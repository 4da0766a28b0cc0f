use crate::error::{DispatchError, ProviderError};
use crate::session::Conversation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use writingtools_core::types::{ChatMessage, ChatRole, ImageAttachment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Accepts image bytes natively; otherwise images go through OCR.
    pub vision: bool,
    pub streaming: bool,
    /// Sends chat history as separate turns rather than one flattened prompt.
    pub multi_turn: bool,
    pub requires_credential: bool,
}

/// One text-generation backend.
///
/// `transform` may be called again before a prior call completes;
/// implementations that do not serialize must keep shared state consistent.
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// With `streaming` set the chunks are accumulated internally and the
    /// complete text is returned once the stream ends.
    async fn transform(
        &self,
        system: Option<&str>,
        user_text: &str,
        images: &[ImageAttachment],
        streaming: bool,
    ) -> Result<String, ProviderError>;

    async fn chat(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        streaming: bool,
    ) -> Result<String, ProviderError> {
        let flattened = flatten_history(messages);
        self.transform(system, &flattened, &[], streaming).await
    }

    /// Best effort. Must leave `is_processing()` false.
    fn cancel(&self);

    fn is_processing(&self) -> bool;
}

pub fn flatten_history(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let who = match m.role {
                ChatRole::System => "System",
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            format!("{who}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// OCR collaborator used by backends without vision.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &ImageAttachment) -> anyhow::Result<String>;
}

/// Appends text recognised in `images` to `user_text`.
pub async fn fold_images_into_prompt(
    extractor: Option<&dyn TextExtractor>,
    user_text: &str,
    images: &[ImageAttachment],
) -> Result<String, ProviderError> {
    if images.is_empty() {
        return Ok(user_text.to_string());
    }
    let Some(extractor) = extractor else {
        log::warn!("dropping {} image(s): no text extractor available", images.len());
        return Ok(user_text.to_string());
    };

    let mut pieces = vec![];
    for image in images {
        let text = extractor
            .extract_text(image)
            .await
            .map_err(|e| ProviderError::Ocr(e.to_string()))?;
        let text = text.trim();
        if !text.is_empty() {
            pieces.push(text.to_string());
        }
    }

    if pieces.is_empty() {
        return Ok(user_text.to_string());
    }
    Ok(format!(
        "{}\n\nExtracted text from image(s):\n{}",
        user_text.trim_end(),
        pieces.join("\n\n")
    ))
}

/// Side window that shows a conversation.
#[async_trait]
pub trait ResponseSurface: Send + Sync {
    async fn show(&self, title: &str, conversation: &Conversation) -> anyhow::Result<()>;
}

/// Puts the previously focused application back in front.
#[async_trait]
pub trait FocusRestorer: Send + Sync {
    async fn reactivate(&self) -> anyhow::Result<()>;
}

/// Pastes over the current selection of the focused application.
#[async_trait]
pub trait SelectionReplacer: Send + Sync {
    async fn replace(&self, text: &str, preserve_formatting: bool) -> anyhow::Result<()>;
}

pub trait ErrorChannel: Send + Sync {
    fn report(&self, command: &str, error: &DispatchError);
}

/// Resolves the active backend from current settings.
pub trait ProviderSource: Send + Sync {
    fn active_provider(&self) -> Arc<dyn TextProvider>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOcr(&'static str);

    #[async_trait]
    impl TextExtractor for FixedOcr {
        async fn extract_text(&self, _image: &ImageAttachment) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn ocr_text_is_appended_per_image() {
        let images = vec![ImageAttachment::png(vec![1]), ImageAttachment::png(vec![2])];
        let out = fold_images_into_prompt(Some(&FixedOcr("invoice 42")), "Summarise\n", &images)
            .await
            .unwrap();
        assert_eq!(
            out,
            "Summarise\n\nExtracted text from image(s):\ninvoice 42\n\ninvoice 42"
        );
    }

    #[tokio::test]
    async fn no_images_leaves_prompt_untouched() {
        let out = fold_images_into_prompt(Some(&FixedOcr("x")), "hello", &[])
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn history_is_flattened_with_speaker_labels() {
        let h = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        assert_eq!(flatten_history(&h), "User: a\n\nAssistant: b");
    }
}
