use std::sync::{Arc, Mutex};
use writingtools_engine::error::DispatchError;
use writingtools_engine::session::Conversation;
use writingtools_engine::traits::{
    ErrorChannel, FocusRestorer, ResponseSurface, SelectionReplacer,
};

#[derive(Debug, Default)]
pub struct MemoryReplacer {
    pub replaced: Mutex<Vec<(String, bool)>>,
}

impl MemoryReplacer {
    pub fn texts(&self) -> Vec<String> {
        self.replaced
            .lock()
            .map(|v| v.iter().map(|(t, _)| t.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SelectionReplacer for MemoryReplacer {
    async fn replace(&self, text: &str, preserve_formatting: bool) -> anyhow::Result<()> {
        self.replaced
            .lock()
            .map_err(|_| anyhow::anyhow!("replacer poisoned"))?
            .push((text.to_string(), preserve_formatting));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryResponseSurface {
    pub shown: Mutex<Vec<(String, Conversation)>>,
}

#[async_trait::async_trait]
impl ResponseSurface for MemoryResponseSurface {
    async fn show(&self, title: &str, conversation: &Conversation) -> anyhow::Result<()> {
        self.shown
            .lock()
            .map_err(|_| anyhow::anyhow!("surface poisoned"))?
            .push((title.to_string(), conversation.clone()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryFocusRestorer {
    pub reactivations: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl FocusRestorer for MemoryFocusRestorer {
    async fn reactivate(&self) -> anyhow::Result<()> {
        self.reactivations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryErrorChannel {
    pub reports: Mutex<Vec<(String, String)>>,
}

impl MemoryErrorChannel {
    pub fn boxed(self) -> Arc<dyn ErrorChannel> {
        Arc::new(self)
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.reports.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ErrorChannel for MemoryErrorChannel {
    fn report(&self, command: &str, error: &DispatchError) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((command.to_string(), error.user_message()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use writingtools_engine::error::ProviderError;

    #[tokio::test]
    async fn records_in_call_order() {
        let replacer = MemoryReplacer::default();
        replacer.replace("one", false).await.unwrap();
        replacer.replace("two", true).await.unwrap();
        assert_eq!(replacer.texts(), vec!["one", "two"]);
        assert!(replacer.replaced.lock().unwrap()[1].1);

        let focus = MemoryFocusRestorer::default();
        focus.reactivate().await.unwrap();
        assert_eq!(
            focus
                .reactivations
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn error_channel_keeps_user_facing_text() {
        let errors = MemoryErrorChannel::default();
        errors.report(
            "Proofread",
            &DispatchError::Provider(ProviderError::missing_credential("Gemini")),
        );
        let messages = errors.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "Proofread");
        assert!(!messages[0].1.is_empty());
    }
}
