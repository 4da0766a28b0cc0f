use std::sync::Arc;
use writingtools_engine::error::DispatchError;
use writingtools_engine::session::Conversation;
use writingtools_engine::traits::{
    ErrorChannel, FocusRestorer, ResponseSurface, SelectionReplacer,
};

/// "Pastes" by printing the replacement.
#[derive(Debug, Default)]
pub struct StdoutReplacer;

#[async_trait::async_trait]
impl SelectionReplacer for StdoutReplacer {
    async fn replace(&self, text: &str, preserve_formatting: bool) -> anyhow::Result<()> {
        log::debug!("replace selection (preserve_formatting={preserve_formatting})");
        println!("{text}");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConsoleResponseSurface;

#[async_trait::async_trait]
impl ResponseSurface for ConsoleResponseSurface {
    async fn show(&self, title: &str, conversation: &Conversation) -> anyhow::Result<()> {
        println!("== {title} ==");
        if let Some(answer) = conversation.latest_answer() {
            println!("{answer}");
        }
        Ok(())
    }
}

/// The terminal keeps focus; nothing to restore.
#[derive(Debug, Default)]
pub struct NoopFocusRestorer;

#[async_trait::async_trait]
impl FocusRestorer for NoopFocusRestorer {
    async fn reactivate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConsoleErrorChannel;

impl ConsoleErrorChannel {
    pub fn boxed(self) -> Arc<dyn ErrorChannel> {
        Arc::new(self)
    }
}

impl ErrorChannel for ConsoleErrorChannel {
    fn report(&self, command: &str, error: &DispatchError) {
        eprintln!("{command}: {}", error.user_message());
    }
}
