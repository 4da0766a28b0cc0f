use crate::error::{DispatchError, ProviderError};
use crate::session::{Conversation, DispatchOutcome, DispatchStage, ms};
use crate::traits::{
    ErrorChannel, FocusRestorer, ProviderSource, ResponseSurface, SelectionReplacer, TextProvider,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use writingtools_core::command::Command;
use writingtools_core::prompt::normalize_instruction;
use writingtools_core::text::{clean_provider_output, is_incompatible_sentinel};
use writingtools_core::types::{ChatMessage, Selection};

/// Pause between reactivating the target app and pasting into it.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

pub const CUSTOM_CHANGE_INSTRUCTION: &str = "You are a writing assistant. Make the described change to the user's text. Output ONLY the appropriately changed text without any additional comments. If the text is completely incompatible with the requested change, output exactly \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".";

pub const CHAT_INSTRUCTION: &str = "You are a friendly, helpful, compassionate, and endearing AI conversational assistant. Avoid making assumptions or generating harmful, biased, or inappropriate content. When in doubt, do not make up information. Ask the user for clarification if needed. Try not be unnecessarily repetitive in your response. You can, and should as appropriate, use Markdown formatting to make your response nicely readable.";

pub const FOLLOW_UP_INSTRUCTION: &str = "You are a helpful AI assistant. Provide clear and direct responses, maintaining the same format and style as your previous responses. If appropriate, use Markdown formatting to make your response more readable.";

const CHAT_TITLE: &str = "Chat";
const CUSTOM_LABEL: &str = "Custom";

/// Out-of-process collaborators the dispatcher hands results to.
#[derive(Clone)]
pub struct Collaborators {
    pub response_surface: Arc<dyn ResponseSurface>,
    pub focus: Arc<dyn FocusRestorer>,
    pub replacer: Arc<dyn SelectionReplacer>,
    pub errors: Arc<dyn ErrorChannel>,
}

/// Runs commands against the active provider and routes the result.
pub struct Dispatcher {
    providers: Arc<dyn ProviderSource>,
    collaborators: Collaborators,
    settle_delay: Duration,
}

impl Dispatcher {
    pub fn new(providers: Arc<dyn ProviderSource>, collaborators: Collaborators) -> Self {
        Self {
            providers,
            collaborators,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub async fn run(
        &self,
        command: &Command,
        selection: &Selection,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.run_with_hook(command, selection, |_stage| async {})
            .await
    }

    /// Same as `run`, but reports stages as the dispatch progresses.
    ///
    /// The hook is intended for UI progress and must be fast.
    pub async fn run_with_hook<F, Fut>(
        &self,
        command: &Command,
        selection: &Selection,
        on_stage: F,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        F: Fn(DispatchStage) -> Fut,
        Fut: Future<Output = ()>,
    {
        let result = self.run_inner(command, selection, &on_stage).await;
        self.finish(&command.name, result, &on_stage).await
    }

    async fn run_inner<F, Fut>(
        &self,
        command: &Command,
        selection: &Selection,
        on_stage: &F,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        F: Fn(DispatchStage) -> Fut,
        Fut: Future<Output = ()>,
    {
        if !command.is_dispatchable() {
            return Err(DispatchError::InvalidCommand(command.name.clone()));
        }
        if selection.is_blank() {
            return Err(DispatchError::EmptySelection);
        }

        on_stage(DispatchStage::Resolving).await;
        let provider = self.providers.active_provider();
        let instruction = normalize_instruction(&command.prompt);

        on_stage(DispatchStage::Transforming).await;
        let text = transform(
            provider.as_ref(),
            &command.name,
            &instruction,
            &selection.text,
            selection,
        )
        .await?;

        on_stage(DispatchStage::Delivering).await;
        if command.use_response_window {
            let conversation = Conversation::for_command(&command.name, &selection.text, text);
            self.display(&conversation).await?;
            Ok(DispatchOutcome::Displayed { conversation })
        } else {
            self.paste(&text, command.preserve_formatting).await?;
            Ok(DispatchOutcome::Replaced { text })
        }
    }

    /// A one-off change described by the user.
    ///
    /// With nothing selected the change is treated as a question and answered
    /// in the response window.
    pub async fn run_custom(
        &self,
        change: &str,
        selection: &Selection,
    ) -> Result<DispatchOutcome, DispatchError> {
        let result = self.run_custom_inner(change, selection).await;
        self.finish(CUSTOM_LABEL, result, &|_stage: DispatchStage| async {}).await
    }

    async fn run_custom_inner(
        &self,
        change: &str,
        selection: &Selection,
    ) -> Result<DispatchOutcome, DispatchError> {
        let change = change.trim();
        if change.is_empty() {
            return Err(DispatchError::InvalidCommand(CUSTOM_LABEL.into()));
        }
        let provider = self.providers.active_provider();

        if selection.is_blank() {
            let answer = transform(provider.as_ref(), CHAT_TITLE, CHAT_INSTRUCTION, change, selection).await?;
            let mut conversation = Conversation::new(CHAT_TITLE);
            conversation.push_user(change);
            conversation.push_assistant(answer);
            self.display(&conversation).await?;
            return Ok(DispatchOutcome::Displayed { conversation });
        }

        let prompt = format!("Described change: {change}\n\nText: {}", selection.text);
        let text = transform(
            provider.as_ref(),
            CUSTOM_LABEL,
            CUSTOM_CHANGE_INSTRUCTION,
            &prompt,
            selection,
        )
        .await?;
        self.paste(&text, false).await?;
        Ok(DispatchOutcome::Replaced { text })
    }

    /// Asks a follow-up question inside an open response window.
    ///
    /// On success the question and answer are appended to `conversation`;
    /// on failure it is left as it was.
    pub async fn follow_up(
        &self,
        conversation: &mut Conversation,
        question: &str,
    ) -> Result<String, DispatchError> {
        let title = conversation.title.clone();
        let result = self.follow_up_inner(conversation, question).await;
        self.finish(&title, result, &|_stage: DispatchStage| async {}).await
    }

    async fn follow_up_inner(
        &self,
        conversation: &mut Conversation,
        question: &str,
    ) -> Result<String, DispatchError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(DispatchError::EmptySelection);
        }
        let provider = self.providers.active_provider();

        let mut history = conversation.messages.clone();
        history.push(ChatMessage::user(question));

        let t0 = Instant::now();
        let raw = provider
            .chat(Some(FOLLOW_UP_INSTRUCTION), &history, false)
            .await?;
        log::info!(
            "{} answered follow-up in {}ms",
            provider.name(),
            ms(t0.elapsed())
        );
        let answer = accept_output(&raw)?;

        conversation.push_user(question);
        conversation.push_assistant(answer.clone());
        self.display(conversation).await?;
        Ok(answer)
    }

    async fn display(&self, conversation: &Conversation) -> Result<(), DispatchError> {
        self.collaborators
            .response_surface
            .show(&conversation.title, conversation)
            .await
            .map_err(|e| DispatchError::Delivery(e.to_string()))
    }

    async fn paste(&self, text: &str, preserve_formatting: bool) -> Result<(), DispatchError> {
        // The target app must be frontmost before the paste lands.
        self.collaborators
            .focus
            .reactivate()
            .await
            .map_err(|e| DispatchError::Delivery(format!("reactivate target app: {e}")))?;
        tokio::time::sleep(self.settle_delay).await;
        self.collaborators
            .replacer
            .replace(text, preserve_formatting)
            .await
            .map_err(|e| DispatchError::Delivery(e.to_string()))
    }

    async fn finish<T, F, Fut>(
        &self,
        label: &str,
        result: Result<T, DispatchError>,
        on_stage: &F,
    ) -> Result<T, DispatchError>
    where
        F: Fn(DispatchStage) -> Fut,
        Fut: Future<Output = ()>,
    {
        match result {
            Ok(v) => {
                on_stage(DispatchStage::Done).await;
                Ok(v)
            }
            Err(e) => {
                on_stage(DispatchStage::Failed).await;
                if e.is_cancelled() {
                    log::info!("`{label}` cancelled");
                } else {
                    log::error!("`{label}` failed: {e}");
                    self.collaborators.errors.report(label, &e);
                }
                Err(e)
            }
        }
    }
}

async fn transform(
    provider: &dyn TextProvider,
    label: &str,
    instruction: &str,
    user_text: &str,
    selection: &Selection,
) -> Result<String, DispatchError> {
    let t0 = Instant::now();
    let raw = provider
        .transform(Some(instruction), user_text, &selection.images, false)
        .await?;
    log::info!(
        "{} answered `{label}` in {}ms",
        provider.name(),
        ms(t0.elapsed())
    );
    accept_output(&raw)
}

fn accept_output(raw: &str) -> Result<String, DispatchError> {
    let text = clean_provider_output(raw);
    if is_incompatible_sentinel(&text) {
        return Err(DispatchError::IncompatibleText);
    }
    if text.trim().is_empty() {
        return Err(ProviderError::Serialization("backend returned no text".into()).into());
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_output_is_rejected_after_cleanup() {
        let raw = "<think>hmm</think>\n ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST \n";
        assert!(matches!(accept_output(raw), Err(DispatchError::IncompatibleText)));
    }

    #[test]
    fn empty_output_is_a_provider_error() {
        assert!(matches!(
            accept_output("  \n"),
            Err(DispatchError::Provider(ProviderError::Serialization(_)))
        ));
    }

    #[test]
    fn regular_output_is_trimmed() {
        assert_eq!(accept_output("Fixed text.\n\n").unwrap(), "Fixed text.");
    }

    #[test]
    fn indented_output_keeps_its_indentation() {
        assert_eq!(accept_output("    let x = 1;\n").unwrap(), "    let x = 1;");
    }
}
