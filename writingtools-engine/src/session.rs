use serde::{Deserialize, Serialize};
use std::time::Duration;
use writingtools_core::types::{ChatMessage, ChatRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchStage {
    Resolving,
    Transforming,
    Delivering,
    Done,
    Failed,
}

impl DispatchStage {
    // A stable string label for UI display.
    pub fn label(self) -> &'static str {
        match self {
            DispatchStage::Resolving => "resolving",
            DispatchStage::Transforming => "transforming",
            DispatchStage::Delivering => "delivering",
            DispatchStage::Done => "done",
            DispatchStage::Failed => "failed",
        }
    }
}

/// Chat history behind a response window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub title: String,
    pub messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            messages: vec![],
        }
    }

    /// History for a command answered in the response window.
    pub fn for_command(command_name: &str, selection: &str, answer: impl Into<String>) -> Self {
        let mut c = Self::new(command_name);
        c.messages.push(ChatMessage::user(format!(
            "Original text to {}:\n\n{selection}",
            command_name.to_lowercase()
        )));
        c.messages.push(ChatMessage::assistant(answer));
        c
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    pub fn latest_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::Assistant)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Pasted over the selection.
    Replaced { text: String },
    /// Shown in the response window.
    Displayed { conversation: Conversation },
}

impl DispatchOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Replaced { text } => Some(text),
            DispatchOutcome::Displayed { conversation } => conversation.latest_answer(),
        }
    }
}

pub fn ms(d: Duration) -> u64 {
    d.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_conversation_is_seeded_with_selection_and_answer() {
        let c = Conversation::for_command("Key Points", "long text", "- point");
        assert_eq!(c.title, "Key Points");
        assert_eq!(c.messages[0].content, "Original text to key points:\n\nlong text");
        assert_eq!(c.latest_answer(), Some("- point"));
    }

    #[test]
    fn stage_labels_are_stable() {
        assert_eq!(DispatchStage::Transforming.label(), "transforming");
        assert_eq!(DispatchStage::Failed.label(), "failed");
    }
}
