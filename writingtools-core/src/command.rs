use crate::types::CommandId;
use serde::{Deserialize, Serialize};

/// A named, reusable instruction that can be invoked against a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub name: String,
    /// Plain instruction text or a structured prompt document (see [`crate::prompt`]).
    pub prompt: String,
    pub icon: String,

    /// Show the result in a response window instead of replacing the selection.
    #[serde(default)]
    pub use_response_window: bool,
    #[serde(default)]
    pub is_built_in: bool,
    #[serde(default)]
    pub has_shortcut: bool,
    #[serde(default)]
    pub preserve_formatting: bool,
}

impl Command {
    /// A user-authored command with a fresh identity.
    pub fn custom(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: CommandId::new(),
            name: name.into(),
            prompt: prompt.into(),
            icon: "star".into(),
            use_response_window: false,
            is_built_in: false,
            has_shortcut: false,
            preserve_formatting: false,
        }
    }

    pub fn with_id(mut self, id: CommandId) -> Self {
        self.id = id;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn in_response_window(mut self, value: bool) -> Self {
        self.use_response_window = value;
        self
    }

    pub fn preserving_formatting(mut self, value: bool) -> Self {
        self.preserve_formatting = value;
        self
    }

    /// Whether the command can be offered to the dispatch path.
    pub fn is_dispatchable(&self) -> bool {
        !self.name.trim().is_empty() && !self.prompt.trim().is_empty()
    }
}
