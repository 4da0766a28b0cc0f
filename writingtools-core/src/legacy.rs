// Predecessor schemas folded into the unified command list on first launch.

use crate::builtins::BuiltIn;
use crate::command::Command;
use crate::types::CommandId;
use serde::{Deserialize, Serialize};

/// A user command from the old free-form custom command list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCustomCommand {
    pub id: CommandId,
    pub name: String,
    pub prompt: String,
    #[serde(default = "default_legacy_icon")]
    pub icon: String,
    #[serde(default)]
    pub use_response_window: bool,
}

fn default_legacy_icon() -> String {
    "star".into()
}

impl LegacyCustomCommand {
    pub fn into_command(self) -> Command {
        Command {
            id: self.id,
            name: self.name,
            prompt: self.prompt,
            icon: self.icon,
            use_response_window: self.use_response_window,
            is_built_in: false,
            has_shortcut: false,
            preserve_formatting: false,
        }
    }
}

/// Convert the historical fixed options 1:1 (new identities, built-in flag set).
pub fn convert_legacy_options(options: &[BuiltIn]) -> Vec<Command> {
    options.iter().map(|o| o.to_command()).collect()
}
