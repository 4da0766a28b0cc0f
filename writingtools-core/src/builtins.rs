use crate::command::Command;
use crate::types::CommandId;
use serde::{Deserialize, Serialize};

/// Output a backend is told to emit verbatim when the input makes no sense for the request.
pub const INCOMPATIBLE_TEXT_SENTINEL: &str = "ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST";

const SAME_LANGUAGE: &str =
    "Respond in the same language as the input (e.g., English US, French).";
const DO_NOT_ANSWER: &str = "Do not answer or respond to the user's text content.";

/// The fixed set of writing options shipped with the app.
///
/// Variant names double as the historical option keys used before commands
/// became user-editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltIn {
    Proofread,
    Rewrite,
    #[serde(rename = "Friendly")]
    FriendlyTone,
    #[serde(rename = "Professional")]
    ProfessionalTone,
    Concise,
    Summary,
    #[serde(rename = "Key Points")]
    KeyPoints,
    Table,
}

impl BuiltIn {
    pub const ALL: [BuiltIn; 8] = [
        BuiltIn::Proofread,
        BuiltIn::Rewrite,
        BuiltIn::FriendlyTone,
        BuiltIn::ProfessionalTone,
        BuiltIn::Concise,
        BuiltIn::Summary,
        BuiltIn::KeyPoints,
        BuiltIn::Table,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltIn::Proofread => "Proofread",
            BuiltIn::Rewrite => "Rewrite",
            BuiltIn::FriendlyTone => "Friendly",
            BuiltIn::ProfessionalTone => "Professional",
            BuiltIn::Concise => "Concise",
            BuiltIn::Summary => "Summary",
            BuiltIn::KeyPoints => "Key Points",
            BuiltIn::Table => "Table",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            BuiltIn::Proofread => "magnifyingglass",
            BuiltIn::Rewrite => "arrow.triangle.2.circlepath",
            BuiltIn::FriendlyTone => "face.smiling",
            BuiltIn::ProfessionalTone => "briefcase",
            BuiltIn::Concise => "scissors",
            BuiltIn::Summary => "doc.text",
            BuiltIn::KeyPoints => "list.bullet",
            BuiltIn::Table => "tablecells",
        }
    }

    /// Summary-style outputs are read, not pasted.
    pub fn opens_window(self) -> bool {
        matches!(self, BuiltIn::Summary | BuiltIn::KeyPoints | BuiltIn::Table)
    }

    pub fn instruction(self) -> String {
        let body = match self {
            BuiltIn::Proofread => format!(
                "You are a grammar proofreading assistant. Output ONLY the corrected text without any additional comments. Maintain the original text structure and writing style. {SAME_LANGUAGE} {DO_NOT_ANSWER}"
            ),
            BuiltIn::Rewrite => format!(
                "You are a writing assistant. Rewrite the text provided by the user to improve phrasing. Output ONLY the rewritten text without additional comments. {SAME_LANGUAGE} {DO_NOT_ANSWER}"
            ),
            BuiltIn::FriendlyTone => format!(
                "You are a writing assistant. Rewrite the text provided by the user to be more friendly. Output ONLY the friendly text without additional comments. {SAME_LANGUAGE} {DO_NOT_ANSWER}"
            ),
            BuiltIn::ProfessionalTone => format!(
                "You are a writing assistant. Rewrite the text provided by the user to sound more professional. Output ONLY the professional text without additional comments. {SAME_LANGUAGE} {DO_NOT_ANSWER}"
            ),
            BuiltIn::Concise => format!(
                "You are a writing assistant. Rewrite the text provided by the user to be slightly more concise in tone, thus making it just a bit shorter. Do not change the text too much or be too reductive. Output ONLY the concise version without additional comments. {SAME_LANGUAGE} {DO_NOT_ANSWER}"
            ),
            BuiltIn::Summary => format!(
                "You are a summarization assistant. Provide a succinct summary of the text provided by the user. The summary should be succinct yet encompass all the key insightful points. To make it quite legible and readable, you should use Markdown formatting (bold, italics, codeblocks...) as appropriate. {SAME_LANGUAGE} {DO_NOT_ANSWER}"
            ),
            BuiltIn::KeyPoints => format!(
                "You are an assistant that extracts key points from text provided by the user. Output ONLY the key points without additional comments. You should use Markdown formatting (lists, bold, italics, codeblocks, etc.) as appropriate to make it quite legible and readable. {SAME_LANGUAGE} {DO_NOT_ANSWER}"
            ),
            BuiltIn::Table => format!(
                "You are an assistant that converts text provided by the user into a Markdown table. Output ONLY the table without additional comments. {SAME_LANGUAGE} {DO_NOT_ANSWER}"
            ),
        };

        format!(
            "{body} If the text is completely incompatible with this (e.g., totally random gibberish), output \"{INCOMPATIBLE_TEXT_SENTINEL}\"."
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let needle = name.trim();
        BuiltIn::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(needle))
    }

    /// A fresh command record for this option.
    pub fn to_command(self) -> Command {
        Command {
            id: CommandId::new(),
            name: self.name().into(),
            prompt: self.instruction(),
            icon: self.icon().into(),
            use_response_window: self.opens_window(),
            is_built_in: true,
            has_shortcut: false,
            preserve_formatting: false,
        }
    }
}

/// The canonical built-in set, in display order.
pub fn builtin_commands() -> Vec<Command> {
    BuiltIn::ALL.into_iter().map(BuiltIn::to_command).collect()
}
