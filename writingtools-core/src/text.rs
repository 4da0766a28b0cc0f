use crate::builtins::INCOMPATIBLE_TEXT_SENTINEL;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

fn thinking_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<thinking>.*?</thinking>|<think>.*?</think>|<reasoning>.*?</reasoning>")
            .expect("valid thinking regex")
    })
}

/// Clean raw backend output before it is routed anywhere.
///
/// Reasoning blocks some models emit are stripped along with the newlines
/// they leave at the start, then trailing newlines. Indentation is kept.
pub fn clean_provider_output(text: &str) -> String {
    let out = thinking_block_re().replace_all(text, "");
    let out = match &out {
        Cow::Owned(stripped) => stripped.trim_start_matches(['\r', '\n']),
        Cow::Borrowed(original) => *original,
    };
    out.trim_end_matches('\n').to_string()
}

pub fn is_incompatible_sentinel(text: &str) -> bool {
    text.trim() == INCOMPATIBLE_TEXT_SENTINEL
}
