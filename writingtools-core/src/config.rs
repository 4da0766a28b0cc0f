use serde::{Deserialize, Serialize};

/// Which backend handles dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    OpenAiCompatible,
    Ollama,
    Local,
}

impl ProviderKind {
    pub fn label(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAiCompatible => "openai-compatible",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Local => "local",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(ProviderKind::Gemini),
            "openai" | "openai-compatible" | "openai_compatible" => {
                Some(ProviderKind::OpenAiCompatible)
            }
            "ollama" => Some(ProviderKind::Ollama),
            "local" => Some(ProviderKind::Local),
            _ => None,
        }
    }

    pub fn requires_credential(self) -> bool {
        matches!(self, ProviderKind::Gemini | ProviderKind::OpenAiCompatible)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiSettings {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiCompatibleSettings {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub organisation: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    // Minutes the daemon keeps the model resident after a request.
    pub keep_alive_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModelSettings {
    pub selected_model_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub active_provider: ProviderKind,
    pub gemini: GeminiSettings,
    pub openai_compatible: OpenAiCompatibleSettings,
    pub ollama: OllamaSettings,
    pub local: LocalModelSettings,

    #[serde(default)]
    pub cloud_sync_enabled: bool,

    // Delay between reactivating the source app and pasting into it.
    #[serde(default = "default_paste_settle_ms")]
    pub paste_settle_ms: u64,

    // Secrets are stored outside this struct at rest.
    #[serde(default)]
    pub gemini_api_key_present: bool,
    #[serde(default)]
    pub openai_api_key_present: bool,
}

pub fn default_paste_settle_ms() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_aliases() {
        assert_eq!(ProviderKind::parse("OpenAI"), Some(ProviderKind::OpenAiCompatible));
        assert_eq!(ProviderKind::parse(" ollama "), Some(ProviderKind::Ollama));
        assert_eq!(ProviderKind::parse("mlx"), None);
    }

    #[test]
    fn only_cloud_backends_need_a_credential() {
        assert!(ProviderKind::Gemini.requires_credential());
        assert!(ProviderKind::OpenAiCompatible.requires_credential());
        assert!(!ProviderKind::Ollama.requires_credential());
        assert!(!ProviderKind::Local.requires_credential());
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ProviderKind::OpenAiCompatible).unwrap(),
            "\"open_ai_compatible\""
        );
    }
}
