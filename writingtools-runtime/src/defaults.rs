use crate::models::DEFAULT_LOCAL_MODEL_ID;
use writingtools_core::config::{
    GeminiSettings, LocalModelSettings, OllamaSettings, OpenAiCompatibleSettings, ProviderKind,
    Settings, default_paste_settle_ms,
};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_OLLAMA_KEEP_ALIVE_MINUTES: u32 = 5;

pub fn default_settings() -> Settings {
    Settings {
        active_provider: ProviderKind::Gemini,
        gemini: GeminiSettings {
            model: DEFAULT_GEMINI_MODEL.into(),
        },
        openai_compatible: OpenAiCompatibleSettings {
            base_url: writingtools_providers::openai_compatible::DEFAULT_BASE_URL.into(),
            model: DEFAULT_OPENAI_MODEL.into(),
            organisation: None,
            project: None,
        },
        ollama: OllamaSettings {
            base_url: writingtools_providers::ollama::DEFAULT_BASE_URL.into(),
            model: DEFAULT_OLLAMA_MODEL.into(),
            keep_alive_minutes: DEFAULT_OLLAMA_KEEP_ALIVE_MINUTES,
        },
        local: LocalModelSettings {
            selected_model_id: DEFAULT_LOCAL_MODEL_ID.into(),
        },
        cloud_sync_enabled: false,
        paste_settle_ms: default_paste_settle_ms(),
        gemini_api_key_present: false,
        openai_api_key_present: false,
    }
}
