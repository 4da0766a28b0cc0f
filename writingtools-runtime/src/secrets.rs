use anyhow::Context;
use writingtools_core::config::ProviderKind;

/// Where we store secrets in the OS keyring.
///
/// Constant so upgrades don't orphan secrets.
const SERVICE: &str = "writingtools";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKey {
    GeminiApiKey,
    OpenAiCompatibleApiKey,
}

impl SecretKey {
    pub fn user(self) -> &'static str {
        match self {
            SecretKey::GeminiApiKey => "gemini_api_key",
            SecretKey::OpenAiCompatibleApiKey => "openai_compatible_api_key",
        }
    }

    pub fn for_provider(kind: ProviderKind) -> Option<Self> {
        match kind {
            ProviderKind::Gemini => Some(SecretKey::GeminiApiKey),
            ProviderKind::OpenAiCompatible => Some(SecretKey::OpenAiCompatibleApiKey),
            ProviderKind::Ollama | ProviderKind::Local => None,
        }
    }
}

pub fn set_secret(key: SecretKey, value: &str) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    entry.set_password(value).context("set secret")
}

pub fn get_secret(key: SecretKey) -> anyhow::Result<Option<String>> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;

    match entry.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(anyhow::Error::new(e)).context("get secret"),
    }
}

pub fn delete_secret(key: SecretKey) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(anyhow::Error::new(e)).context("delete secret"),
    }
}

/// API keys handed to the cloud backends. Empty means "not configured".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub gemini_api_key: String,
    pub openai_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("gemini_api_key", &"[REDACTED]")
            .field("openai_api_key", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Reads both keys; an unreadable keyring is treated as no key.
    pub fn from_keyring() -> Self {
        let read = |key: SecretKey| match get_secret(key) {
            Ok(v) => v.unwrap_or_default(),
            Err(e) => {
                log::warn!("could not read {} from keyring: {e:#}", key.user());
                String::new()
            }
        };
        Self {
            gemini_api_key: read(SecretKey::GeminiApiKey),
            openai_api_key: read(SecretKey::OpenAiCompatibleApiKey),
        }
    }

    pub fn get(&self, key: SecretKey) -> &str {
        match key {
            SecretKey::GeminiApiKey => &self.gemini_api_key,
            SecretKey::OpenAiCompatibleApiKey => &self.openai_api_key,
        }
    }

    pub fn set(&mut self, key: SecretKey, value: impl Into<String>) {
        match key {
            SecretKey::GeminiApiKey => self.gemini_api_key = value.into(),
            SecretKey::OpenAiCompatibleApiKey => self.openai_api_key = value.into(),
        }
    }
}
