use thiserror::Error;
use writingtools_providers::parse::error_message;
use writingtools_providers::runtime::HttpError;

/// Status reported for requests that hit the fixed client timeout.
pub const TIMEOUT_STATUS: u16 = 408;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no API key configured for {provider}")]
    MissingCredential { provider: String },

    #[error("backend returned HTTP {status}")]
    RemoteRequestFailed { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Serialization(String),

    #[error("cancelled")]
    Cancelled,

    #[error("on-device models are not supported on this platform")]
    PlatformUnsupported,

    #[error("busy: {0}")]
    ResourceBusy(String),

    // Never reached the backend (DNS, refused connection, reset).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("text extraction failed: {0}")]
    Ocr(String),
}

impl ProviderError {
    pub fn missing_credential(provider: impl Into<String>) -> Self {
        Self::MissingCredential {
            provider: provider.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RemoteRequestFailed { status, .. } if *status == TIMEOUT_STATUS)
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RemoteRequestFailed { status, body } => {
                let lower = body.to_ascii_lowercase();
                *status == 429 || lower.contains("rate limit") || lower.contains("exhausted")
            }
            _ => false,
        }
    }

    /// Text suitable for the inline error indicator.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingCredential { provider } => format!(
                "No API key is set for {provider}. Open Settings and add one to the provider section."
            ),
            _ if self.is_rate_limited() => "The provider's rate limit was hit. Try again in a few moments, or switch to a model with a higher usage limit in Settings.".to_string(),
            Self::RemoteRequestFailed { status, .. } if *status == TIMEOUT_STATUS => {
                "The provider did not answer in time. Try again.".to_string()
            }
            Self::RemoteRequestFailed { status, body } => {
                match error_message(body.as_bytes()) {
                    Some(msg) => format!("The provider returned an error ({status}): {msg}"),
                    None => format!("The provider returned an error ({status})."),
                }
            }
            other => format!("An error occurred: {other}"),
        }
    }
}

impl From<HttpError> for ProviderError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(after) => Self::RemoteRequestFailed {
                status: TIMEOUT_STATUS,
                body: format!("request timed out after {}s", after.as_secs()),
            },
            HttpError::Connect(msg) | HttpError::Transport(msg) => Self::Transport(msg),
            HttpError::InvalidRequest(msg) => Self::Serialization(msg),
            HttpError::Stream(err) => Self::Serialization(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("the selected text is incompatible with the requested change")]
    IncompatibleText,

    #[error("no text is selected")]
    EmptySelection,

    #[error("command `{0}` has no usable prompt")]
    InvalidCommand(String),

    #[error("could not deliver the result: {0}")]
    Delivery(String),
}

impl DispatchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_cancelled())
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(e) => e.user_message(),
            Self::IncompatibleText => {
                "The selected text doesn't work with this command. Try a different selection or command.".to_string()
            }
            Self::EmptySelection => "Please select text to use this command.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeout_becomes_remote_failure_with_timeout_status() {
        let err: ProviderError = HttpError::Timeout(Duration::from_secs(30)).into();
        assert!(err.is_timeout());
        assert!(matches!(err, ProviderError::RemoteRequestFailed { status: 408, .. }));
    }

    #[test]
    fn connect_failure_is_transport_not_remote() {
        let err: ProviderError = HttpError::Connect("refused".into()).into();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[test]
    fn rate_limits_are_detected_by_status_or_body() {
        let by_status = ProviderError::RemoteRequestFailed {
            status: 429,
            body: String::new(),
        };
        let by_body = ProviderError::RemoteRequestFailed {
            status: 400,
            body: "Resource has been exhausted (e.g. check quota).".into(),
        };
        assert!(by_status.is_rate_limited());
        assert!(by_body.is_rate_limited());
        assert!(by_body.user_message().contains("rate limit"));
    }

    #[test]
    fn remote_failure_message_uses_error_body() {
        let err = ProviderError::RemoteRequestFailed {
            status: 404,
            body: r#"{"error":{"message":"model not found"}}"#.into(),
        };
        assert_eq!(
            err.user_message(),
            "The provider returned an error (404): model not found"
        );
    }

    #[test]
    fn missing_credential_points_at_settings() {
        let err = ProviderError::missing_credential("Gemini");
        assert!(err.user_message().contains("Settings"));
        assert!(err.user_message().contains("Gemini"));
    }
}
