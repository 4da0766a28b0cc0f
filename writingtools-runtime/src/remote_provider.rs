//! Plumbing shared by the HTTP backends.

use serde_json::Value;
use writingtools_engine::cancel::{BusyFlag, BusyGuard, CancelToken, Canceller};
use writingtools_engine::error::ProviderError;
use writingtools_providers::request::HttpRequest;
use writingtools_providers::runtime::{self, StreamOutcome};
use writingtools_providers::stream::Framing;

/// Cancellation plus the busy flag behind `is_processing`.
#[derive(Debug, Clone, Default)]
pub struct WorkGate {
    canceller: Canceller,
    busy: BusyFlag,
}

impl WorkGate {
    pub fn begin(&self) -> (CancelToken, BusyGuard) {
        (self.canceller.token(), self.busy.enter())
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
        self.busy.reset();
    }

    pub fn is_processing(&self) -> bool {
        self.busy.is_set()
    }
}

fn rejected(provider: &str, status: u16, body: String) -> ProviderError {
    log::warn!("{provider} request failed with HTTP {status}");
    ProviderError::RemoteRequestFailed { status, body }
}

/// Sends one request and parses the complete body.
pub async fn send_once(
    provider: &str,
    req: &HttpRequest,
    token: &CancelToken,
    parse: fn(&[u8]) -> anyhow::Result<String>,
) -> Result<String, ProviderError> {
    token.check()?;
    let resp = runtime::execute_until(req, token.cancelled())
        .await
        .map_err(|e| {
            log::warn!("{provider} request failed: {e}");
            ProviderError::from(e)
        })?
        .ok_or(ProviderError::Cancelled)?;

    if !resp.is_success() {
        return Err(rejected(provider, resp.status, resp.body_text()));
    }
    parse(&resp.body).map_err(|e| ProviderError::Serialization(format!("{e:#}")))
}

/// Streams a response and returns the concatenation of every chunk.
///
/// `extract` returns the text carried by one decoded event and whether that
/// event ends the stream.
pub async fn send_streaming(
    provider: &str,
    req: &HttpRequest,
    framing: Framing,
    token: &CancelToken,
    extract: fn(&Value) -> (Option<String>, bool),
) -> Result<String, ProviderError> {
    token.check()?;

    let mut out = String::new();
    let mut malformed: Option<String> = None;
    let outcome = runtime::execute_streaming(req, framing, token.cancelled(), |payload| {
        if payload.trim() == "[DONE]" {
            return false;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(event) => {
                let (piece, done) = extract(&event);
                if let Some(piece) = piece {
                    out.push_str(&piece);
                }
                !done
            }
            Err(e) => {
                malformed = Some(e.to_string());
                false
            }
        }
    })
    .await
    .map_err(|e| {
        log::warn!("{provider} stream failed: {e}");
        ProviderError::from(e)
    })?;

    match outcome {
        StreamOutcome::Completed => match malformed {
            Some(e) => Err(ProviderError::Serialization(format!("stream chunk: {e}"))),
            None => Ok(out),
        },
        StreamOutcome::Rejected(resp) => Err(rejected(provider, resp.status, resp.body_text())),
        StreamOutcome::Cancelled => Err(ProviderError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_clears_busy_and_spares_later_work() {
        let gate = WorkGate::default();
        let (token, _guard) = gate.begin();
        assert!(gate.is_processing());

        gate.cancel();
        assert!(!gate.is_processing());
        assert!(token.is_cancelled());

        let (next, _g) = gate.begin();
        assert!(!next.is_cancelled());
    }
}
