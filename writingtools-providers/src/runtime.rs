use crate::request::{Body, HttpRequest};
use crate::stream::{FrameDecoder, FrameError, Framing};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// Without an explicit timeout a broken endpoint can hang a dispatch indefinitely.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed response stream: {0}")]
    Stream(#[from] FrameError),
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug)]
pub enum StreamOutcome {
    Completed,
    /// The backend answered with a non-success status; the body is the full error payload.
    Rejected(HttpResponse),
    Cancelled,
}

fn map_reqwest_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout(REQUEST_TIMEOUT)
    } else if e.is_connect() {
        HttpError::Connect(e.to_string())
    } else if e.is_builder() {
        HttpError::InvalidRequest(e.to_string())
    } else {
        HttpError::Transport(e.to_string())
    }
}

fn build(req: &HttpRequest) -> Result<reqwest::RequestBuilder, HttpError> {
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| HttpError::InvalidRequest(format!("build http client: {e}")))?;

    let mut headers = HeaderMap::new();
    for (k, v) in &req.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|_| HttpError::InvalidRequest(format!("invalid header name: {k}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|_| HttpError::InvalidRequest(format!("invalid header value for {k}")))?;
        headers.insert(name, value);
    }

    let builder = match req.method.as_str() {
        "GET" => client.get(&req.url),
        "POST" => client.post(&req.url),
        other => {
            return Err(HttpError::InvalidRequest(format!(
                "unsupported method: {other}"
            )));
        }
    }
    .headers(headers);

    Ok(match &req.body {
        Body::Empty => builder,
        Body::Json(s) => builder.body(s.clone()),
    })
}

pub async fn execute(req: &HttpRequest) -> Result<HttpResponse, HttpError> {
    log::debug!("{} {}", req.method, req.url);
    let resp = build(req)?.send().await.map_err(map_reqwest_error)?;
    let status = resp.status().as_u16();
    log::debug!("{} {} -> {status}", req.method, req.url);
    let body = resp.bytes().await.map_err(map_reqwest_error)?.to_vec();
    Ok(HttpResponse { status, body })
}

/// Like [`execute`], but abandons the request once `cancelled` resolves.
///
/// Returns `Ok(None)` when cancelled.
pub async fn execute_until<C>(req: &HttpRequest, cancelled: C) -> Result<Option<HttpResponse>, HttpError>
where
    C: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = cancelled => Ok(None),
        r = execute(req) => r.map(Some),
    }
}

/// Sends `req` and feeds every framed payload of a successful response to `on_payload`.
///
/// `on_payload` returns `false` once the stream is logically finished. The
/// read loop stops at the next chunk boundary after `cancelled` resolves.
pub async fn execute_streaming<C, F>(
    req: &HttpRequest,
    framing: Framing,
    cancelled: C,
    mut on_payload: F,
) -> Result<StreamOutcome, HttpError>
where
    C: Future<Output = ()>,
    F: FnMut(&str) -> bool,
{
    tokio::pin!(cancelled);

    log::debug!("{} {} (streaming)", req.method, req.url);
    let send = build(req)?.send();
    let resp = tokio::select! {
        biased;
        _ = &mut cancelled => return Ok(StreamOutcome::Cancelled),
        r = send => r.map_err(map_reqwest_error)?,
    };

    let status = resp.status().as_u16();
    if !(200..=299).contains(&status) {
        let body = resp.bytes().await.map_err(map_reqwest_error)?.to_vec();
        return Ok(StreamOutcome::Rejected(HttpResponse { status, body }));
    }

    let mut decoder = FrameDecoder::new(framing);
    let mut stream = resp.bytes_stream();

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut cancelled => return Ok(StreamOutcome::Cancelled),
            n = stream.next() => n,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(map_reqwest_error)?;

        for payload in decoder.push(&chunk)? {
            if !on_payload(&payload) {
                return Ok(StreamOutcome::Completed);
            }
        }
    }

    for payload in decoder.finish()? {
        if !on_payload(&payload) {
            break;
        }
    }
    Ok(StreamOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn execute_passes_status_and_body_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("x-test", "1"))
            .respond_with(ResponseTemplate::new(418).set_body_string("teapot"))
            .mount(&server)
            .await;

        let req = HttpRequest::post_json(format!("{}/echo", server.uri()), &serde_json::json!({}))
            .with_header("x-test", "1");
        let resp = execute(&req).await.unwrap();
        assert_eq!(resp.status, 418);
        assert_eq!(resp.body_text(), "teapot");
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn streaming_collects_payloads_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: one\n\ndata: two\n\ndata: [DONE]\n\ndata: late\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let req = HttpRequest::post_json(format!("{}/stream", server.uri()), &serde_json::json!({}));
        let mut seen = vec![];
        let outcome = execute_streaming(&req, Framing::Sse, std::future::pending(), |p| {
            if p == "[DONE]" {
                return false;
            }
            seen.push(p.to_string());
            true
        })
        .await
        .unwrap();

        assert!(matches!(outcome, StreamOutcome::Completed));
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn streaming_surfaces_error_status_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"bad key\"}"))
            .mount(&server)
            .await;

        let req = HttpRequest::post_json(server.uri(), &serde_json::json!({}));
        let outcome = execute_streaming(&req, Framing::Sse, std::future::pending(), |_| true)
            .await
            .unwrap();
        match outcome {
            StreamOutcome::Rejected(resp) => {
                assert_eq!(resp.status, 401);
                assert!(resp.body_text().contains("bad key"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn already_cancelled_request_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let req = HttpRequest::post_json(server.uri(), &serde_json::json!({}));
        let resp = execute_until(&req, std::future::ready(())).await.unwrap();
        assert!(resp.is_none());
    }
}
