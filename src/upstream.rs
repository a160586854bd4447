//! HTTP client wrapper for the upstream OpenAI-compatible endpoint.
//!
//! Mirrors the teacher adapters' dual-client split: a buffered client carrying
//! the non-streaming request timeout, and a separate client for SSE bodies
//! with a longer timeout sized for a full streamed completion rather than a
//! single buffered response. Unlike a single-backend adapter, the
//! `Authorization` header here varies per request (dev mode / OAuth / static
//! key / none — see [`crate::dispatch`]), so it is supplied at call time
//! rather than baked into the client's default headers.

use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures_util::{Stream, StreamExt as _};
use reqwest::Client;
use serde_json::Value;

use crate::translate::types::OpenAiRequest;

const NON_STREAMING_TIMEOUT: Duration = Duration::from_secs(120);
const STREAMING_TIMEOUT: Duration = Duration::from_secs(600);

/// A `Send`-able, heap-allocated byte stream of raw upstream SSE data.
pub type UpstreamStream = std::pin::Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// An upstream HTTP response that did not parse as a successful chat
/// completion — carries enough to drive `translate::error::translate_error`
/// and the dispatcher's status-code passthrough.
pub struct UpstreamError {
    pub status: reqwest::StatusCode,
    pub body: Value,
}

pub struct UpstreamClient {
    client: Client,
    stream_client: Client,
    endpoint: String,
}

impl UpstreamClient {
    /// Build a client targeting `endpoint` (e.g. `https://api.openai.com/v1`).
    /// `/chat/completions` is appended by the request methods below.
    pub fn new(endpoint: String, skip_ssl_verify: bool) -> anyhow::Result<Self> {
        let base = Client::builder().timeout(NON_STREAMING_TIMEOUT).danger_accept_invalid_certs(skip_ssl_verify);
        let stream_base = Client::builder().timeout(STREAMING_TIMEOUT).danger_accept_invalid_certs(skip_ssl_verify);

        Ok(Self {
            client: base.build().context("building upstream HTTP client")?,
            stream_client: stream_base.build().context("building upstream streaming HTTP client")?,
            endpoint,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    /// Non-streaming `POST /chat/completions`. Returns the parsed JSON body on
    /// 2xx, or an [`UpstreamError`] carrying the status and error body on
    /// non-2xx (the request itself still succeeded at the transport layer).
    pub async fn chat_completions(
        &self,
        body: &OpenAiRequest,
        auth: Option<&str>,
    ) -> anyhow::Result<Result<Value, UpstreamError>> {
        let mut req = self.client.post(self.url()).json(body);
        if let Some(token) = auth {
            req = req.bearer_auth(token);
        }

        let response = req.send().await.with_context(|| format!("POST {}", self.url()))?;
        let status = response.status();
        let text = response.text().await.context("reading upstream response body")?;

        if status.is_success() {
            let value = serde_json::from_str(&text)
                .with_context(|| format!("parsing upstream response as JSON: {text}"))?;
            Ok(Ok(value))
        } else {
            let body = serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text));
            Ok(Err(UpstreamError { status, body }))
        }
    }

    /// Streaming `POST /chat/completions`. Returns immediately after the
    /// response headers arrive; non-2xx is surfaced as an [`UpstreamError`]
    /// with the buffered error body (SSE upstreams still send a normal JSON
    /// error body on rejection, before ever switching to `text/event-stream`).
    pub async fn chat_completions_stream(
        &self,
        body: &OpenAiRequest,
        auth: Option<&str>,
    ) -> anyhow::Result<Result<UpstreamStream, UpstreamError>> {
        let mut req = self.stream_client.post(self.url()).json(body);
        if let Some(token) = auth {
            req = req.bearer_auth(token);
        }

        let response = req.send().await.with_context(|| format!("POST {} (streaming)", self.url()))?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.context("reading upstream error body")?;
            let body = serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text));
            return Ok(Err(UpstreamError { status, body }));
        }

        let stream = response.bytes_stream().map(|r| r.map_err(anyhow::Error::from));
        Ok(Ok(Box::pin(stream)))
    }
}
