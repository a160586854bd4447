//! Shared application state and the `/v1/messages` request dispatcher.
//!
//! Ties the translators, the upstream client, and the OAuth token cache
//! together behind a single entry point. Mirrors the teacher's
//! config-hot-reload shape (an `Arc`-swapped snapshot behind a short-lived
//! `RwLock` read), generalized to also swap the upstream client and token
//! cache together with the config they were built from.

use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Instant,
};

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    config::Config,
    error::ProxyError,
    model_mapper::ModelMapper,
    oauth::TokenCache,
    traffic::{TrafficEntry, TrafficLog},
    translate::{self, stream::StreamTranslator},
    upstream::UpstreamClient,
};

const DEV_MOCK_TOKEN: &str = "dev-mock-token";

/// Config plus everything built from it, swapped together on hot-reload so a
/// request never sees a config and an upstream client from different
/// generations.
struct Snapshot {
    config: Arc<Config>,
    upstream: UpstreamClient,
    token_cache: Option<TokenCache>,
    /// Resolved once per snapshot build, not per request — `Config::proxy_access_token`
    /// mints a fresh random value every call when no env var is configured, so
    /// re-deriving it per request would make auth fail for every request after the first.
    proxy_access_token: secrecy::SecretString,
}

impl Snapshot {
    fn build(config: Config) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(config.upstream.target_endpoint.clone(), config.server.skip_ssl_verify)?;
        let token_cache = config
            .oauth
            .clone()
            .map(|oauth| TokenCache::new(reqwest::Client::new(), oauth));
        let proxy_access_token = config.proxy_access_token();
        Ok(Self { config: Arc::new(config), upstream, token_cache, proxy_access_token })
    }
}

/// Shared application state injected into every request handler.
pub struct AppState {
    snapshot: RwLock<Arc<Snapshot>>,
    pub config_path: PathBuf,
    pub traffic: Arc<TrafficLog>,
    pub started_at: Instant,
    /// Resolved once at process startup, like the teacher's `RouterState`
    /// admin token — not reread from the environment on every request.
    admin_token: Option<String>,
}

impl AppState {
    pub fn new(config: Config, config_path: PathBuf, traffic: Arc<TrafficLog>) -> anyhow::Result<Self> {
        let admin_token = config.server.admin_token_env.as_deref().and_then(|var| std::env::var(var).ok());
        Ok(Self {
            snapshot: RwLock::new(Arc::new(Snapshot::build(config)?)),
            config_path,
            traffic,
            started_at: Instant::now(),
            admin_token,
        })
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }

    pub fn config(&self) -> Arc<Config> {
        self.current().config.clone()
    }

    /// The client-facing access token in effect for the current snapshot —
    /// exposed so `main` can log it once at startup when auto-generated.
    pub fn proxy_access_token(&self) -> secrecy::SecretString {
        self.current().proxy_access_token.clone()
    }

    /// Atomically replace config and everything derived from it. Called only
    /// from the hot-reload background task.
    pub fn replace_config(&self, config: Config) -> anyhow::Result<()> {
        let snapshot = Arc::new(Snapshot::build(config)?);
        *self.snapshot.write().expect("snapshot lock poisoned") = snapshot;
        Ok(())
    }
}

/// `POST /v1/messages`. Returns a finished axum [`Response`] — either a JSON
/// body (placeholder, non-streaming, or error) or an `text/event-stream` body.
///
/// Client authentication is enforced upstream of this function by
/// [`crate::api::client_auth`]'s middleware layer — by the time a request
/// reaches here it has already presented a valid key.
pub async fn handle_messages(state: &AppState, raw_body: &[u8], request_id: &str) -> Response {
    let start = Instant::now();
    let snapshot = state.current();
    let config = &snapshot.config;

    let anthropic_request: Value = match serde_json::from_slice(raw_body) {
        Ok(Value::Null) => {
            let e = ProxyError::InvalidRequest("empty request body".to_string());
            return finish(state, request_id, "/v1/messages", start, false, e);
        }
        Ok(v) => v,
        Err(e) => {
            let e = ProxyError::InvalidRequest(format!("invalid JSON: {e}"));
            return finish(state, request_id, "/v1/messages", start, false, e);
        }
    };

    let original_model =
        anthropic_request.get("model").and_then(Value::as_str).unwrap_or("claude-sonnet-4-20250514").to_string();
    let is_streaming = anthropic_request.get("stream").and_then(Value::as_bool).unwrap_or(false);

    tracing::info!(model = %original_model, stream = is_streaming, "dispatching /v1/messages");

    if config.server.use_placeholder_mode {
        return if is_streaming {
            placeholder_stream_response(state, &original_model, request_id, start)
        } else {
            let resp = placeholder_response(&original_model);
            finish_ok(state, request_id, "/v1/messages", start, false, resp, Some((100, 20)))
        };
    }

    let mapper = ModelMapper::new(&config.models.mapping);
    let openai_request = match translate::translate_request(&anthropic_request, &mapper, config.models.default_max_tokens)
    {
        Ok(r) => r,
        Err(e) => {
            let e = ProxyError::InvalidRequest(format!("translation error: {e}"));
            return finish(state, request_id, "/v1/messages", start, is_streaming, e);
        }
    };

    let auth = select_authorization(config, snapshot.token_cache.as_ref()).await;

    if is_streaming {
        match snapshot.upstream.chat_completions_stream(&openai_request, auth.as_deref()).await {
            Ok(Ok(upstream_stream)) => {
                let (tx, rx) = mpsc::channel::<Result<axum::body::Bytes, std::io::Error>>(32);
                let translator = StreamTranslator::new(original_model.clone());
                let request_id_owned = request_id.to_string();
                let traffic = Arc::clone(&state.traffic);

                tokio::spawn(drive_stream(upstream_stream, translator, tx, traffic, request_id_owned, start));

                let body = Body::from_stream(ReceiverStream::new(rx));
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .header(header::CACHE_CONTROL, "no-cache")
                    .header(header::CONNECTION, "keep-alive")
                    .header("x-accel-buffering", "no")
                    .body(body)
                    .unwrap_or_else(|_| ProxyError::Internal("failed to build streaming response".into()).into_response())
            }
            Ok(Err(upstream_err)) => {
                let e = map_upstream_error(upstream_err.status, &upstream_err.body);
                finish(state, request_id, "/v1/messages", start, true, e)
            }
            Err(e) => {
                let e = classify_transport_error(&e);
                finish(state, request_id, "/v1/messages", start, true, e)
            }
        }
    } else {
        match snapshot.upstream.chat_completions(&openai_request, auth.as_deref()).await {
            Ok(Ok(openai_response)) => {
                let anthropic_response = translate::translate_response(&openai_response, &original_model);
                let usage = Some((anthropic_response.usage.input_tokens, anthropic_response.usage.output_tokens));
                finish_ok(state, request_id, "/v1/messages", start, false, serde_json::to_value(&anthropic_response).unwrap(), usage)
            }
            Ok(Err(upstream_err)) => {
                let e = map_upstream_error(upstream_err.status, &upstream_err.body);
                finish(state, request_id, "/v1/messages", start, false, e)
            }
            Err(e) => {
                let e = classify_transport_error(&e);
                finish(state, request_id, "/v1/messages", start, false, e)
            }
        }
    }
}

/// Reads upstream SSE lines, translates each through `translator`, and pushes
/// the resulting Anthropic SSE text to `tx`. Runs until the upstream stream
/// ends or the receiver is dropped (client disconnected).
async fn drive_stream(
    mut upstream: crate::upstream::UpstreamStream,
    mut translator: StreamTranslator,
    tx: mpsc::Sender<Result<axum::body::Bytes, std::io::Error>>,
    traffic: Arc<TrafficLog>,
    request_id: String,
    start: Instant,
) {
    use futures_util::StreamExt as _;

    let mut buf: Vec<u8> = Vec::new();
    let mut done_marker_seen = false;

    'outer: loop {
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            let events = translator.translate_chunk(line);
            if line.trim_ascii() == b"data: [DONE]" {
                done_marker_seen = true;
            }
            if !events.is_empty() {
                let chunk = events.concat().into_bytes();
                if tx.send(Ok(chunk.into())).await.is_err() {
                    return; // client disconnected
                }
            }
            if done_marker_seen {
                break 'outer;
            }
        }

        match upstream.next().await {
            Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
            Some(Err(e)) => {
                tracing::error!(error = %e, "upstream streaming read failed");
                let event = json!({ "type": "error", "error": { "type": "api_error", "message": e.to_string() } });
                let frame = format!("event: error\ndata: {event}\n\n").into_bytes();
                let _ = tx.send(Ok(frame.into())).await;
                break;
            }
            None => {
                if !buf.is_empty() {
                    let events = translator.translate_chunk(&buf);
                    if !events.is_empty() {
                        let chunk = events.concat().into_bytes();
                        let _ = tx.send(Ok(chunk.into())).await;
                    }
                }
                if !done_marker_seen {
                    // Connection closed without [DONE]: emit the stream-end
                    // sequence anyway so the client sees a terminal event.
                    let events = translator.translate_chunk(b"data: [DONE]");
                    let chunk = events.concat().into_bytes();
                    let _ = tx.send(Ok(chunk.into())).await;
                }
                break;
            }
        }
    }

    let (input_tokens, output_tokens) = translator.usage();
    traffic.push(
        TrafficEntry::new(request_id, "/v1/messages".to_string(), 200, start.elapsed().as_millis() as u64, true)
            .with_usage(input_tokens, output_tokens),
    );
}

/// Selects the outbound `Authorization` header by priority: dev-mode static
/// token, OAuth token from cache, static upstream API key, then none.
async fn select_authorization(config: &Config, token_cache: Option<&TokenCache>) -> Option<String> {
    if config.server.dev_mode {
        tracing::debug!("using dev mock token");
        return Some(DEV_MOCK_TOKEN.to_string());
    }

    if let Some(cache) = token_cache {
        if let Some(token) = cache.get_token().await {
            tracing::debug!("using OAuth token");
            return Some(token);
        }
        tracing::warn!("OAuth token unavailable; falling back to next auth priority");
    }

    if let Some(key) = config.upstream.target_api_key() {
        tracing::debug!("using static upstream API key");
        return Some(key.expose_secret().to_string());
    }

    tracing::warn!("no authentication configured for upstream");
    None
}

fn map_upstream_error(status: reqwest::StatusCode, body: &Value) -> ProxyError {
    let envelope = translate::error::translate_error(body);
    let error_type = envelope["error"]["type"].as_str().unwrap_or("api_error").to_string();
    let message = envelope["error"]["message"].as_str().unwrap_or("upstream error").to_string();
    let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    ProxyError::Upstream { status, error_type, message }
}

/// Distinguishes a request timeout (→ 529 `overloaded_error`) from any other
/// transport failure (→ 502 `api_error`, the catch-all for connection errors).
fn classify_transport_error(e: &anyhow::Error) -> ProxyError {
    let is_timeout = e.chain().any(|cause| cause.downcast_ref::<reqwest::Error>().is_some_and(|re| re.is_timeout()));
    if is_timeout {
        ProxyError::Overloaded
    } else {
        ProxyError::Upstream {
            status: StatusCode::BAD_GATEWAY,
            error_type: "api_error".to_string(),
            message: format!("connection error: {e}"),
        }
    }
}

fn placeholder_response(model: &str) -> Value {
    json!({
        "id": format!("msg_{}", &uuid::Uuid::new_v4().simple().to_string()[..24]),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{ "type": "text", "text": "This is a placeholder response from anthropic-openai-proxy." }],
        "stop_reason": "end_turn",
        "stop_sequence": null,
        "usage": { "input_tokens": 100, "output_tokens": 20 },
    })
}

fn placeholder_stream_response(state: &AppState, model: &str, request_id: &str, start: Instant) -> Response {
    let content = "This is a placeholder streaming response from anthropic-openai-proxy.";
    let mut translator = StreamTranslator::new(model.to_string());
    let mut frames = Vec::new();

    frames.extend(translator.translate_chunk(br#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#));
    for word in content.split_inclusive(' ') {
        let chunk = json!({ "choices": [{ "delta": { "content": word } }] });
        frames.extend(translator.translate_chunk(format!("data: {chunk}").as_bytes()));
    }
    frames.extend(translator.translate_chunk(br#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#));
    frames.extend(translator.translate_chunk(b"data: [DONE]"));

    let body = frames.concat();
    // Synthetic chunks above carry no "usage" field, so report the same
    // fixed figures as the non-streaming placeholder rather than reading
    // translator.usage() (which would stay zeroed).
    state.traffic.push(
        TrafficEntry::new(request_id.to_string(), "/v1/messages".to_string(), 200, start.elapsed().as_millis() as u64, true)
            .with_usage(100, 20),
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(Body::from(body))
        .unwrap_or_else(|_| ProxyError::Internal("failed to build placeholder stream".into()).into_response())
}

fn finish(state: &AppState, request_id: &str, path: &str, start: Instant, stream: bool, error: ProxyError) -> Response {
    let entry = TrafficEntry::new(
        request_id.to_string(),
        path.to_string(),
        error.status().as_u16(),
        start.elapsed().as_millis() as u64,
        stream,
    )
    .with_error(error.to_string());
    state.traffic.push(entry);
    error.into_response()
}

fn finish_ok(
    state: &AppState,
    request_id: &str,
    path: &str,
    start: Instant,
    stream: bool,
    body: Value,
    usage: Option<(u64, u64)>,
) -> Response {
    let mut entry = TrafficEntry::new(request_id.to_string(), path.to_string(), 200, start.elapsed().as_millis() as u64, stream);
    if let Some((input, output)) = usage {
        entry = entry.with_usage(input, output);
    }
    state.traffic.push(entry);
    (StatusCode::OK, Json(body)).into_response()
}
