//! HTTP backend for the Bedrock runtime `converse-stream` endpoint.
//!
//! - Auth via bearer API key (not SigV4)
//! - Model id travels percent-encoded in the path: `/model/{model_id}/converse-stream`
//! - Response body is read as SSE frames, one JSON chunk per frame, keyed by
//!   the event name (`contentBlockDelta`, `messageStop`, `metadata`, ...)
//! - A non-empty body without a single SSE data frame is a parse error

use crate::backend::{ConverseBackend, EventStream};
use crate::error::Error;
use crate::sse::SseParser;
use crate::types::{ConverseStreamInput, StreamEvent};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::env;
use std::time::Duration;

const DEFAULT_REGION: &str = "us-east-1";

/// Backend configuration.
#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    /// Runtime endpoint, e.g. `https://bedrock-runtime.us-east-1.amazonaws.com`.
    pub base_url: String,
    /// Bedrock API key, sent as a bearer token.
    pub api_key: Option<String>,
    /// Request timeout, covering the whole streamed body.
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: runtime_endpoint(DEFAULT_REGION),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

fn runtime_endpoint(region: &str) -> String {
    format!("https://bedrock-runtime.{region}.amazonaws.com")
}

/// Builder for [`HttpBackend`].
pub struct HttpBackendBuilder {
    region: String,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
    http_builder: reqwest::ClientBuilder,
}

impl HttpBackendBuilder {
    pub fn new() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            base_url: None,
            api_key: None,
            timeout: HttpBackendConfig::default().timeout,
            http_builder: reqwest::Client::builder()
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_nodelay(true),
        }
    }

    /// Set the AWS region used to derive the runtime endpoint.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set a custom base URL (gateways, mock servers). Overrides the region.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the bearer API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load region and API key from environment variables.
    pub fn from_env(mut self) -> Self {
        if let Ok(region) = env::var("AWS_REGION").or_else(|_| env::var("AWS_DEFAULT_REGION")) {
            self.region = region;
        }
        if let Ok(key) = env::var("AWS_BEARER_TOKEN_BEDROCK") {
            self.api_key = Some(key);
        }
        self
    }

    /// Build the backend.
    pub fn build(self) -> Result<HttpBackend, Error> {
        let http = self
            .http_builder
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| runtime_endpoint(&self.region));
        Url::parse(&base_url).map_err(|e| Error::Config(format!("invalid base url: {e}")))?;

        Ok(HttpBackend {
            http,
            config: HttpBackendConfig {
                base_url,
                api_key: self.api_key,
                timeout: self.timeout,
            },
        })
    }
}

impl Default for HttpBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Bedrock runtime client speaking JSON-over-SSE.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    /// Create a backend from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        HttpBackendBuilder::new().from_env().build()
    }

    pub fn builder() -> HttpBackendBuilder {
        HttpBackendBuilder::new()
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    /// Full URL of the streaming endpoint for a model.
    pub fn stream_url(&self, model_id: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| Error::Config(format!("invalid base url: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(Error::Config("base url cannot hold a path".to_string()));
        }
        // Model ids and ARNs carry ':' and '/', both encoded.
        let path = format!(
            "{}/model/{}/converse-stream",
            url.path().trim_end_matches('/'),
            urlencoding::encode(model_id)
        );
        url.set_path(&path);
        Ok(url)
    }

    fn api_key(&self) -> Result<&str, Error> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::MissingApiKey("bedrock".to_string()))
    }
}

#[async_trait]
impl ConverseBackend for HttpBackend {
    async fn converse_stream(&self, input: ConverseStreamInput) -> Result<EventStream, Error> {
        let api_key = self.api_key()?;
        let url = self.stream_url(&input.model_id)?;
        tracing::debug!(%url, "opening converse stream");

        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&input)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(handle_error_response(response).await);
        }

        Ok(decode_body(response.bytes_stream().boxed()))
    }
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Http(e)
    }
}

/// Convert error response to Error type.
async fn handle_error_response(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();

    let body = resp.text().await.unwrap_or_default();

    match status {
        401 | 403 => Error::Unauthorized,
        429 => Error::RateLimited {
            retry_after: parse_retry_after(&headers),
        },
        500..=599 => Error::Server(status),
        _ => {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v["message"]
                        .as_str()
                        .or_else(|| v["error"]["message"].as_str())
                        .map(ToString::to_string)
                })
                .unwrap_or(body);
            Error::api(status, message)
        }
    }
}

/// Parse Retry-After header given in seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn a raw response body into stream events.
fn decode_body(body: BoxStream<'static, Result<Bytes, reqwest::Error>>) -> EventStream {
    let decoder = BodyDecoder {
        body,
        parser: SseParser::new(),
        frames: 0,
        saw_content: false,
        body_done: false,
        failed: false,
    };
    futures::stream::unfold(decoder, |mut decoder| async move {
        let item = decoder.next_event().await?;
        Some((item, decoder))
    })
    .boxed()
}

struct BodyDecoder {
    body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    parser: SseParser,
    /// SSE frames carrying data, decodable or not.
    frames: usize,
    /// Any non-whitespace byte arrived.
    saw_content: bool,
    body_done: bool,
    failed: bool,
}

impl BodyDecoder {
    async fn next_event(&mut self) -> Option<Result<StreamEvent, Error>> {
        if self.failed {
            return None;
        }

        loop {
            while let Some(frame) = self.parser.next_event() {
                self.frames += 1;
                match decode_event(frame.event.as_deref(), &frame.data) {
                    Ok(Some(event)) => return Some(Ok(event)),
                    Ok(None) => {}
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
            }

            if self.body_done {
                if self.frames == 0 && self.saw_content {
                    // e.g. binary event-stream or line-delimited JSON
                    self.failed = true;
                    return Some(Err(Error::parse(
                        "response body ended without any SSE data frame",
                    )));
                }
                return None;
            }

            match self.body.next().await {
                Some(Ok(bytes)) => {
                    self.saw_content |= bytes.iter().any(|b| !b.is_ascii_whitespace());
                    self.parser.feed(&bytes);
                }
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(map_transport_error(e)));
                }
                None => {
                    self.body_done = true;
                    self.parser.finish();
                }
            }
        }
    }
}

/// Decode one SSE frame into a stream event.
///
/// Frames with an `event:` name carry the bare payload and are wrapped under
/// that name. Chunks that carry nothing the relay needs decode to `None`.
pub fn decode_event(name: Option<&str>, data: &str) -> Result<Option<StreamEvent>, Error> {
    let data = data.trim();
    if data.is_empty() || SseParser::is_done(data) {
        return Ok(None);
    }

    let mut value: Value = serde_json::from_str(data).map_err(|e| Error::parse(e.to_string()))?;
    if let Some(name) = name {
        if !value.get(name).is_some_and(Value::is_object) {
            let mut wrapped = Map::new();
            wrapped.insert(name.to_string(), value);
            value = Value::Object(wrapped);
        }
    }

    let chunk: WireChunk = serde_json::from_value(value).map_err(|e| Error::parse(e.to_string()))?;

    if let Some((kind, body)) = chunk.other.iter().find(|(k, _)| k.ends_with("Exception")) {
        let message = body["message"]
            .as_str()
            .map_or_else(|| body.to_string(), ToString::to_string);
        return Err(Error::stream(kind.as_str(), message));
    }

    if let Some(text) = chunk
        .content_block_delta
        .and_then(|d| d.delta)
        .and_then(|d| d.text)
    {
        return Ok(Some(StreamEvent::ContentDelta { text }));
    }

    if let Some(stop) = chunk.message_stop {
        return Ok(Some(StreamEvent::MessageStop {
            stop_reason: stop.stop_reason,
        }));
    }

    if let Some(meta) = chunk.metadata {
        return Ok(Some(StreamEvent::Metadata {
            input_tokens: meta.usage.input_tokens,
            output_tokens: meta.usage.output_tokens,
        }));
    }

    Ok(None)
}

// --- Serde types for the wire chunks ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChunk {
    #[serde(default)]
    content_block_delta: Option<WireContentBlockDelta>,
    #[serde(default)]
    message_stop: Option<WireMessageStop>,
    #[serde(default)]
    metadata: Option<WireMetadata>,
    /// `messageStart`, `contentBlockStart`, `contentBlockStop` and exceptions.
    #[serde(flatten)]
    other: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct WireContentBlockDelta {
    #[serde(default)]
    delta: Option<WireDelta>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessageStop {
    stop_reason: String,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}
