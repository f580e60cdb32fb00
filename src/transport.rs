use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::*;

// ── Wire shapes ──────────────────────────────────────────────────

/// Query parameters of a session fetch. Serializes to exactly
/// `{service, start, end}` with RFC 3339 timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionQuery {
    pub service: ServiceId,
    pub start: String,
    pub end: String,
}

impl SessionQuery {
    pub fn new(service: ServiceId, span: &Span) -> Option<Self> {
        Some(Self {
            service,
            start: iso8601(from_ms(span.start)?),
            end: iso8601(from_ms(span.end)?),
        })
    }
}

fn iso8601(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FetchResponse {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

// ── Transport ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum TransportError {
    Http(String),
    Status(u16),
    Decode(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Http(e) => write!(f, "http error: {e}"),
            TransportError::Status(code) => write!(f, "unexpected status {code}"),
            TransportError::Decode(e) => write!(f, "bad response body: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Whatever carries a session query to the remote API.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn fetch(&self, query: &SessionQuery) -> Result<FetchResponse, TransportError>;
}

/// reqwest-backed transport: sends the query as URL parameters.
pub struct HttpTransport {
    client: reqwest::Client,
    method: reqwest::Method,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, method: reqwest::Method) -> Self {
        Self {
            client: reqwest::Client::new(),
            method,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SessionTransport for HttpTransport {
    async fn fetch(&self, query: &SessionQuery) -> Result<FetchResponse, TransportError> {
        let response = self
            .client
            .request(self.method.clone(), &self.endpoint)
            .query(query)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        response
            .json::<FetchResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

// ── Transformer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError(pub String);

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransformError {}

/// Normalizes one raw API item into a `Session`.
pub trait SessionTransformer: Send + Sync {
    fn transform(&self, raw: &serde_json::Value) -> Result<Session, TransformError>;
}

#[derive(Debug, Deserialize)]
struct RawSession {
    service: ServiceId,
    resource: ResourceId,
    start: String,
    end: String,
    #[serde(default)]
    duration: Option<Secs>,
}

/// Reads `{service, resource, start, end, duration?}` items.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionReadTransformer;

impl SessionTransformer for SessionReadTransformer {
    fn transform(&self, raw: &serde_json::Value) -> Result<Session, TransformError> {
        let raw = RawSession::deserialize(raw).map_err(|e| TransformError(e.to_string()))?;
        let start = parse_instant(&raw.start)?;
        let end = parse_instant(&raw.end)?;
        if end <= start {
            return Err(TransformError(format!(
                "session ends before it starts: {} .. {}",
                raw.start, raw.end
            )));
        }
        let session = Session::new(raw.service, raw.resource, start, end);
        if let Some(duration) = raw.duration
            && duration != session.duration {
                return Err(TransformError(format!(
                    "duration {duration}s does not match {} .. {}",
                    raw.start, raw.end
                )));
            }
        Ok(session)
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, TransformError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TransformError(format!("bad timestamp {s:?}: {e}")))
}
