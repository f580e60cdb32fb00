use crate::model::{Secs, ServiceId, Span};
use crate::transport::{TransformError, TransportError};

#[derive(Debug)]
pub enum EngineError {
    /// The remote fetch failed; the range stays uncovered.
    Transport {
        service: ServiceId,
        span: Span,
        source: TransportError,
    },
    /// An item of an otherwise successful fetch could not be normalized.
    Transform {
        service: ServiceId,
        span: Span,
        source: TransformError,
    },
    UnknownStage(String),
    DuplicateStage(String),
    InvalidThreshold(Secs),
    InvalidTimezone(String),
    InvalidRange { start: i64, end: i64 },
    NoActiveService,
    /// A session of another service was handed to the active one.
    ServiceMismatch { active: ServiceId, session: ServiceId },
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Transport { service, span, source } => write!(
                f,
                "fetch of [{}, {}) for service {service} failed: {source}",
                span.start, span.end
            ),
            EngineError::Transform { service, span, source } => write!(
                f,
                "malformed session in [{}, {}) for service {service}: {source}",
                span.start, span.end
            ),
            EngineError::UnknownStage(id) => write!(f, "unknown filter stage: {id}"),
            EngineError::DuplicateStage(id) => write!(f, "duplicate filter stage: {id}"),
            EngineError::InvalidThreshold(secs) => {
                write!(f, "daily threshold must be positive, got {secs}s")
            }
            EngineError::InvalidTimezone(name) => write!(f, "unknown timezone: {name}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range [{start}, {end})")
            }
            EngineError::NoActiveService => write!(f, "no service selected"),
            EngineError::ServiceMismatch { active, session } => {
                write!(f, "session belongs to service {session}, active service is {active}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Transport { source, .. } => Some(source),
            EngineError::Transform { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl EngineError {
    /// Failures of the remote side, as opposed to caller misuse.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, EngineError::Transport { .. } | EngineError::Transform { .. })
    }
}
