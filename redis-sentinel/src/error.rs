//! Sentinel connection errors.
use displaydoc::Display;
use thiserror::Error;

/// Kind of failure reported by a Redis or Sentinel node.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    Backpressure,
    Canceled,
    Cluster,
    Configuration,
    InvalidArgument,
    InvalidCommand,
    InvalidResponse,
    IO,
    Parse,
    Replica,
    Routing,
    Sentinel,
    Tls,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication => "auth",
            Self::Backpressure => "backpressure",
            Self::Canceled => "canceled",
            Self::Cluster => "cluster",
            Self::Configuration => "config",
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidCommand => "invalid_command",
            Self::InvalidResponse => "invalid_response",
            Self::IO => "io",
            Self::Parse => "parse",
            Self::Replica => "replica",
            Self::Routing => "routing",
            Self::Sentinel => "sentinel",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

/// An error reported by the underlying client for one node.
///
/// `Display` is the raw message so that retry classification sees exactly
/// what the server or the socket layer reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RedisError {
    kind: ErrorKind,
    message: String,
}

impl RedisError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<fred::error::Error> for RedisError {
    fn from(error: fred::error::Error) -> Self {
        use fred::error::ErrorKind as FredKind;
        let details = error.details().to_string();

        let kind = match error.kind() {
            FredKind::Config | FredKind::Url => ErrorKind::Configuration,
            FredKind::Auth => ErrorKind::Authentication,
            FredKind::Routing => ErrorKind::Routing,
            FredKind::IO => ErrorKind::IO,
            FredKind::InvalidCommand => ErrorKind::InvalidCommand,
            FredKind::InvalidArgument => ErrorKind::InvalidArgument,
            FredKind::Protocol => ErrorKind::InvalidResponse,
            FredKind::Canceled => ErrorKind::Canceled,
            FredKind::Timeout => ErrorKind::Timeout,
            FredKind::Unknown if details == "timeout" => ErrorKind::Timeout,
            FredKind::Cluster => ErrorKind::Cluster,
            FredKind::Parse => ErrorKind::Parse,
            FredKind::Sentinel => ErrorKind::Sentinel,
            FredKind::Backpressure => ErrorKind::Backpressure,
            _ => ErrorKind::Unknown,
        };

        Self::new(kind, details)
    }
}

/// Errors returned by sentinel-aware connections.
///
/// Retryable node failures are never wrapped: once the retry budget is spent
/// the caller receives the [`RedisError`] of the last attempt unchanged.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum Error {
    /// {message}
    Configuration {
        /// What is wrong with the configuration.
        message: String,

        /// The last node error seen before giving up, if any.
        #[source]
        source: Option<RedisError>,
    },

    /// {0}
    NotImplemented(String),

    /// {0}
    Redis(#[from] RedisError),
}

impl Error {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// The node error behind this error, if it came from a node.
    pub fn redis(&self) -> Option<&RedisError> {
        match self {
            Self::Redis(error) => Some(error),
            Self::Configuration { source, .. } => source.as_ref(),
            Self::NotImplemented(_) => None,
        }
    }
}

impl From<fred::error::Error> for Error {
    fn from(error: fred::error::Error) -> Self {
        Self::Redis(error.into())
    }
}
