//! Adapter error types.
//!
//! Every fallible operation in the crate returns [`Result`].  Provider
//! failures are captured once, at the HTTP boundary, as a
//! [`ProviderError`] whose [`ErrorKind`] callers match on instead of
//! inspecting provider code strings.

use http::StatusCode;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classification of a provider error, computed when the error is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `BucketAlreadyOwnedByYou`: a create of a bucket the caller owns.
    BucketAlreadyOwnedByYou,
    /// `NoSuchBucket`.
    NoSuchBucket,
    /// `NoSuchKey`.
    NoSuchKey,
    /// 404 with no provider code (HEAD responses carry no body).
    NotFound,
    /// `BucketNotEmpty`.
    BucketNotEmpty,
    /// `AccessDenied` or a bare 403.
    AccessDenied,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Classify from the provider code, falling back to the HTTP status.
    pub fn classify(code: Option<&str>, status: StatusCode) -> Self {
        match code {
            Some("BucketAlreadyOwnedByYou") => ErrorKind::BucketAlreadyOwnedByYou,
            Some("NoSuchBucket") => ErrorKind::NoSuchBucket,
            Some("NoSuchKey") => ErrorKind::NoSuchKey,
            Some("BucketNotEmpty") => ErrorKind::BucketNotEmpty,
            Some("AccessDenied") => ErrorKind::AccessDenied,
            Some("NotFound") => ErrorKind::NotFound,
            Some(_) => ErrorKind::Other,
            None => match status {
                StatusCode::NOT_FOUND => ErrorKind::NotFound,
                StatusCode::FORBIDDEN => ErrorKind::AccessDenied,
                _ => ErrorKind::Other,
            },
        }
    }

    /// True for the kinds that mean "this key or bucket is absent".
    pub fn is_not_found(self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound | ErrorKind::NoSuchKey | ErrorKind::NoSuchBucket
        )
    }
}

/// A non-2xx answer from the provider, kept whole for diagnostics.
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// Classification used by the adapter.
    pub kind: ErrorKind,
    /// HTTP status code.
    pub status: StatusCode,
    /// Provider error code (`<Code>`), when the body carried one.
    pub code: Option<String>,
    /// Provider message (`<Message>`), when the body carried one.
    pub message: Option<String>,
    /// Raw response body.
    pub body: String,
}

impl ProviderError {
    /// Build a provider error, classifying it.
    pub fn new(
        status: StatusCode,
        code: Option<String>,
        message: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        let kind = ErrorKind::classify(code.as_deref(), status);
        Self {
            kind,
            status,
            code,
            message,
            body: body.into(),
        }
    }

    /// Canonical reason phrase for the status code.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Unknown")
    }

    /// Whether the request layer should retry this response.
    pub fn is_retryable(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS || self.status.is_server_error()
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP error {} ({})", self.status.as_u16(), self.status_text())?;
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, ": {code}: {message}"),
            (Some(code), None) => write!(f, ": {code}"),
            _ if !self.body.is_empty() => write!(f, " returned body: {:?}", self.body),
            _ => Ok(()),
        }
    }
}

/// Adapter errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote address could not be split into bucket and prefix.
    #[error("couldn't parse bucket out of remote path {0:?}")]
    Parse(String),

    /// Exactly one of the two credential fields was supplied.
    #[error("{0}")]
    Auth(String),

    /// The provider connection could not be set up.
    #[error("connection setup failed: {0}")]
    Connection(String),

    /// The probed key does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Server-side copy from a source that is not an object of this backend.
    #[error("can't copy - not same remote type")]
    CantCopy,

    /// An object operation was attempted at the top level (no bucket).
    #[error("no bucket selected - choose a bucket first")]
    NoBucket,

    /// Operation not available on this remote.
    #[error("{0}")]
    Unsupported(String),

    /// A remote is missing from the configuration or names an unknown backend.
    #[error("configuration error: {0}")]
    Config(String),

    /// A request could not be assembled (bad URL, header name or value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider answered with an error.
    #[error("{0}")]
    Provider(ProviderError),

    /// The provider answered 2xx with a body we could not understand.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// Transport-level failure (connect, timeout, body read).
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Local I/O failure (reading upload input, etc).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure in the request helper.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Provider classification, if this is a provider error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Provider(p) => Some(p.kind),
            _ => None,
        }
    }

    /// True for a missing key or bucket, whichever layer detected it.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Provider(p) => p.kind.is_not_found(),
            _ => false,
        }
    }

    /// Whether the request layer should retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider(p) => p.is_retryable(),
            Error::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        Error::Provider(err)
    }
}
