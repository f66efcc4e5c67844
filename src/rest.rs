//! Minimal HTTP request helper shared by provider transports.
//!
//! A [`RestClient`] holds a root URL, default headers and an error
//! decoder.  [`Opts`] describes one call; the path is either absolute or
//! joined onto the root.  Any non-2xx answer is handed to the error
//! handler, which turns it into a crate [`Error`].

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::auth::canonical_query_string;
use crate::errors::{Error, ProviderError, Result};

/// Product identifier sent in every User-Agent header.
pub const USER_AGENT: &str = concat!("s3remote/", env!("CARGO_PKG_VERSION"));

/// A non-2xx response, as seen by the error handler.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Decodes a non-2xx response into an error.
pub type ErrorHandler = Arc<dyn Fn(ErrorResponse) -> Error + Send + Sync>;

/// Options for one call.
#[derive(Debug, Clone, Default)]
pub struct Opts {
    pub method: Method,
    /// Path relative to the root URL, or a full URL when `absolute` is set.
    /// Must already be URI-encoded.
    pub path: String,
    pub absolute: bool,
    /// Decoded query parameters.
    pub parameters: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    /// Basic auth is applied when either of these is non-empty.
    pub user_name: String,
    pub password: String,
}

impl Opts {
    /// Options for `method` on `path` with everything else defaulted.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Default::default()
        }
    }
}

/// HTTP client with a root URL, default headers and a pluggable error decoder.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    root_url: Option<String>,
    headers: HeaderMap,
    error_handler: ErrorHandler,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("root_url", &self.root_url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    /// Wrap `client`. The User-Agent default header is set to [`USER_AGENT`].
    pub fn new(client: reqwest::Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        Self {
            client,
            root_url: None,
            headers,
            error_handler: Arc::new(default_error_handler),
        }
    }

    /// Set the URL relative paths are joined onto.
    pub fn set_root(&mut self, root_url: impl Into<String>) -> &mut Self {
        self.root_url = Some(root_url.into().trim_end_matches('/').to_string());
        self
    }

    /// The configured root URL.
    pub fn root(&self) -> Option<&str> {
        self.root_url.as_deref()
    }

    /// Add or replace a default header sent with every call.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Replace the error decoder.
    pub fn set_error_handler(&mut self, handler: ErrorHandler) -> &mut Self {
        self.error_handler = handler;
        self
    }

    /// Resolve the full URL for `opts`, query string included.
    pub fn url_for(&self, opts: &Opts) -> Result<String> {
        let mut url = if opts.absolute {
            opts.path.clone()
        } else {
            let root = self
                .root_url
                .as_deref()
                .ok_or_else(|| Error::InvalidRequest("root URL not set".to_string()))?;
            if opts.path.starts_with('/') || opts.path.is_empty() {
                format!("{root}{}", opts.path)
            } else {
                format!("{root}/{}", opts.path)
            }
        };
        if !opts.parameters.is_empty() {
            url.push('?');
            url.push_str(&canonical_query_string(&opts.parameters));
        }
        Ok(url)
    }

    /// Assemble the request without sending it.
    pub fn build(&self, opts: &Opts) -> Result<reqwest::RequestBuilder> {
        let url = self.url_for(opts)?;
        let mut headers = self.headers.clone();
        if let Some(content_type) = &opts.content_type {
            let (name, value) = parse_header("content-type", content_type)?;
            headers.insert(name, value);
        }
        if let Some(length) = opts.content_length {
            headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        if let Some(range) = &opts.content_range {
            let (name, value) = parse_header("content-range", range)?;
            headers.insert(name, value);
        }
        for (name, value) in &opts.extra_headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }

        let mut builder = self.client.request(opts.method.clone(), url).headers(headers);
        if !opts.user_name.is_empty() || !opts.password.is_empty() {
            builder = builder.basic_auth(&opts.user_name, Some(&opts.password));
        }
        if let Some(body) = &opts.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }

    /// Perform the call. Non-2xx answers go through the error handler.
    pub async fn call(&self, opts: &Opts) -> Result<reqwest::Response> {
        let request = self.build(opts)?;
        debug!("rest call: {} {}", opts.method, opts.path);
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let headers = response.headers().clone();
        let body = response.bytes().await.unwrap_or_default();
        Err((self.error_handler)(ErrorResponse {
            status,
            headers,
            body,
        }))
    }

    /// Call with an optional JSON request body and decode a JSON response.
    pub async fn call_json<Req, Resp>(&self, opts: &Opts, request: Option<&Req>) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut opts = opts.clone();
        if let Some(request) = request {
            let body = serde_json::to_vec(request)?;
            opts.content_type = Some("application/json".to_string());
            opts.content_length = Some(body.len() as u64);
            opts.body = Some(Bytes::from(body));
        }
        let response = self.call(&opts).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Wrap the status line and raw body into a provider error.
pub fn default_error_handler(resp: ErrorResponse) -> Error {
    let body = String::from_utf8_lossy(&resp.body).into_owned();
    Error::Provider(ProviderError::new(resp.status, None, None, body))
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::InvalidRequest(format!("header name {name:?}: {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| Error::InvalidRequest(format!("header {name} value: {e}")))?;
    Ok((header_name, header_value))
}
