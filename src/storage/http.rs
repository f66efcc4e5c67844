//! Path-style S3 over HTTP.
//!
//! Requests go to `{endpoint}/{bucket}/{key}`, are signed per attempt
//! by the connection's [`RequestSigner`], and are retried with
//! exponential backoff on connect/timeout failures, 429 and 5xx.  No
//! other layer retries.
//!
//! Custom metadata travels as `x-amz-meta-*` headers with lower-cased
//! keys.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use http::{HeaderMap, Method};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::backend::{
    ApiFuture, BucketSummary, CompletedPart, CopyObjectRequest, CreateBucketRequest,
    CreateMultipartRequest, HeadObjectOutput, ListObjectsPage, ListObjectsRequest, Metadata,
    MetadataDirective, ObjectApi, ObjectReader, PutObjectRequest,
};
use super::connection::Connection;
use crate::auth::{s3_uri_encode, RequestSigner, SignableRequest};
use crate::config::TransferConfig;
use crate::errors::{Error, ProviderError, Result};
use crate::rest::{ErrorResponse, Opts, RestClient};
use crate::{metrics, xml};

const META_PREFIX: &str = "x-amz-meta-";

/// Backoff schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per request, first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` attempts with the default delays.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Delay before retry number `attempt` (1-based), with 10-30% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jitter = capped * (0.1 + rand::random::<f64>() * 0.2);
        Duration::from_millis((capped + jitter) as u64)
    }
}

/// [`ObjectApi`] over HTTP.
pub struct HttpObjectApi {
    rest: RestClient,
    endpoint: String,
    /// `host[:port]` as sent on the wire.
    host: String,
    /// Path component of the endpoint, no trailing slash.
    base_path: String,
    signer: RequestSigner,
    retry: RetryPolicy,
}

impl HttpObjectApi {
    /// Build the transport for a resolved connection.
    pub fn new(connection: Connection, transfer: &TransferConfig) -> Result<Self> {
        let url = Url::parse(&connection.endpoint)
            .map_err(|e| Error::Connection(format!("invalid endpoint: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::Connection(format!(
                    "endpoint {} has no host",
                    connection.endpoint
                )))
            }
        };
        let base_path = url.path().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(transfer.timeout_seconds))
            .build()
            .map_err(|e| Error::Connection(format!("HTTP client: {e}")))?;
        let mut rest = RestClient::new(client);
        rest.set_root(connection.endpoint.clone());
        rest.set_error_handler(Arc::new(decode_s3_error));

        Ok(Self {
            rest,
            endpoint: connection.endpoint,
            host,
            base_path,
            signer: connection.signer,
            retry: RetryPolicy::new(transfer.max_retries),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The resolved endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn bucket_path(bucket: &str) -> String {
        format!("/{}", s3_uri_encode(bucket, true))
    }

    fn object_path(bucket: &str, key: &str) -> String {
        format!("/{}/{}", s3_uri_encode(bucket, true), s3_uri_encode(key, false))
    }

    /// Copy `opts` with signing headers added for this attempt.
    fn signed(&self, opts: &Opts) -> Opts {
        let mut headers = vec![("host".to_string(), self.host.clone())];
        if let Some(content_type) = &opts.content_type {
            headers.push(("content-type".to_string(), content_type.clone()));
        }
        for (name, value) in &opts.extra_headers {
            headers.push((name.to_ascii_lowercase(), value.clone()));
        }
        let path = format!("{}{}", self.base_path, opts.path);
        self.signer.sign(
            SignableRequest {
                method: opts.method.as_str(),
                path: &path,
                query: &opts.parameters,
                headers: &mut headers,
                payload: opts.body.as_deref().unwrap_or_default(),
            },
            Utc::now(),
        );

        let mut signed = opts.clone();
        signed.extra_headers = headers
            .into_iter()
            .filter(|(name, _)| name != "host" && name != "content-type")
            .collect();
        signed
    }

    /// Send with per-attempt signing and bounded retry.
    async fn send(&self, operation: &'static str, opts: Opts) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("S3 {}: {} {}", operation, opts.method, opts.path);
            match self.rest.call(&self.signed(&opts)).await {
                Ok(response) => {
                    metrics::record_request(operation, response.status().as_u16());
                    return Ok(response);
                }
                Err(err) => {
                    let status = match &err {
                        Error::Provider(p) => p.status.as_u16(),
                        _ => 0,
                    };
                    metrics::record_request(operation, status);
                    if !err.is_retryable() || attempt >= self.retry.max_attempts {
                        return Err(err);
                    }
                    let delay = self.retry.delay(attempt);
                    debug!(
                        "S3 {} failed: {}. Retry {}/{} after {:?}",
                        operation, err, attempt, self.retry.max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Read a 2xx body, failing if it is actually an `<Error>` document.
    async fn checked_body(response: reqwest::Response) -> Result<Bytes> {
        let status = response.status();
        let body = response.bytes().await?;
        if let Some(parsed) = xml::parse_error(&body) {
            return Err(Error::Provider(ProviderError::new(
                status,
                parsed.code,
                parsed.message,
                String::from_utf8_lossy(&body).into_owned(),
            )));
        }
        Ok(body)
    }
}

/// Error handler decoding S3 `<Error>` bodies.
fn decode_s3_error(resp: ErrorResponse) -> Error {
    let body = String::from_utf8_lossy(&resp.body).into_owned();
    let parsed = xml::parse_error(&resp.body).unwrap_or_default();
    Error::Provider(ProviderError::new(resp.status, parsed.code, parsed.message, body))
}

fn metadata_headers(metadata: &Metadata) -> Vec<(String, String)> {
    metadata
        .iter()
        .map(|(k, v)| (format!("{META_PREFIX}{}", k.to_ascii_lowercase()), v.clone()))
        .collect()
}

fn acl_header(acl: &Option<String>) -> Option<(String, String)> {
    acl.as_ref()
        .filter(|a| !a.is_empty())
        .map(|a| ("x-amz-acl".to_string(), a.clone()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Pull the HeadObject fields out of response headers.
fn head_output(headers: &HeaderMap) -> HeadObjectOutput {
    let metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            Some((key.to_ascii_lowercase(), value.to_str().ok()?.to_string()))
        })
        .collect();
    HeadObjectOutput {
        content_length: header_str(headers, "content-length").and_then(|v| v.parse().ok()),
        last_modified: header_str(headers, "last-modified")
            .and_then(|v| httpdate::parse_http_date(v).ok())
            .map(DateTime::<Utc>::from),
        etag: header_str(headers, "etag").map(str::to_string),
        content_type: header_str(headers, "content-type").map(str::to_string),
        metadata,
    }
}

impl ObjectApi for HttpObjectApi {
    fn list_buckets(&self) -> ApiFuture<'_, Vec<BucketSummary>> {
        Box::pin(async move {
            let response = self.send("list_buckets", Opts::new(Method::GET, "/")).await?;
            let body = response.bytes().await?;
            xml::parse_list_buckets(&body)
        })
    }

    fn list_objects(&self, req: ListObjectsRequest) -> ApiFuture<'_, ListObjectsPage> {
        Box::pin(async move {
            let mut opts = Opts::new(Method::GET, Self::bucket_path(&req.bucket));
            opts.parameters.push(("max-keys".to_string(), req.max_keys.to_string()));
            if !req.prefix.is_empty() {
                opts.parameters.push(("prefix".to_string(), req.prefix.clone()));
            }
            if let Some(delimiter) = &req.delimiter {
                opts.parameters.push(("delimiter".to_string(), delimiter.clone()));
            }
            if let Some(marker) = &req.marker {
                opts.parameters.push(("marker".to_string(), marker.clone()));
            }
            let response = self.send("list_objects", opts).await?;
            let body = response.bytes().await?;
            xml::parse_list_objects(&body)
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> ApiFuture<'_, HeadObjectOutput> {
        let path = Self::object_path(bucket, key);
        Box::pin(async move {
            let response = self.send("head_object", Opts::new(Method::HEAD, path)).await?;
            Ok(head_output(response.headers()))
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> ApiFuture<'_, ObjectReader> {
        let path = Self::object_path(bucket, key);
        Box::pin(async move {
            let response = self.send("get_object", Opts::new(Method::GET, path)).await?;
            let stream = response.bytes_stream().map_err(std::io::Error::other);
            let reader: ObjectReader = Box::pin(StreamReader::new(stream));
            Ok(reader)
        })
    }

    fn put_object(&self, req: PutObjectRequest) -> ApiFuture<'_, Option<String>> {
        Box::pin(async move {
            let size = req.body.len() as u64;
            let mut opts = Opts::new(Method::PUT, Self::object_path(&req.bucket, &req.key));
            opts.content_type = Some(req.content_type.clone());
            opts.content_length = Some(size);
            opts.extra_headers = metadata_headers(&req.metadata);
            opts.extra_headers.extend(acl_header(&req.acl));
            opts.body = Some(req.body);
            let response = self.send("put_object", opts).await?;
            Ok(header_str(response.headers(), "etag").map(str::to_string))
        })
    }

    fn create_multipart_upload(&self, req: CreateMultipartRequest) -> ApiFuture<'_, String> {
        Box::pin(async move {
            let mut opts = Opts::new(Method::POST, Self::object_path(&req.bucket, &req.key));
            opts.parameters.push(("uploads".to_string(), String::new()));
            opts.content_type = Some(req.content_type.clone());
            opts.extra_headers = metadata_headers(&req.metadata);
            opts.extra_headers.extend(acl_header(&req.acl));
            let response = self.send("create_multipart_upload", opts).await?;
            let body = response.bytes().await?;
            xml::parse_upload_id(&body)
        })
    }

    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> ApiFuture<'_, String> {
        let path = Self::object_path(bucket, key);
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let size = body.len() as u64;
            let mut opts = Opts::new(Method::PUT, path);
            opts.parameters = vec![
                ("partNumber".to_string(), part_number.to_string()),
                ("uploadId".to_string(), upload_id),
            ];
            opts.content_length = Some(size);
            opts.body = Some(body);
            let response = self.send("upload_part", opts).await?;
            header_str(response.headers(), "etag")
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::MalformedResponse(format!("part {part_number} returned no ETag"))
                })
        })
    }

    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> ApiFuture<'_, ()> {
        let path = Self::object_path(bucket, key);
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let body = xml::render_complete_multipart_upload(&parts);
            let mut opts = Opts::new(Method::POST, path);
            opts.parameters.push(("uploadId".to_string(), upload_id));
            opts.content_type = Some("application/xml".to_string());
            opts.content_length = Some(body.len() as u64);
            opts.body = Some(Bytes::from(body));
            let response = self.send("complete_multipart_upload", opts).await?;
            Self::checked_body(response).await?;
            Ok(())
        })
    }

    fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> ApiFuture<'_, ()> {
        let path = Self::object_path(bucket, key);
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut opts = Opts::new(Method::DELETE, path);
            opts.parameters.push(("uploadId".to_string(), upload_id));
            self.send("abort_multipart_upload", opts).await?;
            Ok(())
        })
    }

    fn copy_object(&self, req: CopyObjectRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let mut opts = Opts::new(Method::PUT, Self::object_path(&req.bucket, &req.key));
            opts.extra_headers.push((
                "x-amz-copy-source".to_string(),
                Self::object_path(&req.source_bucket, &req.source_key),
            ));
            opts.extra_headers.push((
                "x-amz-metadata-directive".to_string(),
                req.directive.as_str().to_string(),
            ));
            if req.directive == MetadataDirective::Replace {
                opts.content_type = req.content_type.clone();
                opts.extra_headers.extend(metadata_headers(&req.metadata));
            }
            opts.extra_headers.extend(acl_header(&req.acl));
            let response = self.send("copy_object", opts).await?;
            Self::checked_body(response).await?;
            Ok(())
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> ApiFuture<'_, ()> {
        let path = Self::object_path(bucket, key);
        Box::pin(async move {
            self.send("delete_object", Opts::new(Method::DELETE, path)).await?;
            Ok(())
        })
    }

    fn create_bucket(&self, req: CreateBucketRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let mut opts = Opts::new(Method::PUT, Self::bucket_path(&req.bucket));
            opts.extra_headers.extend(acl_header(&req.acl));
            if let Some(location) = req.location_constraint.as_ref().filter(|l| !l.is_empty()) {
                let body = xml::render_create_bucket_configuration(location);
                opts.content_type = Some("application/xml".to_string());
                opts.content_length = Some(body.len() as u64);
                opts.body = Some(Bytes::from(body));
            }
            self.send("create_bucket", opts).await?;
            Ok(())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> ApiFuture<'_, ()> {
        let path = Self::bucket_path(bucket);
        Box::pin(async move {
            self.send("delete_bucket", Opts::new(Method::DELETE, path)).await?;
            Ok(())
        })
    }
}
