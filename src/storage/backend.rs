//! Provider capability trait.
//!
//! Every provider transport must implement [`ObjectApi`].  The adapter
//! in [`crate::s3`] only ever talks to the store through this trait, so
//! the wire protocol, signing and retry live entirely behind it.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::errors::Result;

/// Boxed future returned by [`ObjectApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Streamed object body.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Custom object metadata, keys lower-cased without the `x-amz-meta-` prefix.
pub type Metadata = BTreeMap<String, String>;

/// One ListObjects (v1) request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: String,
    /// `Some("/")` asks for common-prefix grouping.
    pub delimiter: Option<String>,
    /// Resume after this key.
    pub marker: Option<String>,
    pub max_keys: u32,
}

/// One page of ListObjects results.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsPage {
    pub contents: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Only returned by providers when a delimiter was requested.
    pub next_marker: Option<String>,
}

/// A key as reported by a list page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    /// Quoted ETag as sent by the provider.
    pub etag: String,
}

/// A bucket as reported by ListBuckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketSummary {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
}

/// HeadObject answer.  Every field is optional because providers differ
/// in what they return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadObjectOutput {
    pub content_length: Option<i64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub metadata: Metadata,
}

/// Single-request upload.
#[derive(Debug, Clone, Default)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub acl: Option<String>,
    pub metadata: Metadata,
}

/// Start of a multipart upload; parts follow with [`ObjectApi::upload_part`].
#[derive(Debug, Clone, Default)]
pub struct CreateMultipartRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub acl: Option<String>,
    pub metadata: Metadata,
}

/// A finished part, as listed in the completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// What a copy does with the destination's custom metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataDirective {
    /// Inherit the source's metadata and content type.
    #[default]
    Copy,
    /// Replace them with the ones carried by the request.
    Replace,
}

impl MetadataDirective {
    /// Header value for `x-amz-metadata-directive`.
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataDirective::Copy => "COPY",
            MetadataDirective::Replace => "REPLACE",
        }
    }
}

/// Server-side copy.
#[derive(Debug, Clone, Default)]
pub struct CopyObjectRequest {
    pub bucket: String,
    pub key: String,
    pub source_bucket: String,
    pub source_key: String,
    pub directive: MetadataDirective,
    /// Only sent with [`MetadataDirective::Replace`].
    pub content_type: Option<String>,
    pub acl: Option<String>,
    /// Only sent with [`MetadataDirective::Replace`].
    pub metadata: Metadata,
}

/// Bucket creation.
#[derive(Debug, Clone, Default)]
pub struct CreateBucketRequest {
    pub bucket: String,
    pub acl: Option<String>,
    pub location_constraint: Option<String>,
}

/// Async S3-style object store contract.
pub trait ObjectApi: Send + Sync + 'static {
    /// List every bucket owned by the caller.
    fn list_buckets(&self) -> ApiFuture<'_, Vec<BucketSummary>>;

    /// Fetch one page of keys.
    fn list_objects(&self, req: ListObjectsRequest) -> ApiFuture<'_, ListObjectsPage>;

    /// Metadata-only request for `bucket/key`.
    fn head_object(&self, bucket: &str, key: &str) -> ApiFuture<'_, HeadObjectOutput>;

    /// Open a streamed read of the whole object.
    fn get_object(&self, bucket: &str, key: &str) -> ApiFuture<'_, ObjectReader>;

    /// Store an object in one request, returning its ETag when reported.
    fn put_object(&self, req: PutObjectRequest) -> ApiFuture<'_, Option<String>>;

    /// Start a multipart upload, returning the upload ID.
    fn create_multipart_upload(&self, req: CreateMultipartRequest) -> ApiFuture<'_, String>;

    /// Upload one part, returning its ETag.
    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> ApiFuture<'_, String>;

    /// Assemble the listed parts into the final object.
    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> ApiFuture<'_, ()>;

    /// Discard an in-progress upload and any parts it holds.
    fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
        -> ApiFuture<'_, ()>;

    /// Server-side copy.
    fn copy_object(&self, req: CopyObjectRequest) -> ApiFuture<'_, ()>;

    /// Delete `bucket/key`.
    fn delete_object(&self, bucket: &str, key: &str) -> ApiFuture<'_, ()>;

    /// Create a bucket.
    fn create_bucket(&self, req: CreateBucketRequest) -> ApiFuture<'_, ()>;

    /// Delete an empty bucket.
    fn delete_bucket(&self, bucket: &str) -> ApiFuture<'_, ()>;
}
