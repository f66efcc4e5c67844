//! In-memory object store.
//!
//! Buckets and objects are held in a `tokio::sync::RwLock`-protected map
//! and answer with the same codes and listing semantics an S3 provider
//! would (v1 listing, `NextMarker` only with a delimiter, quoted MD5
//! ETags, composite multipart ETags).  Every call is journaled so tests
//! can assert on the exact request sequence, and a few faults can be
//! injected.
//!
//! The `memory` backend type opens stores through [`shared`], so every
//! remote of that name in one process sees the same contents.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::StatusCode;
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use super::backend::{
    ApiFuture, BucketSummary, CompletedPart, CopyObjectRequest, CreateBucketRequest,
    CreateMultipartRequest, HeadObjectOutput, ListObjectsPage, ListObjectsRequest, Metadata,
    MetadataDirective, ObjectApi, ObjectReader, ObjectSummary, PutObjectRequest,
};
use crate::errors::{Error, ProviderError};

/// Page size used when a request asks for zero keys.
const DEFAULT_MAX_KEYS: u32 = 1000;

/// One journaled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    ListBuckets,
    ListObjects(ListObjectsRequest),
    HeadObject {
        bucket: String,
        key: String,
    },
    GetObject {
        bucket: String,
        key: String,
    },
    PutObject {
        bucket: String,
        key: String,
        size: usize,
        content_type: String,
        metadata: Metadata,
    },
    CreateMultipartUpload {
        bucket: String,
        key: String,
        metadata: Metadata,
    },
    UploadPart {
        upload_id: String,
        part_number: i32,
        size: usize,
    },
    CompleteMultipartUpload {
        upload_id: String,
        parts: usize,
    },
    AbortMultipartUpload {
        upload_id: String,
    },
    CopyObject {
        bucket: String,
        key: String,
        source_bucket: String,
        source_key: String,
        directive: MetadataDirective,
        content_type: Option<String>,
        metadata: Metadata,
    },
    DeleteObject {
        bucket: String,
        key: String,
    },
    CreateBucket {
        bucket: String,
        location_constraint: Option<String>,
    },
    DeleteBucket {
        bucket: String,
    },
}

/// A stored object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub content_type: String,
    pub metadata: Metadata,
}

#[derive(Debug)]
struct Upload {
    bucket: String,
    key: String,
    content_type: String,
    metadata: Metadata,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    uploads: HashMap<String, Upload>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Fail every list page after this many have been served.
    list_pages_before_failure: Option<usize>,
    list_pages_served: usize,
    /// Fail uploads of this part number.
    fail_part: Option<i32>,
    /// Leave Content-Length and Last-Modified out of HEAD answers.
    sparse_head: bool,
}

/// Stores handed out by [`shared`], keyed by remote name.
static SHARED: OnceLock<Mutex<HashMap<String, Arc<MemoryObjectApi>>>> = OnceLock::new();

/// The process-wide store for remote `name`, created empty on first use.
pub fn shared(name: &str) -> Arc<MemoryObjectApi> {
    let mut stores = SHARED
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    stores
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(MemoryObjectApi::new()))
        .clone()
}

/// In-process [`ObjectApi`].
#[derive(Debug, Default)]
pub struct MemoryObjectApi {
    state: tokio::sync::RwLock<State>,
    calls: Mutex<Vec<ApiCall>>,
    faults: Mutex<Faults>,
}

impl MemoryObjectApi {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Test and inspection helpers ────────────────────────────────

    /// Store `data` at `bucket/key` directly, creating the bucket if needed.
    /// Not journaled.
    pub async fn insert(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        metadata: Metadata,
        last_modified: DateTime<Utc>,
    ) {
        let data = data.into();
        let object = StoredObject {
            etag: compute_etag(&data),
            data,
            last_modified,
            content_type: "application/octet-stream".to_string(),
            metadata,
        };
        let mut state = self.state.write().await;
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    /// Create an empty bucket directly. Not journaled.
    pub async fn insert_bucket(&self, bucket: &str) {
        self.state
            .write()
            .await
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    /// A copy of the stored object at `bucket/key`.
    pub async fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        let state = self.state.read().await;
        state.buckets.get(bucket)?.get(key).cloned()
    }

    /// Whether `bucket` exists.
    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.state.read().await.buckets.contains_key(bucket)
    }

    /// Multipart uploads started and neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.state.read().await.uploads.len()
    }

    /// Journal of every call so far.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Forget the journal.
    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Serve `pages` list pages, then fail every further one with a 500.
    pub fn fail_list_after(&self, pages: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.list_pages_before_failure = Some(pages);
            faults.list_pages_served = 0;
        }
    }

    /// Fail every upload of part `part_number` with a 500.
    pub fn fail_upload_part(&self, part_number: i32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_part = Some(part_number);
        }
    }

    /// Leave Content-Length and Last-Modified out of HEAD answers.
    pub fn sparse_head(&self, sparse: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.sparse_head = sparse;
        }
    }

    fn record(&self, call: ApiCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn list_fault(&self) -> bool {
        let Ok(mut faults) = self.faults.lock() else {
            return false;
        };
        match faults.list_pages_before_failure {
            Some(limit) if faults.list_pages_served >= limit => true,
            _ => {
                faults.list_pages_served += 1;
                false
            }
        }
    }

    fn part_fault(&self, part_number: i32) -> bool {
        self.faults
            .lock()
            .map(|f| f.fail_part == Some(part_number))
            .unwrap_or(false)
    }

    fn head_is_sparse(&self) -> bool {
        self.faults.lock().map(|f| f.sparse_head).unwrap_or(false)
    }
}

// ── ETag helpers ────────────────────────────────────────────────────

/// Quoted MD5-hex ETag for a byte slice.
fn compute_etag(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Multipart ETag: MD5 of the concatenated binary part MD5s, plus `-{count}`.
fn composite_etag(parts: &[&Bytes]) -> String {
    let mut combined = Vec::with_capacity(parts.len() * 16);
    for part in parts {
        let bytes: &[u8] = part;
        combined.extend_from_slice(&Md5::digest(bytes));
    }
    format!("\"{}-{}\"", hex::encode(Md5::digest(&combined)), parts.len())
}

// ── Provider errors ─────────────────────────────────────────────────

fn provider_error(status: StatusCode, code: &str, message: &str) -> Error {
    Error::Provider(ProviderError::new(
        status,
        Some(code.to_string()),
        Some(message.to_string()),
        format!("<Error><Code>{code}</Code><Message>{message}</Message></Error>"),
    ))
}

fn no_such_bucket() -> Error {
    provider_error(
        StatusCode::NOT_FOUND,
        "NoSuchBucket",
        "The specified bucket does not exist",
    )
}

fn no_such_key() -> Error {
    provider_error(
        StatusCode::NOT_FOUND,
        "NoSuchKey",
        "The specified key does not exist.",
    )
}

fn no_such_upload() -> Error {
    provider_error(
        StatusCode::NOT_FOUND,
        "NoSuchUpload",
        "The specified upload does not exist.",
    )
}

fn internal_error() -> Error {
    provider_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "InternalError",
        "We encountered an internal error. Please try again.",
    )
}

// ── Listing ─────────────────────────────────────────────────────────

enum Item<'a> {
    Key(&'a str, &'a StoredObject),
    Prefix(String),
}

/// ListObjects (v1) over one bucket's sorted key map.
fn list_page(objects: &BTreeMap<String, StoredObject>, req: &ListObjectsRequest) -> ListObjectsPage {
    let max_keys = if req.max_keys == 0 {
        DEFAULT_MAX_KEYS
    } else {
        req.max_keys
    } as usize;
    let marker = req.marker.as_deref();
    let delimiter = req.delimiter.as_deref().filter(|d| !d.is_empty());

    let mut items: Vec<Item<'_>> = Vec::new();
    for (key, object) in objects {
        if !key.starts_with(&req.prefix) {
            continue;
        }
        if marker.is_some_and(|m| key.as_str() <= m) {
            continue;
        }
        let grouped = delimiter.and_then(|d| {
            let rest = &key[req.prefix.len()..];
            rest.find(d)
                .map(|idx| format!("{}{}", req.prefix, &rest[..idx + d.len()]))
        });
        match grouped {
            Some(prefix) => {
                // A marker naming a common prefix skips everything under it.
                if marker.is_some_and(|m| prefix.as_str() <= m) {
                    continue;
                }
                if matches!(items.last(), Some(Item::Prefix(last)) if *last == prefix) {
                    continue;
                }
                items.push(Item::Prefix(prefix));
            }
            None => items.push(Item::Key(key, object)),
        }
    }

    let is_truncated = items.len() > max_keys;
    items.truncate(max_keys);

    let mut page = ListObjectsPage {
        is_truncated,
        ..Default::default()
    };
    if is_truncated && delimiter.is_some() {
        page.next_marker = items.last().map(|item| match item {
            Item::Key(key, _) => key.to_string(),
            Item::Prefix(prefix) => prefix.clone(),
        });
    }
    for item in items {
        match item {
            Item::Key(key, object) => page.contents.push(ObjectSummary {
                key: key.to_string(),
                size: object.data.len() as i64,
                last_modified: Some(object.last_modified),
                etag: object.etag.clone(),
            }),
            Item::Prefix(prefix) => page.common_prefixes.push(prefix),
        }
    }
    page
}

impl ObjectApi for MemoryObjectApi {
    fn list_buckets(&self) -> ApiFuture<'_, Vec<BucketSummary>> {
        Box::pin(async move {
            self.record(ApiCall::ListBuckets);
            let state = self.state.read().await;
            Ok(state
                .buckets
                .keys()
                .map(|name| BucketSummary {
                    name: name.clone(),
                    creation_date: None,
                })
                .collect())
        })
    }

    fn list_objects(&self, req: ListObjectsRequest) -> ApiFuture<'_, ListObjectsPage> {
        Box::pin(async move {
            self.record(ApiCall::ListObjects(req.clone()));
            if self.list_fault() {
                return Err(internal_error());
            }
            let state = self.state.read().await;
            let objects = state.buckets.get(&req.bucket).ok_or_else(no_such_bucket)?;
            Ok(list_page(objects, &req))
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> ApiFuture<'_, HeadObjectOutput> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            self.record(ApiCall::HeadObject {
                bucket: bucket.clone(),
                key: key.clone(),
            });
            let state = self.state.read().await;
            // HEAD answers carry no body, so no provider code either.
            let object = state
                .buckets
                .get(&bucket)
                .and_then(|objects| objects.get(&key))
                .ok_or_else(|| {
                    Error::Provider(ProviderError::new(StatusCode::NOT_FOUND, None, None, ""))
                })?;
            let sparse = self.head_is_sparse();
            Ok(HeadObjectOutput {
                content_length: (!sparse).then_some(object.data.len() as i64),
                last_modified: (!sparse).then_some(object.last_modified),
                etag: Some(object.etag.clone()),
                content_type: Some(object.content_type.clone()),
                metadata: object.metadata.clone(),
            })
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> ApiFuture<'_, ObjectReader> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            self.record(ApiCall::GetObject {
                bucket: bucket.clone(),
                key: key.clone(),
            });
            let state = self.state.read().await;
            let objects = state.buckets.get(&bucket).ok_or_else(no_such_bucket)?;
            let object = objects.get(&key).ok_or_else(no_such_key)?;
            let reader: ObjectReader = Box::pin(std::io::Cursor::new(object.data.clone()));
            Ok(reader)
        })
    }

    fn put_object(&self, req: PutObjectRequest) -> ApiFuture<'_, Option<String>> {
        Box::pin(async move {
            self.record(ApiCall::PutObject {
                bucket: req.bucket.clone(),
                key: req.key.clone(),
                size: req.body.len(),
                content_type: req.content_type.clone(),
                metadata: req.metadata.clone(),
            });
            let mut state = self.state.write().await;
            let objects = state.buckets.get_mut(&req.bucket).ok_or_else(no_such_bucket)?;
            let etag = compute_etag(&req.body);
            objects.insert(
                req.key,
                StoredObject {
                    data: req.body,
                    etag: etag.clone(),
                    last_modified: Utc::now(),
                    content_type: req.content_type,
                    metadata: req.metadata,
                },
            );
            Ok(Some(etag))
        })
    }

    fn create_multipart_upload(&self, req: CreateMultipartRequest) -> ApiFuture<'_, String> {
        Box::pin(async move {
            self.record(ApiCall::CreateMultipartUpload {
                bucket: req.bucket.clone(),
                key: req.key.clone(),
                metadata: req.metadata.clone(),
            });
            let mut state = self.state.write().await;
            if !state.buckets.contains_key(&req.bucket) {
                return Err(no_such_bucket());
            }
            let upload_id = uuid::Uuid::new_v4().to_string();
            state.uploads.insert(
                upload_id.clone(),
                Upload {
                    bucket: req.bucket,
                    key: req.key,
                    content_type: req.content_type,
                    metadata: req.metadata,
                    parts: BTreeMap::new(),
                },
            );
            Ok(upload_id)
        })
    }

    fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> ApiFuture<'_, String> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            self.record(ApiCall::UploadPart {
                upload_id: upload_id.clone(),
                part_number,
                size: body.len(),
            });
            if self.part_fault(part_number) {
                return Err(internal_error());
            }
            let mut state = self.state.write().await;
            let upload = state.uploads.get_mut(&upload_id).ok_or_else(no_such_upload)?;
            let etag = compute_etag(&body);
            upload.parts.insert(part_number, (body, etag.clone()));
            Ok(etag)
        })
    }

    fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> ApiFuture<'_, ()> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            self.record(ApiCall::CompleteMultipartUpload {
                upload_id: upload_id.clone(),
                parts: parts.len(),
            });
            let mut state = self.state.write().await;
            let upload = state.uploads.remove(&upload_id).ok_or_else(no_such_upload)?;

            let all_present = parts.iter().all(|part| {
                upload
                    .parts
                    .get(&part.part_number)
                    .is_some_and(|(_, etag)| *etag == part.etag)
            });
            if !all_present {
                state.uploads.insert(upload_id, upload);
                return Err(provider_error(
                    StatusCode::BAD_REQUEST,
                    "InvalidPart",
                    "One or more of the specified parts could not be found.",
                ));
            }
            let chunks: Vec<&Bytes> = parts
                .iter()
                .filter_map(|part| upload.parts.get(&part.part_number).map(|(data, _)| data))
                .collect();

            let etag = composite_etag(&chunks);
            let mut data = Vec::with_capacity(chunks.iter().map(|c| c.len()).sum());
            for chunk in &chunks {
                data.extend_from_slice(chunk);
            }
            let objects = state
                .buckets
                .get_mut(&upload.bucket)
                .ok_or_else(no_such_bucket)?;
            objects.insert(
                upload.key.clone(),
                StoredObject {
                    data: Bytes::from(data),
                    etag,
                    last_modified: Utc::now(),
                    content_type: upload.content_type.clone(),
                    metadata: upload.metadata.clone(),
                },
            );
            Ok(())
        })
    }

    fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> ApiFuture<'_, ()> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            self.record(ApiCall::AbortMultipartUpload {
                upload_id: upload_id.clone(),
            });
            let mut state = self.state.write().await;
            state
                .uploads
                .remove(&upload_id)
                .map(|_| ())
                .ok_or_else(no_such_upload)
        })
    }

    fn copy_object(&self, req: CopyObjectRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.record(ApiCall::CopyObject {
                bucket: req.bucket.clone(),
                key: req.key.clone(),
                source_bucket: req.source_bucket.clone(),
                source_key: req.source_key.clone(),
                directive: req.directive,
                content_type: req.content_type.clone(),
                metadata: req.metadata.clone(),
            });
            if req.directive == MetadataDirective::Copy
                && req.bucket == req.source_bucket
                && req.key == req.source_key
            {
                return Err(provider_error(
                    StatusCode::BAD_REQUEST,
                    "InvalidRequest",
                    "This copy request is illegal because it is trying to copy an object to itself without changing the object's metadata.",
                ));
            }

            let mut state = self.state.write().await;
            let source = state
                .buckets
                .get(&req.source_bucket)
                .ok_or_else(no_such_bucket)?
                .get(&req.source_key)
                .ok_or_else(no_such_key)?
                .clone();
            let (content_type, metadata) = match req.directive {
                MetadataDirective::Copy => (source.content_type, source.metadata),
                MetadataDirective::Replace => (
                    req.content_type
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    req.metadata,
                ),
            };
            let objects = state.buckets.get_mut(&req.bucket).ok_or_else(no_such_bucket)?;
            objects.insert(
                req.key,
                StoredObject {
                    data: source.data,
                    etag: source.etag,
                    last_modified: Utc::now(),
                    content_type,
                    metadata,
                },
            );
            Ok(())
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> ApiFuture<'_, ()> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            self.record(ApiCall::DeleteObject {
                bucket: bucket.clone(),
                key: key.clone(),
            });
            let mut state = self.state.write().await;
            let objects = state.buckets.get_mut(&bucket).ok_or_else(no_such_bucket)?;
            objects.remove(&key);
            Ok(())
        })
    }

    fn create_bucket(&self, req: CreateBucketRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.record(ApiCall::CreateBucket {
                bucket: req.bucket.clone(),
                location_constraint: req.location_constraint.clone(),
            });
            let mut state = self.state.write().await;
            if state.buckets.contains_key(&req.bucket) {
                return Err(provider_error(
                    StatusCode::CONFLICT,
                    "BucketAlreadyOwnedByYou",
                    "Your previous request to create the named bucket succeeded and you already own it.",
                ));
            }
            state.buckets.insert(req.bucket, BTreeMap::new());
            Ok(())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> ApiFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.record(ApiCall::DeleteBucket {
                bucket: bucket.clone(),
            });
            let mut state = self.state.write().await;
            let objects = state.buckets.get(&bucket).ok_or_else(no_such_bucket)?;
            if !objects.is_empty() {
                return Err(provider_error(
                    StatusCode::CONFLICT,
                    "BucketNotEmpty",
                    "The bucket you tried to delete is not empty",
                ));
            }
            state.buckets.remove(&bucket);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use tokio::io::AsyncReadExt;

    async fn store_with(keys: &[&str]) -> MemoryObjectApi {
        let api = MemoryObjectApi::new();
        api.insert_bucket("demo").await;
        for key in keys {
            api.insert("demo", key, Bytes::from_static(b"x"), Metadata::new(), Utc::now())
                .await;
        }
        api
    }

    fn list_req(prefix: &str, delimiter: Option<&str>, marker: Option<&str>, max_keys: u32) -> ListObjectsRequest {
        ListObjectsRequest {
            bucket: "demo".to_string(),
            prefix: prefix.to_string(),
            delimiter: delimiter.map(str::to_string),
            marker: marker.map(str::to_string),
            max_keys,
        }
    }

    #[test]
    fn test_etag_is_quoted_md5() {
        assert_eq!(compute_etag(b""), "\"d41d8cd98f00b204e9800998ecf8427e\"");
        assert_eq!(compute_etag(b"hello"), "\"5d41402abc4b2a76b9719d911017c592\"");
    }

    #[test]
    fn test_composite_etag_shape() {
        let a = Bytes::from_static(b"a");
        let b = Bytes::from_static(b"b");
        let etag = composite_etag(&[&a, &b]);
        assert!(etag.starts_with('"'));
        assert!(etag.ends_with("-2\""));
        assert_eq!(etag.len(), 32 + 2 + 2);
    }

    // ── listing ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_flat_listing_pages_without_next_marker() {
        let api = store_with(&["a", "b", "c"]).await;
        let page = api.list_objects(list_req("", None, None, 2)).await.unwrap();
        assert!(page.is_truncated);
        assert!(page.next_marker.is_none());
        let keys: Vec<_> = page.contents.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);

        let page = api.list_objects(list_req("", None, Some("b"), 2)).await.unwrap();
        assert!(!page.is_truncated);
        assert_eq!(page.contents.len(), 1);
        assert_eq!(page.contents[0].key, "c");
    }

    #[tokio::test]
    async fn test_delimiter_groups_common_prefixes() {
        let api = store_with(&["a/b.txt", "a/c.txt", "d.txt", "e/f/g"]).await;
        let page = api.list_objects(list_req("", Some("/"), None, 10)).await.unwrap();
        assert_eq!(page.common_prefixes, vec!["a/".to_string(), "e/".to_string()]);
        assert_eq!(page.contents.len(), 1);
        assert_eq!(page.contents[0].key, "d.txt");
        assert!(!page.is_truncated);
    }

    #[tokio::test]
    async fn test_delimiter_next_marker_skips_prefix() {
        let api = store_with(&["a/1", "a/2", "b/1", "c"]).await;
        let page = api.list_objects(list_req("", Some("/"), None, 1)).await.unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_marker.as_deref(), Some("a/"));
        assert_eq!(page.common_prefixes, vec!["a/".to_string()]);

        let page = api
            .list_objects(list_req("", Some("/"), Some("a/"), 1))
            .await
            .unwrap();
        assert_eq!(page.common_prefixes, vec!["b/".to_string()]);
        assert_eq!(page.next_marker.as_deref(), Some("b/"));
    }

    #[tokio::test]
    async fn test_prefix_filters_and_groups_below() {
        let api = store_with(&["dir/x", "dir/sub/y", "other"]).await;
        let page = api.list_objects(list_req("dir/", Some("/"), None, 10)).await.unwrap();
        assert_eq!(page.contents[0].key, "dir/x");
        assert_eq!(page.common_prefixes, vec!["dir/sub/".to_string()]);
    }

    #[tokio::test]
    async fn test_list_missing_bucket() {
        let api = MemoryObjectApi::new();
        let err = api.list_objects(list_req("", None, None, 10)).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoSuchBucket));
    }

    #[tokio::test]
    async fn test_list_fault_injection() {
        let api = store_with(&["a"]).await;
        api.fail_list_after(1);
        assert!(api.list_objects(list_req("", None, None, 10)).await.is_ok());
        let err = api.list_objects(list_req("", None, None, 10)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    // ── objects ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_put_head_get() {
        let api = store_with(&[]).await;
        let mut metadata = Metadata::new();
        metadata.insert("mtime".to_string(), "5.000000000".to_string());
        let etag = api
            .put_object(PutObjectRequest {
                bucket: "demo".to_string(),
                key: "k".to_string(),
                body: Bytes::from_static(b"hello"),
                content_type: "text/plain".to_string(),
                acl: None,
                metadata: metadata.clone(),
            })
            .await
            .unwrap();
        assert_eq!(etag.as_deref(), Some("\"5d41402abc4b2a76b9719d911017c592\""));

        let head = api.head_object("demo", "k").await.unwrap();
        assert_eq!(head.content_length, Some(5));
        assert_eq!(head.metadata, metadata);
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));

        let mut reader = api.get_object("demo", "k").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_head_missing_is_bare_404() {
        let api = store_with(&[]).await;
        let err = api.head_object("demo", "nope").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        let err = api.get_object("demo", "nope").await.err().expect("missing object");
        assert_eq!(err.kind(), Some(ErrorKind::NoSuchKey));
    }

    #[tokio::test]
    async fn test_sparse_head() {
        let api = store_with(&["k"]).await;
        api.sparse_head(true);
        let head = api.head_object("demo", "k").await.unwrap();
        assert!(head.content_length.is_none());
        assert!(head.last_modified.is_none());
        assert!(head.etag.is_some());
    }

    #[tokio::test]
    async fn test_copy_directives() {
        let api = store_with(&[]).await;
        let mut metadata = Metadata::new();
        metadata.insert("owner".to_string(), "ops".to_string());
        api.insert("demo", "src", Bytes::from_static(b"data"), metadata.clone(), Utc::now())
            .await;

        api.copy_object(CopyObjectRequest {
            bucket: "demo".to_string(),
            key: "dst".to_string(),
            source_bucket: "demo".to_string(),
            source_key: "src".to_string(),
            directive: MetadataDirective::Copy,
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(api.object("demo", "dst").await.unwrap().metadata, metadata);

        let mut replaced = Metadata::new();
        replaced.insert("mtime".to_string(), "1.000000000".to_string());
        api.copy_object(CopyObjectRequest {
            bucket: "demo".to_string(),
            key: "src".to_string(),
            source_bucket: "demo".to_string(),
            source_key: "src".to_string(),
            directive: MetadataDirective::Replace,
            content_type: Some("text/plain".to_string()),
            metadata: replaced.clone(),
            ..Default::default()
        })
        .await
        .unwrap();
        let stored = api.object("demo", "src").await.unwrap();
        assert_eq!(stored.metadata, replaced);
        assert_eq!(stored.data, Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn test_copy_to_self_without_replace_rejected() {
        let api = store_with(&["k"]).await;
        let err = api
            .copy_object(CopyObjectRequest {
                bucket: "demo".to_string(),
                key: "k".to_string(),
                source_bucket: "demo".to_string(),
                source_key: "k".to_string(),
                directive: MetadataDirective::Copy,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Other));
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_ok() {
        let api = store_with(&[]).await;
        api.delete_object("demo", "nope").await.unwrap();
    }

    // ── multipart ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_multipart_complete() {
        let api = store_with(&[]).await;
        let upload_id = api
            .create_multipart_upload(CreateMultipartRequest {
                bucket: "demo".to_string(),
                key: "big".to_string(),
                content_type: "application/octet-stream".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let e1 = api
            .upload_part("demo", "big", &upload_id, 1, Bytes::from_static(b"ab"))
            .await
            .unwrap();
        let e2 = api
            .upload_part("demo", "big", &upload_id, 2, Bytes::from_static(b"cd"))
            .await
            .unwrap();
        api.complete_multipart_upload(
            "demo",
            "big",
            &upload_id,
            vec![
                CompletedPart { part_number: 1, etag: e1 },
                CompletedPart { part_number: 2, etag: e2 },
            ],
        )
        .await
        .unwrap();
        let stored = api.object("demo", "big").await.unwrap();
        assert_eq!(stored.data, Bytes::from_static(b"abcd"));
        assert!(stored.etag.ends_with("-2\""));
        assert_eq!(api.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_multipart_abort_and_fault() {
        let api = store_with(&[]).await;
        api.fail_upload_part(1);
        let upload_id = api
            .create_multipart_upload(CreateMultipartRequest {
                bucket: "demo".to_string(),
                key: "big".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(api
            .upload_part("demo", "big", &upload_id, 1, Bytes::from_static(b"x"))
            .await
            .is_err());
        assert_eq!(api.pending_uploads().await, 1);
        api.abort_multipart_upload("demo", "big", &upload_id).await.unwrap();
        assert_eq!(api.pending_uploads().await, 0);
        assert!(api.object("demo", "big").await.is_none());
    }

    // ── buckets ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_bucket_lifecycle_codes() {
        let api = MemoryObjectApi::new();
        let create = || CreateBucketRequest {
            bucket: "demo".to_string(),
            ..Default::default()
        };
        api.create_bucket(create()).await.unwrap();
        let err = api.create_bucket(create()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BucketAlreadyOwnedByYou));

        api.insert("demo", "k", Bytes::from_static(b"x"), Metadata::new(), Utc::now())
            .await;
        let err = api.delete_bucket("demo").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BucketNotEmpty));

        api.delete_object("demo", "k").await.unwrap();
        api.delete_bucket("demo").await.unwrap();
        assert!(!api.has_bucket("demo").await);
        assert_eq!(api.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_shared_store_per_name() {
        let first = shared("shared-store-a");
        first.insert_bucket("demo").await;
        assert!(Arc::ptr_eq(&first, &shared("shared-store-a")));
        assert!(shared("shared-store-a").has_bucket("demo").await);
        assert!(!shared("shared-store-b").has_bucket("demo").await);
    }
}
