//! One stored object.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{mtime, Backend};
use crate::errors::{Error, Result};
use crate::metrics;
use crate::remote::{BoxFuture, RemoteObject};
use crate::storage::backend::{
    CopyObjectRequest, CreateMultipartRequest, Metadata, MetadataDirective, ObjectReader,
    ObjectSummary,
};

/// Whether the custom metadata has been fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaState {
    /// Only what a list page reported is known.
    Unprobed,
    /// HEAD answered; the map may legitimately be empty.
    Probed(Metadata),
}

/// An object in an S3 bucket.
pub struct S3Object {
    backend: Arc<Backend>,
    remote: String,
    etag: String,
    bytes: i64,
    last_modified: DateTime<Utc>,
    meta: MetaState,
}

impl S3Object {
    /// Entry built from a list page. Metadata is left unprobed.
    pub fn from_summary(backend: Arc<Backend>, remote: impl Into<String>, info: &ObjectSummary) -> Self {
        let remote = remote.into();
        let last_modified = match info.last_modified {
            Some(t) => t,
            None => {
                warn!("{}: failed to read last modified", remote);
                Utc::now()
            }
        };
        Self {
            backend,
            remote,
            etag: info.etag.clone(),
            bytes: info.size,
            last_modified,
            meta: MetaState::Unprobed,
        }
    }

    /// Resolve `remote` with a HEAD request. Fails with
    /// [`Error::NotFound`] when there is no such key.
    pub async fn probe(backend: Arc<Backend>, remote: impl Into<String>) -> Result<Self> {
        let mut object = Self::unprobed(backend, remote.into());
        object.read_metadata().await?;
        Ok(object)
    }

    pub(super) fn unprobed(backend: Arc<Backend>, remote: String) -> Self {
        Self {
            backend,
            remote,
            etag: String::new(),
            bytes: 0,
            last_modified: Utc::now(),
            meta: MetaState::Unprobed,
        }
    }

    /// Full provider key.
    pub fn key(&self) -> String {
        self.backend.key(&self.remote)
    }

    /// Backend this object belongs to.
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Provider ETag as reported, quotes included.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Cached metadata state.
    pub fn meta(&self) -> &MetaState {
        &self.meta
    }

    /// Fetch size, ETag, timestamp and metadata unless already cached.
    pub async fn read_metadata(&mut self) -> Result<()> {
        if matches!(self.meta, MetaState::Probed(_)) {
            return Ok(());
        }
        let bucket = self.backend.bucket()?;
        let key = self.key();
        let head = match self.backend.api.head_object(bucket, &key).await {
            Ok(head) => head,
            Err(err) => {
                debug!("{}: failed to read info: {}", self.remote, err);
                if err.is_not_found() {
                    return Err(Error::NotFound(self.remote.clone()));
                }
                return Err(err);
            }
        };

        // Some proxies drop Content-Length on HEAD.
        self.bytes = head.content_length.unwrap_or(0);
        self.etag = head.etag.unwrap_or_default();
        self.last_modified = match head.last_modified {
            Some(t) => t,
            None => {
                warn!("{}: failed to read last modified from HEAD", self.remote);
                Utc::now()
            }
        };
        self.meta = MetaState::Probed(head.metadata);
        Ok(())
    }

    /// Forget the cached metadata.
    pub fn invalidate(&mut self) {
        self.meta = MetaState::Unprobed;
    }

    fn content_type(&self) -> String {
        mime_guess::from_path(&self.remote)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    async fn write_mod_time(&mut self, mod_time: DateTime<Utc>) -> Result<()> {
        self.read_metadata().await?;
        let mut metadata = match &self.meta {
            MetaState::Probed(metadata) => metadata.clone(),
            MetaState::Unprobed => Metadata::new(),
        };
        metadata.insert(mtime::META_MTIME.to_string(), mtime::encode(mod_time));

        let bucket = self.backend.bucket()?.to_string();
        let key = self.key();
        self.backend
            .api
            .copy_object(CopyObjectRequest {
                bucket: bucket.clone(),
                key: key.clone(),
                source_bucket: bucket,
                source_key: key,
                directive: MetadataDirective::Replace,
                content_type: Some(self.content_type()),
                acl: self.backend.acl.clone(),
                metadata,
            })
            .await?;

        self.invalidate();
        self.read_metadata().await
    }
}

impl fmt::Display for S3Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote)
    }
}

impl fmt::Debug for S3Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Object")
            .field("bucket", &self.backend.bucket)
            .field("remote", &self.remote)
            .field("etag", &self.etag)
            .field("bytes", &self.bytes)
            .field("last_modified", &self.last_modified)
            .field("meta", &self.meta)
            .finish()
    }
}

impl RemoteObject for S3Object {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn remote(&self) -> &str {
        &self.remote
    }

    fn md5sum(&self) -> String {
        let etag = self.etag.to_lowercase();
        let etag = etag.trim_matches('"');
        if etag.len() == 32 && etag.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            etag.to_string()
        } else {
            // Multipart ETags are not content hashes.
            String::new()
        }
    }

    fn size(&self) -> i64 {
        self.bytes
    }

    fn mod_time(&mut self) -> BoxFuture<'_, DateTime<Utc>> {
        Box::pin(async move {
            if let Err(err) = self.read_metadata().await {
                warn!("{}: failed to read metadata: {}", self.remote, err);
                return Utc::now();
            }
            let MetaState::Probed(metadata) = &self.meta else {
                return self.last_modified;
            };
            match metadata.get(mtime::META_MTIME) {
                None => self.last_modified,
                Some(value) => match mtime::decode(value) {
                    Some(t) => t,
                    None => {
                        warn!("{}: failed to read mtime {:?} from object", self.remote, value);
                        self.last_modified
                    }
                },
            }
        })
    }

    fn set_mod_time(&mut self, mod_time: DateTime<Utc>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(err) = self.write_mod_time(mod_time).await {
                metrics::record_error("set_mod_time");
                error!("{}: failed to update remote mtime: {}", self.remote, err);
            }
        })
    }

    fn storable(&self) -> bool {
        true
    }

    fn open(&self) -> BoxFuture<'_, Result<ObjectReader>> {
        Box::pin(async move {
            let bucket = self.backend.bucket()?;
            self.backend.api.get_object(bucket, &self.key()).await
        })
    }

    fn update(
        &mut self,
        input: ObjectReader,
        mod_time: DateTime<Utc>,
        size: i64,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let bucket = self.backend.bucket()?.to_string();
            debug!("{}: uploading {} bytes", self.remote, size);
            let request = CreateMultipartRequest {
                bucket,
                key: self.key(),
                content_type: self.content_type(),
                acl: self.backend.acl.clone(),
                metadata: Metadata::from([(mtime::META_MTIME.to_string(), mtime::encode(mod_time))]),
            };
            self.backend.uploader().upload(request, input).await?;

            self.invalidate();
            self.read_metadata().await
        })
    }

    fn remove(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let bucket = self.backend.bucket()?;
            self.backend.api.delete_object(bucket, &self.key()).await
        })
    }
}
