//! S3 bucket exposed as a [`RemoteFs`].
//!
//! A remote path is `bucket[/prefix]`.  Keys under the prefix appear as
//! paths relative to it; directories are derived from common prefixes of
//! a `/`-delimited listing.  With no bucket the remote sits at the top
//! level, where the only thing that can be listed is the set of buckets.
//!
//! Modification times live in the `mtime` object metadata key (see
//! [`mtime`]) and are rewritten by copying an object onto itself.

pub mod mtime;
pub mod object;
pub mod path;
pub mod upload;

pub use object::{MetaState, S3Object};

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{RemoteConfig, TransferConfig};
use crate::errors::{Error, ErrorKind, Result};
use crate::metrics;
use crate::remote::{
    BoxFuture, Copier, Dir, Limited, ListSender, ListStatus, Listing, RemoteFs, RemoteObject,
};
use crate::storage::backend::{
    CopyObjectRequest, CreateBucketRequest, ListObjectsPage, ListObjectsRequest, MetadataDirective,
    ObjectApi, ObjectReader,
};
use crate::storage::connection;
use upload::Uploader;

/// Options that shape requests but not the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Options {
    /// Canned ACL for new buckets and objects.
    pub acl: Option<String>,
    /// Region tag sent when creating a bucket.
    pub location_constraint: Option<String>,
}

impl S3Options {
    pub fn from_config(remote: &RemoteConfig) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            acl: non_empty(&remote.acl),
            location_constraint: non_empty(&remote.location_constraint),
        }
    }
}

/// State shared by a remote and every object it hands out.
pub struct Backend {
    name: String,
    api: Arc<dyn ObjectApi>,
    bucket: String,
    /// Empty, or ends with `/`.
    root: String,
    acl: Option<String>,
    location_constraint: Option<String>,
    transfer: TransferConfig,
}

impl Backend {
    /// The selected bucket, or [`Error::NoBucket`] at the top level.
    pub fn bucket(&self) -> Result<&str> {
        if self.bucket.is_empty() {
            Err(Error::NoBucket)
        } else {
            Ok(&self.bucket)
        }
    }

    /// Provider key for a path relative to the root.
    pub fn key(&self, remote: &str) -> String {
        format!("{}{}", self.root, remote)
    }

    fn uploader(&self) -> Uploader {
        Uploader::new(
            self.api.clone(),
            self.transfer.part_size,
            self.transfer.upload_concurrency,
        )
    }

    /// Same remote re-rooted at `root`.
    fn with_root(&self, root: String) -> Self {
        Self {
            name: self.name.clone(),
            api: self.api.clone(),
            bucket: self.bucket.clone(),
            root,
            acl: self.acl.clone(),
            location_constraint: self.location_constraint.clone(),
            transfer: self.transfer.clone(),
        }
    }
}

/// A bucket, or a prefix within one.
pub struct S3Fs {
    backend: Arc<Backend>,
}

impl S3Fs {
    /// Connect to the provider described by `remote` and open `path`.
    pub async fn new(
        name: &str,
        path: &str,
        remote: &RemoteConfig,
        transfer: &TransferConfig,
    ) -> Result<Arc<dyn RemoteFs>> {
        let api = connection::connect(remote, transfer)?;
        Self::with_api(
            name,
            path,
            Arc::new(api),
            S3Options::from_config(remote),
            transfer.clone(),
        )
        .await
    }

    /// Open `path` through an existing transport.
    ///
    /// When the path names an existing object rather than a prefix, the
    /// result is a [`Limited`] view rooted at the object's parent.
    pub async fn with_api(
        name: &str,
        path: &str,
        api: Arc<dyn ObjectApi>,
        options: S3Options,
        transfer: TransferConfig,
    ) -> Result<Arc<dyn RemoteFs>> {
        let (bucket, directory) = path::parse_path(path)?;
        let backend = Backend {
            name: name.to_string(),
            api,
            bucket,
            root: path::root_prefix(&directory),
            acl: options.acl,
            location_constraint: options.location_constraint,
            transfer,
        };

        if !backend.bucket.is_empty() && !directory.is_empty() {
            let (parent, leaf) = path::split_leaf(&directory);
            let parent = Arc::new(backend.with_root(parent));
            match S3Object::probe(parent.clone(), leaf).await {
                Ok(_) => {
                    info!(
                        "{}: {}/{} is an object, limiting remote to it",
                        name, parent.bucket, directory
                    );
                    let fs: Arc<dyn RemoteFs> = Arc::new(S3Fs { backend: parent });
                    return Ok(Arc::new(Limited::new(fs, leaf)));
                }
                Err(err) => debug!("{}: {} is not an object: {}", name, directory, err),
            }
        }

        info!("{}: opened {}", name, path);
        Ok(Arc::new(S3Fs {
            backend: Arc::new(backend),
        }))
    }

    /// Shared backend state.
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl fmt::Display for S3Fs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.backend.root.is_empty() {
            write!(f, "S3 bucket {}", self.backend.bucket)
        } else {
            write!(f, "S3 bucket {} path {}", self.backend.bucket, self.backend.root)
        }
    }
}

/// Walks the pages of one listing request.
struct Pager {
    backend: Arc<Backend>,
    delimiter: Option<String>,
    marker: Option<String>,
    done: bool,
}

impl Pager {
    fn new(backend: Arc<Backend>, directories: bool) -> Self {
        Self {
            backend,
            delimiter: directories.then(|| "/".to_string()),
            marker: None,
            done: false,
        }
    }

    /// Cursor the next request would carry.
    fn marker(&self) -> Option<String> {
        self.marker.clone()
    }

    async fn next_page(&mut self) -> Option<Result<ListObjectsPage>> {
        if self.done {
            return None;
        }
        let req = ListObjectsRequest {
            bucket: self.backend.bucket.clone(),
            prefix: self.backend.root.clone(),
            delimiter: self.delimiter.clone(),
            marker: self.marker.clone(),
            max_keys: self.backend.transfer.list_chunk_size,
        };
        let page = match self.backend.api.list_objects(req).await {
            Ok(page) => page,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };
        metrics::record_list_page();

        if !page.is_truncated {
            self.done = true;
            return Some(Ok(page));
        }
        // NextMarker is only sent with a delimiter; otherwise resume after
        // the greatest name on the page.
        let next = page.next_marker.clone().filter(|m| !m.is_empty()).or_else(|| {
            let last_key = page.contents.last().map(|o| o.key.as_str());
            let last_prefix = page.common_prefixes.last().map(String::as_str);
            last_key.max(last_prefix).map(str::to_string)
        });
        match next {
            Some(marker) => {
                self.marker = Some(marker);
                Some(Ok(page))
            }
            None => {
                self.done = true;
                Some(Err(Error::MalformedResponse(
                    "truncated list page with nothing to resume from".to_string(),
                )))
            }
        }
    }
}

fn relative<'a>(root: &str, name: &'a str) -> Option<&'a str> {
    name.strip_prefix(root)
}

fn page_failed(backend: &Backend, pager: &Pager, err: Error) -> ListStatus {
    metrics::record_error("list");
    error!("Couldn't read bucket {:?}: {}", backend.bucket, err);
    ListStatus::Truncated {
        error: err,
        resume_marker: pager.marker(),
    }
}

async fn list_objects(backend: Arc<Backend>, tx: ListSender<Box<dyn RemoteObject>>) -> ListStatus {
    let mut pager = Pager::new(backend.clone(), false);
    while let Some(page) = pager.next_page().await {
        let page = match page {
            Ok(page) => page,
            Err(err) => return page_failed(&backend, &pager, err),
        };
        for info in &page.contents {
            let Some(remote) = relative(&backend.root, &info.key) else {
                warn!("Odd name received {:?}", info.key);
                continue;
            };
            let object = S3Object::from_summary(backend.clone(), remote, info);
            if !tx.send(Box::new(object)).await {
                return ListStatus::Cancelled;
            }
        }
        if tx.is_cancelled() {
            return ListStatus::Cancelled;
        }
    }
    ListStatus::Complete
}

async fn list_prefixes(backend: Arc<Backend>, tx: ListSender<Dir>) -> ListStatus {
    let mut pager = Pager::new(backend.clone(), true);
    while let Some(page) = pager.next_page().await {
        let page = match page {
            Ok(page) => page,
            Err(err) => return page_failed(&backend, &pager, err),
        };
        for prefix in &page.common_prefixes {
            let Some(remote) = relative(&backend.root, prefix) else {
                warn!("Odd name received {:?}", prefix);
                continue;
            };
            let dir = Dir {
                name: remote.strip_suffix('/').unwrap_or(remote).to_string(),
                when: None,
                bytes: 0,
                count: 0,
            };
            if !tx.send(dir).await {
                return ListStatus::Cancelled;
            }
        }
        if tx.is_cancelled() {
            return ListStatus::Cancelled;
        }
    }
    ListStatus::Complete
}

async fn list_buckets(backend: Arc<Backend>, tx: ListSender<Dir>) -> ListStatus {
    let buckets = match backend.api.list_buckets().await {
        Ok(buckets) => buckets,
        Err(err) => {
            metrics::record_error("list_buckets");
            error!("Couldn't list buckets: {}", err);
            return ListStatus::Truncated {
                error: err,
                resume_marker: None,
            };
        }
    };
    for bucket in buckets {
        let dir = Dir {
            name: bucket.name,
            when: bucket.creation_date,
            bytes: -1,
            count: -1,
        };
        if !tx.send(dir).await {
            return ListStatus::Cancelled;
        }
    }
    ListStatus::Complete
}

impl RemoteFs for S3Fs {
    fn name(&self) -> &str {
        &self.backend.name
    }

    fn root(&self) -> String {
        let root = self.backend.root.trim_end_matches('/');
        if root.is_empty() {
            self.backend.bucket.clone()
        } else {
            format!("{}/{}", self.backend.bucket, root)
        }
    }

    fn list(&self) -> Listing<Box<dyn RemoteObject>> {
        if self.backend.bucket.is_empty() {
            metrics::record_error("list");
            error!("{}: can't list objects at root - choose a bucket using lsd", self);
            return Listing::finished(
                Vec::new(),
                ListStatus::Truncated {
                    error: Error::NoBucket,
                    resume_marker: None,
                },
            );
        }
        let backend = self.backend.clone();
        Listing::spawn(self.backend.transfer.checkers, move |tx| {
            list_objects(backend, tx)
        })
    }

    fn list_dir(&self) -> Listing<Dir> {
        let backend = self.backend.clone();
        if backend.bucket.is_empty() {
            Listing::spawn(self.backend.transfer.checkers, move |tx| {
                list_buckets(backend, tx)
            })
        } else {
            Listing::spawn(self.backend.transfer.checkers, move |tx| {
                list_prefixes(backend, tx)
            })
        }
    }

    fn new_object<'a>(&'a self, remote: &'a str) -> BoxFuture<'a, Result<Box<dyn RemoteObject>>> {
        Box::pin(async move {
            self.backend.bucket()?;
            let object = S3Object::probe(self.backend.clone(), remote).await?;
            Ok(Box::new(object) as Box<dyn RemoteObject>)
        })
    }

    fn put<'a>(
        &'a self,
        input: ObjectReader,
        remote: &'a str,
        mod_time: DateTime<Utc>,
        size: i64,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteObject>>> {
        Box::pin(async move {
            self.backend.bucket()?;
            let mut object = S3Object::unprobed(self.backend.clone(), remote.to_string());
            object.update(input, mod_time, size).await?;
            Ok(Box::new(object) as Box<dyn RemoteObject>)
        })
    }

    fn mkdir(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let bucket = self.backend.bucket()?.to_string();
            let req = CreateBucketRequest {
                bucket,
                acl: self.backend.acl.clone(),
                location_constraint: self.backend.location_constraint.clone(),
            };
            match self.backend.api.create_bucket(req).await {
                Err(err) if err.kind() == Some(ErrorKind::BucketAlreadyOwnedByYou) => Ok(()),
                other => other,
            }
        })
    }

    fn rmdir(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.backend.root.is_empty() {
                return Ok(());
            }
            let bucket = self.backend.bucket()?;
            self.backend.api.delete_bucket(bucket).await
        })
    }

    fn precision(&self) -> Duration {
        Duration::from_nanos(1)
    }

    fn as_copier(&self) -> Option<&dyn Copier> {
        Some(self)
    }
}

impl Copier for S3Fs {
    fn copy<'a>(
        &'a self,
        src: &'a dyn RemoteObject,
        remote: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteObject>>> {
        Box::pin(async move {
            let Some(src) = src.as_any().downcast_ref::<S3Object>() else {
                debug!("{}: can't copy - not same remote type", src);
                return Err(Error::CantCopy);
            };
            let req = CopyObjectRequest {
                bucket: self.backend.bucket()?.to_string(),
                key: self.backend.key(remote),
                source_bucket: src.backend().bucket()?.to_string(),
                source_key: src.key(),
                directive: MetadataDirective::Copy,
                ..Default::default()
            };
            self.backend.api.copy_object(req).await?;
            self.new_object(remote).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::Metadata;
    use crate::storage::memory::{ApiCall, MemoryObjectApi};
    use chrono::TimeZone;
    use std::any::Any;
    use tokio::io::AsyncReadExt;

    fn transfer(list_chunk_size: u32) -> TransferConfig {
        TransferConfig {
            list_chunk_size,
            checkers: 2,
            ..Default::default()
        }
    }

    async fn open(api: &Arc<MemoryObjectApi>, path: &str, chunk: u32) -> Arc<dyn RemoteFs> {
        S3Fs::with_api("test", path, api.clone(), S3Options::default(), transfer(chunk))
            .await
            .unwrap()
    }

    fn backend(api: &Arc<MemoryObjectApi>) -> Arc<Backend> {
        Arc::new(Backend {
            name: "test".to_string(),
            api: api.clone(),
            bucket: "demo".to_string(),
            root: String::new(),
            acl: None,
            location_constraint: None,
            transfer: transfer(1024),
        })
    }

    fn t1() -> DateTime<Utc> {
        Utc.timestamp_opt(1_445_412_480, 123_456_789).unwrap()
    }

    fn reader(data: &[u8]) -> ObjectReader {
        Box::pin(std::io::Cursor::new(data.to_vec()))
    }

    async fn read_all(mut r: ObjectReader) -> Vec<u8> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_demo_scenario() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert_bucket("demo").await;
        let fs = open(&api, "demo", 1024).await;
        fs.put(reader(b"0123456789"), "a/b.txt", t1(), 10).await.unwrap();

        let (objects, status) = fs.list().collect().await;
        assert!(status.is_complete());
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].remote(), "a/b.txt");
        assert_eq!(objects[0].size(), 10);

        let (dirs, status) = fs.list_dir().collect().await;
        assert!(status.is_complete());
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].name, "a");
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert_bucket("demo").await;
        let fs = open(&api, "demo/dir", 1024).await;
        let written = fs.put(reader(b"hello world"), "greeting.txt", t1(), 11).await.unwrap();
        assert_eq!(written.size(), 11);

        let mut object = fs.new_object("greeting.txt").await.unwrap();
        assert_eq!(object.size(), 11);
        assert_eq!(object.mod_time().await, t1());
        assert_eq!(read_all(object.open().await.unwrap()).await, b"hello world");

        let stored = api.object("demo", "dir/greeting.txt").await.unwrap();
        assert_eq!(stored.content_type, "text/plain");
        assert_eq!(stored.metadata.get("mtime").unwrap(), "1445412480.123456789");
    }

    #[tokio::test]
    async fn test_probe_is_idempotent() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert("demo", "k.bin", &b"abc"[..], Metadata::new(), t1()).await;
        api.clear_calls();

        let mut object = S3Object::probe(backend(&api), "k.bin").await.unwrap();
        let (etag, size) = (object.etag().to_string(), object.size());
        object.read_metadata().await.unwrap();
        assert_eq!(object.etag(), etag);
        assert_eq!(object.size(), size);
        let heads = api
            .calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::HeadObject { .. }))
            .count();
        assert_eq!(heads, 1);
    }

    #[tokio::test]
    async fn test_md5sum_only_for_plain_etags() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert("demo", "plain", &b"abc"[..], Metadata::new(), t1()).await;
        let fs = open(&api, "demo", 1024).await;
        let object = fs.new_object("plain").await.unwrap();
        assert_eq!(object.md5sum(), "900150983cd24fb0d6963f7d28e17f72");

        let multipart = S3Object::from_summary(
            backend(&api),
            "big",
            &crate::storage::backend::ObjectSummary {
                key: "big".to_string(),
                size: 1,
                last_modified: Some(t1()),
                etag: "\"d41d8cd98f00b204e9800998ecf8427e-2\"".to_string(),
            },
        );
        assert_eq!(multipart.md5sum(), "");
    }

    #[tokio::test]
    async fn test_md5sum_normalises_case_and_quotes() {
        let api = Arc::new(MemoryObjectApi::new());
        let summary = |etag: &str| crate::storage::backend::ObjectSummary {
            key: "k".to_string(),
            size: 3,
            last_modified: Some(t1()),
            etag: etag.to_string(),
        };
        for etag in [
            "\"900150983CD24FB0D6963F7D28E17F72\"",
            "900150983Cd24fB0d6963F7D28E17F72",
            "\"900150983cd24fb0d6963f7d28e17f72\"",
        ] {
            let object = S3Object::from_summary(backend(&api), "k", &summary(etag));
            assert_eq!(object.md5sum(), "900150983cd24fb0d6963f7d28e17f72", "{etag}");
        }
        for etag in ["\"zz0150983cd24fb0d6963f7d28e17f72\"", "\"\"", "W/\"abc\""] {
            let object = S3Object::from_summary(backend(&api), "k", &summary(etag));
            assert_eq!(object.md5sum(), "", "{etag}");
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_listing_mid_page() {
        let api = Arc::new(MemoryObjectApi::new());
        for i in 0..10 {
            api.insert("demo", &format!("k{i}"), &b"x"[..], Metadata::new(), t1()).await;
        }
        let fs = open(&api, "demo", 5).await;
        api.clear_calls();

        let mut listing = fs.list();
        let first = listing.next().await.unwrap();
        assert_eq!(first.remote(), "k0");
        listing.cancel();
        let mut rest = 0;
        while listing.next().await.is_some() {
            rest += 1;
        }
        assert!(rest < 4, "{rest} items after cancel");
        assert!(matches!(listing.status(), Some(ListStatus::Cancelled)));
        let pages = api
            .calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::ListObjects(_)))
            .count();
        assert_eq!(pages, 1);
    }

    #[tokio::test]
    async fn test_pagination_is_complete() {
        let api = Arc::new(MemoryObjectApi::new());
        for i in 0..7 {
            let key = format!("root/f{i}");
            api.insert("demo", &key, &b"x"[..], Metadata::new(), t1()).await;
        }
        api.insert("demo", "other", &b"x"[..], Metadata::new(), t1()).await;
        let fs = open(&api, "demo/root", 3).await;

        let (objects, status) = fs.list().collect().await;
        assert!(status.is_complete());
        let mut names: Vec<_> = objects.iter().map(|o| o.remote().to_string()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names, (0..7).map(|i| format!("f{i}")).collect::<Vec<_>>());
        let pages = api
            .calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::ListObjects(_)))
            .count();
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn test_directories_paginate_with_next_marker() {
        let api = Arc::new(MemoryObjectApi::new());
        for key in ["a/1", "a/2", "b/1", "c/1", "top.txt"] {
            api.insert("demo", key, &b"x"[..], Metadata::new(), t1()).await;
        }
        let fs = open(&api, "demo", 1).await;
        let (dirs, status) = fs.list_dir().collect().await;
        assert!(status.is_complete());
        let names: Vec<_> = dirs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(dirs.iter().all(|d| d.bytes == 0 && d.count == 0));
    }

    #[tokio::test]
    async fn test_page_failure_truncates_listing() {
        let api = Arc::new(MemoryObjectApi::new());
        for i in 0..5 {
            api.insert("demo", &format!("k{i}"), &b"x"[..], Metadata::new(), t1()).await;
        }
        let fs = open(&api, "demo", 2).await;
        api.fail_list_after(1);

        let (objects, status) = fs.list().collect().await;
        assert_eq!(objects.len(), 2);
        match status {
            ListStatus::Truncated {
                error,
                resume_marker,
            } => {
                assert!(error.is_retryable());
                assert_eq!(resume_marker.as_deref(), Some("k1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_mod_time_probes_then_replaces_metadata() {
        let api = Arc::new(MemoryObjectApi::new());
        let metadata = Metadata::from([
            ("owner".to_string(), "alice".to_string()),
            ("mtime".to_string(), "1.000000000".to_string()),
        ]);
        api.insert("demo", "doc.txt", &b"text"[..], metadata, t1()).await;
        let fs = open(&api, "demo", 1024).await;
        let (mut objects, _) = fs.list().collect().await;
        let object = &mut objects[0];
        api.clear_calls();

        let new_time = Utc.timestamp_opt(1_500_000_000, 5).unwrap();
        object.set_mod_time(new_time).await;

        let calls = api.calls();
        assert_eq!(
            calls[0],
            ApiCall::HeadObject {
                bucket: "demo".to_string(),
                key: "doc.txt".to_string()
            }
        );
        match &calls[1] {
            ApiCall::CopyObject {
                bucket,
                key,
                source_bucket,
                source_key,
                directive,
                content_type,
                metadata,
            } => {
                assert_eq!((bucket.as_str(), key.as_str()), ("demo", "doc.txt"));
                assert_eq!((source_bucket.as_str(), source_key.as_str()), ("demo", "doc.txt"));
                assert_eq!(*directive, MetadataDirective::Replace);
                assert_eq!(content_type.as_deref(), Some("text/plain"));
                assert_eq!(metadata.get("owner").unwrap(), "alice");
                assert_eq!(metadata.get("mtime").unwrap(), "1500000000.000000005");
                assert_eq!(metadata.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(object.mod_time().await, new_time);
    }

    #[tokio::test]
    async fn test_mod_time_falls_back_to_last_modified() {
        let api = Arc::new(MemoryObjectApi::new());
        let metadata = Metadata::from([("mtime".to_string(), "garbage".to_string())]);
        api.insert("demo", "bad", &b"x"[..], metadata, t1()).await;
        api.insert("demo", "none", &b"x"[..], Metadata::new(), t1()).await;
        let fs = open(&api, "demo", 1024).await;
        for name in ["bad", "none"] {
            let mut object = fs.new_object(name).await.unwrap();
            assert_eq!(object.mod_time().await, t1());
        }
    }

    #[tokio::test]
    async fn test_sparse_head_tolerated() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert("demo", "ceph", &b"abcdef"[..], Metadata::new(), t1()).await;
        api.sparse_head(true);
        let fs = open(&api, "demo", 1024).await;
        let object = fs.new_object("ceph").await.unwrap();
        assert_eq!(object.size(), 0);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert_bucket("demo").await;
        let fs = open(&api, "demo", 1024).await;
        let err = fs.new_object("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref r) if r == "nope"));
    }

    #[tokio::test]
    async fn test_path_to_object_gives_limited_view() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert("demo", "x/y/z/file.txt", &b"x"[..], Metadata::new(), t1()).await;
        api.insert("demo", "x/y/z/other.txt", &b"x"[..], Metadata::new(), t1()).await;

        for (path, root) in [
            ("demo/x/y/z/file.txt", "demo/x/y/z"),
            ("demo/x/y/z/file.txt/", "demo/x/y/z"),
        ] {
            let fs = open(&api, path, 1024).await;
            assert_eq!(fs.root(), root);
            let (objects, status) = fs.list().collect().await;
            assert!(status.is_complete());
            assert_eq!(objects.len(), 1);
            assert_eq!(objects[0].remote(), "file.txt");
            assert!(fs.new_object("other.txt").await.is_err());
        }

        api.insert("demo", "top.txt", &b"x"[..], Metadata::new(), t1()).await;
        let fs = open(&api, "demo/top.txt", 1024).await;
        assert_eq!(fs.root(), "demo");
        let (objects, _) = fs.list().collect().await;
        assert_eq!(objects[0].remote(), "top.txt");
    }

    #[tokio::test]
    async fn test_limited_view_rejects_put_and_rmdir() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert("demo", "x/file.txt", &b"x"[..], Metadata::new(), t1()).await;
        let fs = open(&api, "demo/x/file.txt", 1024).await;

        let err = fs.put(reader(b"new"), "other.txt", t1(), 3).await.err().unwrap();
        assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
        assert!(api.object("demo", "x/other.txt").await.is_none());

        let err = fs.rmdir().await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
        assert!(api.has_bucket("demo").await);

        let replaced = fs.put(reader(b"new"), "file.txt", t1(), 3).await.unwrap();
        assert_eq!(replaced.size(), 3);
        assert_eq!(api.object("demo", "x/file.txt").await.unwrap().data, &b"new"[..]);
    }

    #[tokio::test]
    async fn test_mkdir_on_owned_bucket_succeeds() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert_bucket("demo").await;
        let fs = S3Fs::with_api(
            "test",
            "demo",
            api.clone(),
            S3Options {
                acl: Some("private".to_string()),
                location_constraint: Some("eu-west-1".to_string()),
            },
            transfer(1024),
        )
        .await
        .unwrap();
        fs.mkdir().await.unwrap();
        assert_eq!(
            api.calls().last().unwrap(),
            &ApiCall::CreateBucket {
                bucket: "demo".to_string(),
                location_constraint: Some("eu-west-1".to_string()),
            }
        );

        let fresh = open(&api, "fresh", 1024).await;
        fresh.mkdir().await.unwrap();
        assert!(api.has_bucket("fresh").await);
    }

    #[tokio::test]
    async fn test_rmdir_in_sub_path_is_noop() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert("demo", "sub/file", &b"x"[..], Metadata::new(), t1()).await;
        let fs = open(&api, "demo/sub", 1024).await;
        api.clear_calls();
        fs.rmdir().await.unwrap();
        assert!(api.calls().is_empty());
        assert!(api.has_bucket("demo").await);

        let root = open(&api, "demo", 1024).await;
        let err = root.rmdir().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BucketNotEmpty));

        let empty = open(&api, "empty", 1024).await;
        api.insert_bucket("empty").await;
        empty.rmdir().await.unwrap();
        assert!(!api.has_bucket("empty").await);
    }

    #[tokio::test]
    async fn test_top_level_lists_buckets_not_objects() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert_bucket("one").await;
        api.insert_bucket("two").await;
        let fs = open(&api, "", 1024).await;
        assert_eq!(fs.to_string(), "S3 bucket ");

        let (dirs, status) = fs.list_dir().collect().await;
        assert!(status.is_complete());
        let names: Vec<_> = dirs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert!(dirs.iter().all(|d| d.bytes == -1 && d.count == -1));

        let (objects, status) = fs.list().collect().await;
        assert!(objects.is_empty());
        assert!(matches!(
            status,
            ListStatus::Truncated {
                error: Error::NoBucket,
                ..
            }
        ));
        assert!(matches!(fs.new_object("x").await, Err(Error::NoBucket)));
    }

    #[tokio::test]
    async fn test_server_side_copy_keeps_metadata() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert_bucket("demo").await;
        let fs = open(&api, "demo", 1024).await;
        let src = fs.put(reader(b"payload"), "src.txt", t1(), 7).await.unwrap();

        let copier = fs.as_copier().unwrap();
        let mut dst = copier.copy(&*src, "dst.txt").await.unwrap();
        assert_eq!(dst.remote(), "dst.txt");
        assert_eq!(dst.mod_time().await, t1());
        assert!(api.calls().iter().any(|c| matches!(
            c,
            ApiCall::CopyObject {
                directive: MetadataDirective::Copy,
                ..
            }
        )));
    }

    #[derive(Debug)]
    struct Foreign;

    impl fmt::Display for Foreign {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("foreign")
        }
    }

    impl RemoteObject for Foreign {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn remote(&self) -> &str {
            "foreign"
        }
        fn md5sum(&self) -> String {
            String::new()
        }
        fn size(&self) -> i64 {
            0
        }
        fn mod_time(&mut self) -> BoxFuture<'_, DateTime<Utc>> {
            Box::pin(async { Utc::now() })
        }
        fn set_mod_time(&mut self, _: DateTime<Utc>) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn storable(&self) -> bool {
            true
        }
        fn open(&self) -> BoxFuture<'_, Result<ObjectReader>> {
            Box::pin(async { Err(Error::Unsupported("open".to_string())) })
        }
        fn update(&mut self, _: ObjectReader, _: DateTime<Utc>, _: i64) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn remove(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_copy_from_other_backend_type_fails() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert_bucket("demo").await;
        let fs = open(&api, "demo", 1024).await;
        let err = fs
            .as_copier()
            .unwrap()
            .copy(&Foreign, "dst")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CantCopy));
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_no_parts() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert_bucket("demo").await;
        api.fail_upload_part(2);
        let fs = open(&api, "demo", 1024).await;
        let data = vec![1u8; crate::config::MIN_PART_SIZE + 1];
        assert!(fs.put(reader(&data), "big.bin", t1(), data.len() as i64).await.is_err());
        assert_eq!(api.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_credentials_select_access_mode() {
        let transfer = TransferConfig::default();
        let anonymous = RemoteConfig::default();
        let fs = S3Fs::new("anon", "demo", &anonymous, &transfer).await.unwrap();
        assert_eq!(fs.to_string(), "S3 bucket demo");

        let partial = RemoteConfig {
            access_key_id: "AKID".to_string(),
            ..Default::default()
        };
        let err = S3Fs::new("partial", "demo", &partial, &transfer).await.err().unwrap();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn test_display_and_root() {
        let api = Arc::new(MemoryObjectApi::new());
        api.insert_bucket("demo").await;
        let fs = open(&api, "demo/a/b/", 1024).await;
        assert_eq!(fs.to_string(), "S3 bucket demo path a/b/");
        assert_eq!(fs.root(), "demo/a/b");
        assert_eq!(fs.precision(), Duration::from_nanos(1));
    }
}
