//! Chunked upload.
//!
//! Bodies that fit in one part go up with a single PutObject.  Anything
//! larger becomes a multipart upload with a few parts in flight at once;
//! if any step fails the upload is aborted so no parts are left behind.

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::MIN_PART_SIZE;
use crate::errors::{Error, Result};
use crate::metrics;
use crate::storage::backend::{
    CompletedPart, CreateMultipartRequest, ObjectApi, ObjectReader, PutObjectRequest,
};

/// Uploads one object body through an [`ObjectApi`].
pub struct Uploader {
    api: Arc<dyn ObjectApi>,
    part_size: usize,
    concurrency: usize,
}

impl Uploader {
    pub fn new(api: Arc<dyn ObjectApi>, part_size: usize, concurrency: usize) -> Self {
        Self {
            api,
            part_size: part_size.max(MIN_PART_SIZE),
            concurrency: concurrency.max(1),
        }
    }

    /// Store `body` as described by `input`.
    pub async fn upload(&self, input: CreateMultipartRequest, mut body: ObjectReader) -> Result<()> {
        let first = read_chunk(&mut body, self.part_size).await?;
        if first.len() < self.part_size {
            let size = first.len() as u64;
            debug!(
                "single put: bucket={} key={} size={}",
                input.bucket, input.key, size
            );
            self.api
                .put_object(PutObjectRequest {
                    bucket: input.bucket,
                    key: input.key,
                    body: first,
                    content_type: input.content_type,
                    acl: input.acl,
                    metadata: input.metadata,
                })
                .await?;
            metrics::record_bytes_uploaded(size);
            return Ok(());
        }

        let bucket = input.bucket.clone();
        let key = input.key.clone();
        let upload_id = self.api.create_multipart_upload(input).await?;
        debug!(
            "multipart upload started: bucket={} key={} upload_id={}",
            bucket, key, upload_id
        );

        let result = match self.upload_parts(&bucket, &key, &upload_id, first, body).await {
            Ok((parts, size)) => self
                .api
                .complete_multipart_upload(&bucket, &key, &upload_id, parts)
                .await
                .map(|()| size),
            Err(e) => Err(e),
        };
        match result {
            Ok(size) => {
                metrics::record_bytes_uploaded(size);
                Ok(())
            }
            Err(e) => Err(self.abort(&bucket, &key, &upload_id, e).await),
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        first: Bytes,
        mut body: ObjectReader,
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let mut tasks: JoinSet<Result<CompletedPart>> = JoinSet::new();
        let mut parts = Vec::new();
        let mut size = 0u64;
        let mut part_number = 0i32;
        let mut chunk = first;

        loop {
            if !chunk.is_empty() {
                part_number += 1;
                size += chunk.len() as u64;
                let api = self.api.clone();
                let (bucket, key, upload_id) =
                    (bucket.to_string(), key.to_string(), upload_id.to_string());
                let number = part_number;
                let data = chunk;
                tasks.spawn(async move {
                    let etag = api
                        .upload_part(&bucket, &key, &upload_id, number, data)
                        .await?;
                    Ok(CompletedPart {
                        part_number: number,
                        etag,
                    })
                });
                while tasks.len() >= self.concurrency {
                    parts.push(join_part(&mut tasks).await?);
                }
            }
            chunk = read_chunk(&mut body, self.part_size).await?;
            if chunk.is_empty() {
                break;
            }
        }
        while !tasks.is_empty() {
            parts.push(join_part(&mut tasks).await?);
        }

        parts.sort_by_key(|p| p.part_number);
        Ok((parts, size))
    }

    async fn abort(&self, bucket: &str, key: &str, upload_id: &str, err: Error) -> Error {
        warn!("Aborting multipart upload {} due to error: {}", upload_id, err);
        if let Err(abort_err) = self
            .api
            .abort_multipart_upload(bucket, key, upload_id)
            .await
        {
            warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
        }
        err
    }
}

/// Wait for the next part; a failed or panicked part fails the upload.
async fn join_part(tasks: &mut JoinSet<Result<CompletedPart>>) -> Result<CompletedPart> {
    match tasks.join_next().await {
        Some(Ok(part)) => part,
        Some(Err(join_err)) => Err(Error::Io(std::io::Error::other(join_err.to_string()))),
        None => Err(Error::Io(std::io::Error::other("no part upload in flight"))),
    }
}

/// Read up to `limit` bytes, short only at end of input.
async fn read_chunk(body: &mut ObjectReader, limit: usize) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(limit.min(MIN_PART_SIZE));
    (&mut *body).take(limit as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}
