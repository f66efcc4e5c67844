//! Filesystem-shaped view of a remote store.
//!
//! [`RemoteFs`] is what a sync engine drives: it lists objects and
//! directories, resolves and stores objects, and manages the container.
//! [`RemoteObject`] is one stored blob.  Backends that can copy
//! server-side also expose a [`Copier`].

pub mod limited;
pub mod listing;

pub use limited::Limited;
pub use listing::{ListSender, ListStatus, Listing};

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::Result;
use crate::storage::backend::ObjectReader;

/// Boxed future returned by the trait methods in this module.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A directory entry.
///
/// Directories have no identity in the store: they are derived from
/// common prefixes (or are buckets, at the top level) and recomputed on
/// every listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    pub name: String,
    /// Creation time, when the store reports one (buckets only).
    pub when: Option<DateTime<Utc>>,
    /// Aggregate size, `-1` when unknown.
    pub bytes: i64,
    /// Number of entries, `-1` when unknown.
    pub count: i64,
}

/// One stored object.
pub trait RemoteObject: Send + Sync + fmt::Display + fmt::Debug {
    /// Concrete type, for same-backend checks.
    fn as_any(&self) -> &dyn Any;

    /// Path relative to the remote's root.
    fn remote(&self) -> &str;

    /// Lower-case hex MD5 of the content, or empty when the store's
    /// fingerprint is not a plain MD5.
    fn md5sum(&self) -> String;

    /// Size in bytes.
    fn size(&self) -> i64;

    /// Modification time, fetching metadata if needed. Never fails:
    /// falls back to the store's timestamp, then to now.
    fn mod_time(&mut self) -> BoxFuture<'_, DateTime<Utc>>;

    /// Record a new modification time. Failures are logged and counted.
    fn set_mod_time(&mut self, mod_time: DateTime<Utc>) -> BoxFuture<'_, ()>;

    /// Whether the object can be stored locally.
    fn storable(&self) -> bool;

    /// Stream the whole object.
    fn open(&self) -> BoxFuture<'_, Result<ObjectReader>>;

    /// Replace the content, stamping `mod_time`. `size` is `-1` when unknown.
    fn update(
        &mut self,
        input: ObjectReader,
        mod_time: DateTime<Utc>,
        size: i64,
    ) -> BoxFuture<'_, Result<()>>;

    /// Delete the object.
    fn remove(&self) -> BoxFuture<'_, Result<()>>;
}

/// A remote filesystem rooted at some path.
pub trait RemoteFs: Send + Sync + fmt::Display {
    /// Remote name as configured.
    fn name(&self) -> &str;

    /// Root path as passed in, normalised.
    fn root(&self) -> String;

    /// Every object under the root.
    fn list(&self) -> Listing<Box<dyn RemoteObject>>;

    /// Directories directly under the root.
    fn list_dir(&self) -> Listing<Dir>;

    /// Resolve an existing object.
    fn new_object<'a>(&'a self, remote: &'a str) -> BoxFuture<'a, Result<Box<dyn RemoteObject>>>;

    /// Store a new object.
    fn put<'a>(
        &'a self,
        input: ObjectReader,
        remote: &'a str,
        mod_time: DateTime<Utc>,
        size: i64,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteObject>>>;

    /// Create the container if needed.
    fn mkdir(&self) -> BoxFuture<'_, Result<()>>;

    /// Remove the container if it is empty.
    fn rmdir(&self) -> BoxFuture<'_, Result<()>>;

    /// Granularity of stored modification times.
    fn precision(&self) -> Duration;

    /// Server-side copy, when supported.
    fn as_copier(&self) -> Option<&dyn Copier> {
        None
    }
}

/// Server-side copy into a remote.
pub trait Copier: Send + Sync {
    /// Copy `src` to `remote` without moving the data through the client.
    ///
    /// Fails with [`crate::errors::Error::CantCopy`] when `src` belongs to
    /// another kind of backend, so the caller can fall back to
    /// download-and-upload.
    fn copy<'a>(
        &'a self,
        src: &'a dyn RemoteObject,
        remote: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteObject>>>;
}
