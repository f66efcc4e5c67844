//! Single-object view of a remote.
//!
//! Used when the path given for a remote names an existing object rather
//! than a directory: the view is rooted at the object's parent and only
//! ever exposes that one object.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use super::{BoxFuture, Copier, Dir, ListStatus, Listing, RemoteFs, RemoteObject};
use crate::errors::{Error, Result};
use crate::metrics;
use crate::storage::backend::ObjectReader;

/// A [`RemoteFs`] restricted to one object.
pub struct Limited {
    fs: Arc<dyn RemoteFs>,
    remote: String,
}

impl Limited {
    /// Restrict `fs` to the object at `remote`.
    pub fn new(fs: Arc<dyn RemoteFs>, remote: impl Into<String>) -> Self {
        Self {
            fs,
            remote: remote.into(),
        }
    }
}

impl fmt::Display for Limited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} limited to {}", self.fs, self.remote)
    }
}

impl RemoteFs for Limited {
    fn name(&self) -> &str {
        self.fs.name()
    }

    fn root(&self) -> String {
        self.fs.root()
    }

    fn list(&self) -> Listing<Box<dyn RemoteObject>> {
        let fs = self.fs.clone();
        let remote = self.remote.clone();
        Listing::spawn(1, move |tx| async move {
            match fs.new_object(&remote).await {
                Ok(object) => {
                    if tx.send(object).await {
                        ListStatus::Complete
                    } else {
                        ListStatus::Cancelled
                    }
                }
                Err(err) => {
                    metrics::record_error("list");
                    error!("{}: couldn't read {}: {}", fs, remote, err);
                    ListStatus::Truncated {
                        error: err,
                        resume_marker: None,
                    }
                }
            }
        })
    }

    fn list_dir(&self) -> Listing<Dir> {
        Listing::from_items(Vec::new())
    }

    fn new_object<'a>(&'a self, remote: &'a str) -> BoxFuture<'a, Result<Box<dyn RemoteObject>>> {
        if remote == self.remote {
            return self.fs.new_object(remote);
        }
        Box::pin(async move { Err(Error::NotFound(remote.to_string())) })
    }

    fn put<'a>(
        &'a self,
        input: ObjectReader,
        remote: &'a str,
        mod_time: DateTime<Utc>,
        size: i64,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteObject>>> {
        if remote == self.remote {
            return self.fs.put(input, remote, mod_time, size);
        }
        Box::pin(async move {
            Err(Error::Unsupported(format!(
                "can't put {remote:?}: remote is limited to {:?}",
                self.remote
            )))
        })
    }

    fn mkdir(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn rmdir(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async {
            Err(Error::Unsupported(
                "can't rmdir a remote limited to one object".to_string(),
            ))
        })
    }

    fn precision(&self) -> Duration {
        self.fs.precision()
    }

    fn as_copier(&self) -> Option<&dyn Copier> {
        self.fs.as_copier().map(|_| self as &dyn Copier)
    }
}

impl Copier for Limited {
    fn copy<'a>(
        &'a self,
        src: &'a dyn RemoteObject,
        remote: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteObject>>> {
        match self.fs.as_copier() {
            Some(copier) => copier.copy(src, remote),
            None => Box::pin(async { Err(Error::CantCopy) }),
        }
    }
}
