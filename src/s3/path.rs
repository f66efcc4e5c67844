//! Remote path resolution.

use crate::errors::{Error, Result};

/// Split `bucket[/key-prefix]` into the bucket and the prefix with
/// surrounding slashes trimmed.
///
/// An empty path addresses the top level (no bucket).  A path with an
/// empty bucket segment but a non-empty remainder, like `/foo`, cannot
/// be resolved.
pub fn parse_path(path: &str) -> Result<(String, String)> {
    let (bucket, directory) = match path.find('/') {
        Some(idx) => (&path[..idx], &path[idx..]),
        None => (path, ""),
    };
    let directory = directory.trim_matches('/');
    if bucket.is_empty() && !directory.is_empty() {
        return Err(Error::Parse(path.to_string()));
    }
    Ok((bucket.to_string(), directory.to_string()))
}

/// Root prefix for a trimmed directory: empty, or ending with `/`.
pub fn root_prefix(directory: &str) -> String {
    if directory.is_empty() {
        String::new()
    } else {
        format!("{directory}/")
    }
}

/// Split a key into its parent's root prefix and its last segment.
pub fn split_leaf(key: &str) -> (String, &str) {
    match key.rfind('/') {
        Some(idx) => (root_prefix(&key[..idx]), &key[idx + 1..]),
        None => (String::new(), key),
    }
}
