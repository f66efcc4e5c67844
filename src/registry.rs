//! Backend registry.
//!
//! A [`Registry`] is an explicit table of backend factories, built once at
//! startup and passed to whatever needs to open remotes.  Each entry
//! publishes the options its configuration section understands.

use std::sync::Arc;

use crate::config::{Config, RemoteConfig, TransferConfig};
use crate::errors::{Error, Result};
use crate::remote::{BoxFuture, RemoteFs};
use crate::s3::{S3Fs, S3Options};
use crate::storage::memory;

/// Factory for one backend type.
pub type NewFs = for<'a> fn(
    &'a str,
    &'a str,
    &'a RemoteConfig,
    &'a TransferConfig,
) -> BoxFuture<'a, Result<Arc<dyn RemoteFs>>>;

/// A suggested value for an option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionExample {
    pub value: &'static str,
    pub help: &'static str,
}

/// One configuration option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionInfo {
    pub name: &'static str,
    pub help: &'static str,
    pub examples: Vec<OptionExample>,
}

/// A registered backend.
#[derive(Clone)]
pub struct RegInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub options: Vec<OptionInfo>,
    pub new_fs: NewFs,
}

impl std::fmt::Debug for RegInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegInfo")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("options", &self.options)
            .finish()
    }
}

/// Table of available backends.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    backends: Vec<RegInfo>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every backend compiled into the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(s3_info());
        registry.register(memory_info());
        registry
    }

    /// Add a backend. A later entry with the same name replaces the earlier one.
    pub fn register(&mut self, info: RegInfo) {
        self.backends.retain(|b| b.name != info.name);
        self.backends.push(info);
    }

    pub fn find(&self, name: &str) -> Option<&RegInfo> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn backends(&self) -> &[RegInfo] {
        &self.backends
    }

    /// Open `remote:path` using the named section of `config`.
    pub async fn new_fs(&self, config: &Config, location: &str) -> Result<Arc<dyn RemoteFs>> {
        let (name, path) = split_remote(location)?;
        let section = config
            .remote(name)
            .ok_or_else(|| Error::Config(format!("remote {name:?} not found in config")))?;
        let info = self.find(&section.backend).ok_or_else(|| {
            Error::Config(format!(
                "remote {name:?} has unknown type {:?}",
                section.backend
            ))
        })?;
        (info.new_fs)(name, path, section, &config.transfer).await
    }
}

/// Split `name:path` at the first colon.
pub fn split_remote(location: &str) -> Result<(&str, &str)> {
    match location.split_once(':') {
        Some((name, path)) if !name.is_empty() => Ok((name, path)),
        _ => Err(Error::Config(format!(
            "{location:?} is not of the form remote:path"
        ))),
    }
}

fn new_s3_fs<'a>(
    name: &'a str,
    path: &'a str,
    remote: &'a RemoteConfig,
    transfer: &'a TransferConfig,
) -> BoxFuture<'a, Result<Arc<dyn RemoteFs>>> {
    Box::pin(S3Fs::new(name, path, remote, transfer))
}

fn new_memory_fs<'a>(
    name: &'a str,
    path: &'a str,
    remote: &'a RemoteConfig,
    transfer: &'a TransferConfig,
) -> BoxFuture<'a, Result<Arc<dyn RemoteFs>>> {
    Box::pin(S3Fs::with_api(
        name,
        path,
        memory::shared(name),
        S3Options::from_config(remote),
        transfer.clone(),
    ))
}

fn memory_info() -> RegInfo {
    RegInfo {
        name: "memory",
        description: "In-process object store for dry runs, emptied when the process exits",
        new_fs: new_memory_fs,
        options: Vec::new(),
    }
}

fn example(value: &'static str, help: &'static str) -> OptionExample {
    OptionExample { value, help }
}

fn s3_info() -> RegInfo {
    RegInfo {
        name: "s3",
        description: "Amazon S3 and compatible object stores",
        new_fs: new_s3_fs,
        options: vec![
            OptionInfo {
                name: "access_key_id",
                help: "Access key ID - leave blank for anonymous access.",
                examples: Vec::new(),
            },
            OptionInfo {
                name: "secret_access_key",
                help: "Secret access key - leave blank for anonymous access.",
                examples: Vec::new(),
            },
            OptionInfo {
                name: "region",
                help: "Region to connect to.",
                examples: vec![
                    example(
                        "us-east-1",
                        "The default endpoint. US Region, Northern Virginia. Leave location constraint empty.",
                    ),
                    example("us-west-2", "US West (Oregon). Needs location constraint us-west-2."),
                    example("us-west-1", "US West (Northern California). Needs location constraint us-west-1."),
                    example("eu-west-1", "EU (Ireland). Needs location constraint EU or eu-west-1."),
                    example("eu-central-1", "EU (Frankfurt). Needs location constraint eu-central-1."),
                    example("ap-southeast-1", "Asia Pacific (Singapore). Needs location constraint ap-southeast-1."),
                    example("ap-southeast-2", "Asia Pacific (Sydney). Needs location constraint ap-southeast-2."),
                    example("ap-northeast-1", "Asia Pacific (Tokyo). Needs location constraint ap-northeast-1."),
                    example("sa-east-1", "South America (Sao Paulo). Needs location constraint sa-east-1."),
                    example(
                        crate::auth::REGION_V2_SIGNATURE,
                        "An S3 clone that only understands v2 signatures, eg Ceph. Set the endpoint too.",
                    ),
                    example(
                        crate::auth::REGION_V4_SIGNATURE,
                        "An S3 clone that understands v4 signatures. Set the endpoint too.",
                    ),
                ],
            },
            OptionInfo {
                name: "endpoint",
                help: "Endpoint for the S3 API. Leave blank for the provider default; required for S3 clones.",
                examples: Vec::new(),
            },
            OptionInfo {
                name: "location_constraint",
                help: "Location constraint, must match the region. Used when creating buckets only.",
                examples: vec![
                    example("", "Empty for US Region, Northern Virginia."),
                    example("us-west-2", "US West (Oregon)."),
                    example("us-west-1", "US West (Northern California)."),
                    example("eu-west-1", "EU (Ireland)."),
                    example("EU", "EU Region."),
                    example("ap-southeast-1", "Asia Pacific (Singapore)."),
                    example("ap-southeast-2", "Asia Pacific (Sydney)."),
                    example("ap-northeast-1", "Asia Pacific (Tokyo)."),
                    example("sa-east-1", "South America (Sao Paulo)."),
                ],
            },
            OptionInfo {
                name: "acl",
                help: "Canned ACL for new buckets and objects, eg private or public-read. Leave blank to omit.",
                examples: Vec::new(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::storage::backend::ObjectReader;
    use chrono::Utc;

    const CONFIG: &str = r#"
remotes:
  anon:
    type: s3
  odd:
    type: ftp
  scratch:
    type: memory
"#;

    #[test]
    fn test_builtin_has_s3_with_signing_sentinels() {
        let registry = Registry::with_builtin();
        let info = registry.find("s3").unwrap();
        let region = info.options.iter().find(|o| o.name == "region").unwrap();
        let values: Vec<_> = region.examples.iter().map(|e| e.value).collect();
        assert!(values.contains(&"other-v2-signature"));
        assert!(values.contains(&"other-v4-signature"));
        let names: Vec<_> = info.options.iter().map(|o| o.name).collect();
        assert_eq!(
            names,
            vec![
                "access_key_id",
                "secret_access_key",
                "region",
                "endpoint",
                "location_constraint",
                "acl"
            ]
        );
        assert!(registry.find("ftp").is_none());
        assert!(registry.find("memory").unwrap().options.is_empty());
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut registry = Registry::with_builtin();
        let mut info = registry.find("s3").unwrap().clone();
        info.description = "replacement";
        registry.register(info);
        assert_eq!(registry.backends().len(), 2);
        assert_eq!(registry.find("s3").unwrap().description, "replacement");
    }

    #[test]
    fn test_split_remote() {
        assert_eq!(split_remote("anon:demo/a").unwrap(), ("anon", "demo/a"));
        assert_eq!(split_remote("anon:").unwrap(), ("anon", ""));
        assert!(split_remote("no-colon").is_err());
        assert!(split_remote(":demo").is_err());
    }

    #[tokio::test]
    async fn test_new_fs_resolves_remote() {
        let config = parse_config(CONFIG).unwrap();
        let registry = Registry::with_builtin();
        let fs = registry.new_fs(&config, "anon:demo").await.unwrap();
        assert_eq!(fs.name(), "anon");
        assert_eq!(fs.root(), "demo");
    }

    #[tokio::test]
    async fn test_new_fs_rejects_unknown_remote_and_type() {
        let config = parse_config(CONFIG).unwrap();
        let registry = Registry::with_builtin();
        let err = registry.new_fs(&config, "missing:demo").await.err().unwrap();
        assert!(matches!(err, Error::Config(_)));
        let err = registry.new_fs(&config, "odd:demo").await.err().unwrap();
        assert!(matches!(err, Error::Config(ref m) if m.contains("ftp")));
    }

    #[tokio::test]
    async fn test_memory_remote_shares_one_store() {
        let config = parse_config(CONFIG).unwrap();
        let registry = Registry::with_builtin();
        registry
            .new_fs(&config, "scratch:dry")
            .await
            .unwrap()
            .mkdir()
            .await
            .unwrap();
        let fs = registry.new_fs(&config, "scratch:dry/dir").await.unwrap();
        let input: ObjectReader = Box::pin(std::io::Cursor::new(b"hello".to_vec()));
        fs.put(input, "a.txt", Utc::now(), 5).await.unwrap();

        let reopened = registry.new_fs(&config, "scratch:dry").await.unwrap();
        let (objects, status) = reopened.list().collect().await;
        assert!(status.is_complete());
        let names: Vec<_> = objects.iter().map(|o| o.remote().to_string()).collect();
        assert_eq!(names, vec!["dir/a.txt"]);
        assert!(memory::shared("scratch").has_bucket("dry").await);
    }
}
