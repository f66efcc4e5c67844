//! Configuration loading and types for s3remote.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  `remotes` holds one section per named remote;
//! `transfer` tunes listing, upload and retry behaviour shared by all of
//! them.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Smallest part size the provider accepts for non-final parts.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Listing / upload / retry tuning.
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Named remotes, keyed by the name used in `name:bucket/path`.
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
}

impl Config {
    /// Look up a remote section by name.
    pub fn remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.get(name)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Transfer tuning shared by every remote.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Capacity of listing channels (parallelism hint of the consumer).
    #[serde(default = "default_checkers")]
    pub checkers: usize,

    /// Number of keys requested per list page.
    #[serde(default = "default_list_chunk_size")]
    pub list_chunk_size: u32,

    /// Parallel part uploads within a single upload.
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Bytes per multipart part.
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Maximum attempts for a request hitting transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            checkers: default_checkers(),
            list_chunk_size: default_list_chunk_size(),
            upload_concurrency: default_upload_concurrency(),
            part_size: default_part_size(),
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// One remote section.
///
/// Field names match the option catalogue published by the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Backend type: `s3`, or `memory` for an in-process dry-run store.
    #[serde(rename = "type", default = "default_remote_type")]
    pub backend: String,

    /// Access key ID; empty together with the secret means anonymous access.
    #[serde(default)]
    pub access_key_id: String,

    /// Secret access key; empty together with the key ID means anonymous access.
    #[serde(default)]
    pub secret_access_key: String,

    /// Region, or one of the `other-v2-signature` / `other-v4-signature` sentinels.
    #[serde(default)]
    pub region: String,

    /// Endpoint override for S3 clones and non-default regions.
    #[serde(default)]
    pub endpoint: String,

    /// Location constraint used only when creating buckets.
    #[serde(default)]
    pub location_constraint: String,

    /// Canned ACL applied to new buckets and objects; empty omits the header.
    #[serde(default)]
    pub acl: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: default_remote_type(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: String::new(),
            endpoint: String::new(),
            location_constraint: String::new(),
            acl: String::new(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_remote_type() -> String {
    "s3".to_string()
}

fn default_checkers() -> usize {
    8
}

fn default_list_chunk_size() -> u32 {
    1024
}

fn default_upload_concurrency() -> usize {
    2
}

fn default_part_size() -> usize {
    MIN_PART_SIZE
}

fn default_max_retries() -> u32 {
    10
}

fn default_timeout_seconds() -> u64 {
    300
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.transfer.part_size < MIN_PART_SIZE {
        anyhow::bail!(
            "transfer.part_size must be at least {MIN_PART_SIZE} bytes, got {}",
            config.transfer.part_size
        );
    }
    if config.transfer.checkers == 0 || config.transfer.list_chunk_size == 0 {
        anyhow::bail!("transfer.checkers and transfer.list_chunk_size must be non-zero");
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
        assert_eq!(config.transfer.checkers, 8);
        assert_eq!(config.transfer.list_chunk_size, 1024);
        assert_eq!(config.transfer.upload_concurrency, 2);
        assert_eq!(config.transfer.part_size, MIN_PART_SIZE);
        assert_eq!(config.transfer.max_retries, 10);
        assert!(config.remotes.is_empty());
    }

    #[test]
    fn test_remote_section() {
        let yaml = r#"
remotes:
  ceph:
    type: s3
    access_key_id: AKID
    secret_access_key: SECRET
    region: other-v2-signature
    endpoint: http://ceph.local:7480
  public:
    region: eu-west-1
"#;
        let config = parse_config(yaml).unwrap();
        let ceph = config.remote("ceph").unwrap();
        assert_eq!(ceph.backend, "s3");
        assert_eq!(ceph.access_key_id, "AKID");
        assert_eq!(ceph.region, "other-v2-signature");
        assert_eq!(ceph.endpoint, "http://ceph.local:7480");
        assert_eq!(ceph.location_constraint, "");

        let public = config.remote("public").unwrap();
        assert_eq!(public.backend, "s3");
        assert!(public.access_key_id.is_empty());
        assert!(public.secret_access_key.is_empty());
        assert!(config.remote("missing").is_none());
    }

    #[test]
    fn test_part_size_too_small_rejected() {
        let err = parse_config("transfer:\n  part_size: 1024\n").unwrap_err();
        assert!(err.to_string().contains("part_size"));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(parse_config("transfer:\n  list_chunk_size: 0\n").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  level: debug\n  format: json").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/s3remote.yaml").is_err());
    }
}
