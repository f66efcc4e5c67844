//! Connection and auth setup.
//!
//! Turns one remote section into a resolved endpoint plus a
//! [`RequestSigner`].  Runs once, when the adapter is built; any failure
//! here stops construction.

use reqwest::Url;
use tracing::info;

use crate::auth::{Credentials, RequestSigner, SigningScheme, DEFAULT_REGION};
use crate::config::{RemoteConfig, TransferConfig};
use crate::errors::{Error, Result};
use crate::storage::http::HttpObjectApi;

/// Endpoint used when neither region nor endpoint is configured.
pub const DEFAULT_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Resolved connection parameters for one remote.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Base URL, no trailing slash.
    pub endpoint: String,
    /// Region placed in V4 credential scopes.
    pub region: String,
    pub signer: RequestSigner,
}

impl Connection {
    /// Resolve credentials, region, endpoint and signing scheme.
    ///
    /// - both credential fields empty selects anonymous access, exactly
    ///   one empty is an [`Error::Auth`]
    /// - `other-v2-signature` / `other-v4-signature` select V2 / explicit
    ///   V4 signing and need an endpoint
    /// - no region and no endpoint uses the standard endpoint and
    ///   `us-east-1`; a region without an endpoint uses that region's
    ///   standard endpoint
    pub fn resolve(remote: &RemoteConfig) -> Result<Self> {
        let credentials = Credentials::from_pair(&remote.access_key_id, &remote.secret_access_key)?;
        let scheme = SigningScheme::for_region(&remote.region);

        let (endpoint, region) = match scheme {
            SigningScheme::V2 | SigningScheme::V4 => {
                if remote.endpoint.is_empty() {
                    return Err(Error::Connection(format!(
                        "endpoint must be set when region is {:?}",
                        remote.region
                    )));
                }
                (remote.endpoint.clone(), DEFAULT_REGION.to_string())
            }
            SigningScheme::Default => {
                let region = if remote.region.is_empty() {
                    DEFAULT_REGION.to_string()
                } else {
                    remote.region.clone()
                };
                let endpoint = if !remote.endpoint.is_empty() {
                    remote.endpoint.clone()
                } else if remote.region.is_empty() {
                    DEFAULT_ENDPOINT.to_string()
                } else {
                    format!("https://s3.{region}.amazonaws.com")
                };
                (endpoint, region)
            }
        };

        let endpoint = validate_endpoint(&endpoint)?;

        info!(
            "S3 connection: endpoint={} region={} signing={:?} anonymous={}",
            endpoint,
            region,
            scheme,
            credentials.is_anonymous()
        );

        Ok(Self {
            endpoint,
            signer: RequestSigner::new(credentials, scheme, region.clone()),
            region,
        })
    }
}

/// Resolve `remote` and build the HTTP transport for it.
pub fn connect(remote: &RemoteConfig, transfer: &TransferConfig) -> Result<HttpObjectApi> {
    let connection = Connection::resolve(remote)?;
    HttpObjectApi::new(connection, transfer)
}

fn validate_endpoint(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| Error::Connection(format!("invalid endpoint {endpoint:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::Connection(format!(
            "invalid endpoint {endpoint:?}: need an http or https URL with a host"
        )));
    }
    Ok(endpoint.trim_end_matches('/').to_string())
}
