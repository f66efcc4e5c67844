//! Request signing for outgoing provider requests.
//!
//! Three modes, chosen once when the connection is built:
//! - AWS Signature Version 4 (`Authorization: AWS4-HMAC-SHA256 ...`), the
//!   provider default and the explicit `other-v4-signature` mode
//! - legacy Signature Version 2 (`Authorization: AWS key:signature`) for
//!   S3 clones that only understand it
//! - anonymous, when no credentials are configured
//!
//! The SigV4 algorithm:
//! 1. Build a canonical request
//! 2. Build a string-to-sign
//! 3. Derive a signing key via HMAC chain
//! 4. Compute the signature

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Region value selecting legacy V2 signing.
pub const REGION_V2_SIGNATURE: &str = "other-v2-signature";

/// Region value selecting explicit V4 signing against a custom endpoint.
pub const REGION_V4_SIGNATURE: &str = "other-v4-signature";

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// SHA-256 of the empty string.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Query parameters that are part of the V2 canonical resource.
const V2_SUB_RESOURCES: &[&str] = &[
    "acl",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

// ── Credentials ─────────────────────────────────────────────────────

/// Credentials used to sign requests.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// No signature is attached.
    Anonymous,
    /// Static access key pair.
    Static {
        access_key_id: String,
        secret_access_key: String,
    },
}

impl Credentials {
    /// Select the credential mode from the configured key pair.
    ///
    /// Both empty means anonymous access; exactly one empty is an error.
    pub fn from_pair(access_key_id: &str, secret_access_key: &str) -> Result<Self> {
        match (access_key_id.is_empty(), secret_access_key.is_empty()) {
            (true, true) => Ok(Credentials::Anonymous),
            (true, false) => Err(Error::Auth("access_key_id not found".to_string())),
            (false, true) => Err(Error::Auth("secret_access_key not found".to_string())),
            (false, false) => Ok(Credentials::Static {
                access_key_id: access_key_id.to_string(),
                secret_access_key: secret_access_key.to_string(),
            }),
        }
    }

    /// True when no credentials are configured.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credentials::Anonymous)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
        }
    }
}

/// Signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningScheme {
    /// The provider's standard signing (SigV4 for the configured region).
    Default,
    /// Legacy Signature Version 2.
    V2,
    /// Explicit Signature Version 4 for S3 clones.
    V4,
}

impl SigningScheme {
    /// Pick the scheme implied by a configured region value.
    pub fn for_region(region: &str) -> Self {
        match region {
            REGION_V2_SIGNATURE => SigningScheme::V2,
            REGION_V4_SIGNATURE => SigningScheme::V4,
            _ => SigningScheme::Default,
        }
    }
}

// ── Request signer ──────────────────────────────────────────────────

/// A request about to be sent, in the shape the signer needs.
///
/// `headers` are `(lowercase-name, value)` pairs and must include `host`.
/// The signer appends the headers it computes (`x-amz-date`,
/// `authorization`, ...).
pub struct SignableRequest<'a> {
    /// HTTP method.
    pub method: &'a str,
    /// URI-encoded absolute path, e.g. `/bucket/some%20key`.
    pub path: &'a str,
    /// Decoded query parameters.
    pub query: &'a [(String, String)],
    /// Headers to sign; the signer appends to this list.
    pub headers: &'a mut Vec<(String, String)>,
    /// Request body.
    pub payload: &'a [u8],
}

/// Signs outgoing requests according to the selected scheme.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Credentials,
    scheme: SigningScheme,
    region: String,
}

impl RequestSigner {
    /// Create a signer. `region` is the region placed in the V4 credential scope.
    pub fn new(credentials: Credentials, scheme: SigningScheme, region: impl Into<String>) -> Self {
        Self {
            credentials,
            scheme,
            region: region.into(),
        }
    }

    /// The selected scheme.
    pub fn scheme(&self) -> SigningScheme {
        self.scheme
    }

    /// The region used in V4 credential scopes.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// True when requests go out unsigned.
    pub fn is_anonymous(&self) -> bool {
        self.credentials.is_anonymous()
    }

    /// Sign `req` as of `now`.
    pub fn sign(&self, req: SignableRequest<'_>, now: DateTime<Utc>) {
        let (access_key_id, secret_access_key) = match &self.credentials {
            Credentials::Anonymous => return,
            Credentials::Static {
                access_key_id,
                secret_access_key,
            } => (access_key_id.as_str(), secret_access_key.as_str()),
        };
        match self.scheme {
            SigningScheme::V2 => sign_v2_request(req, access_key_id, secret_access_key, now),
            SigningScheme::Default | SigningScheme::V4 => {
                sign_v4_request(req, access_key_id, secret_access_key, &self.region, now)
            }
        }
    }
}

fn sign_v4_request(
    req: SignableRequest<'_>,
    access_key_id: &str,
    secret_access_key: &str,
    region: &str,
    now: DateTime<Utc>,
) {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = if req.payload.is_empty() {
        EMPTY_SHA256.to_string()
    } else {
        hex::encode(Sha256::digest(req.payload))
    };

    req.headers.push(("x-amz-date".to_string(), amz_date.clone()));
    req.headers
        .push(("x-amz-content-sha256".to_string(), payload_hash.clone()));

    let mut signed_names: Vec<&str> = req.headers.iter().map(|(n, _)| n.as_str()).collect();
    signed_names.sort_unstable();
    signed_names.dedup();
    let signed_headers = signed_names.join(";");

    let canonical_request = build_canonical_request(
        req.method,
        req.path,
        &canonical_query_string(req.query),
        req.headers,
        &signed_headers,
        &payload_hash,
    );
    let credential_scope = format!("{date_stamp}/{region}/s3/aws4_request");
    let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_request);
    let signing_key = derive_signing_key(secret_access_key, &date_stamp, region, "s3");
    let signature = compute_signature(&signing_key, &string_to_sign);

    req.headers.push((
        "authorization".to_string(),
        format!(
            "AWS4-HMAC-SHA256 Credential={access_key_id}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}"
        ),
    ));
}

fn sign_v2_request(
    req: SignableRequest<'_>,
    access_key_id: &str,
    secret_access_key: &str,
    now: DateTime<Utc>,
) {
    let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    req.headers.push(("date".to_string(), date));

    let resource = canonical_resource_v2(req.path, req.query);
    let string_to_sign = build_string_to_sign_v2(req.method, req.headers, &resource);
    let signature = compute_signature_v2(secret_access_key, &string_to_sign);

    req.headers.push((
        "authorization".to_string(),
        format!("AWS {access_key_id}:{signature}"),
    ));
}

// ── Canonical request construction (V4) ─────────────────────────────

/// Build the canonical request string.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString + '\n' +
/// CanonicalHeaders + '\n' +
/// SignedHeaders + '\n' +
/// HashedPayload
/// ```
pub fn build_canonical_request(
    method: &str,
    uri: &str,
    canonical_query: &str,
    headers: &[(String, String)],
    signed_headers_str: &str,
    payload_hash: &str,
) -> String {
    // S3 signs the path exactly as sent, without normalization.
    let canonical_uri = if uri.is_empty() { "/" } else { uri };

    let mut canonical_headers = String::new();
    for name in signed_headers_str.split(';') {
        let values: Vec<String> = headers
            .iter()
            .filter(|(hname, _)| hname == name)
            .map(|(_, hval)| collapse_whitespace(hval))
            .collect();
        if values.is_empty() {
            continue;
        }
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(&values.join(","));
        canonical_headers.push('\n');
    }

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers_str}\n{payload_hash}"
    )
}

/// Build the canonical query string from decoded parameters.
///
/// Parameters are URI-encoded, sorted by name then value, and joined
/// with `&`.  Parameters with no value render as `name=`.  The same
/// string is used on the wire so the signed and sent forms match.
pub fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (s3_uri_encode(k, true), s3_uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("AWS4-HMAC-SHA256\n{timestamp}\n{credential_scope}\n{hash}")
}

/// Derive the signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, "s3")
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Compute HMAC-SHA256.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute the signature: HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

// ── Legacy signing (V2) ─────────────────────────────────────────────

/// Build the V2 canonical resource: the request path plus any
/// sub-resource query parameters, sorted, values unencoded.
pub fn canonical_resource_v2(path: &str, query: &[(String, String)]) -> String {
    let mut sub: Vec<&(String, String)> = query
        .iter()
        .filter(|(k, _)| V2_SUB_RESOURCES.contains(&k.as_str()) || k.starts_with("response-"))
        .collect();
    sub.sort();

    let mut resource = if path.is_empty() { "/".to_string() } else { path.to_string() };
    for (i, (k, v)) in sub.iter().enumerate() {
        resource.push(if i == 0 { '?' } else { '&' });
        resource.push_str(k);
        if !v.is_empty() {
            resource.push('=');
            resource.push_str(v);
        }
    }
    resource
}

/// Build the V2 string to sign.
///
/// ```text
/// HTTP-Verb + '\n' +
/// Content-MD5 + '\n' +
/// Content-Type + '\n' +
/// Date + '\n' +
/// CanonicalizedAmzHeaders +
/// CanonicalizedResource
/// ```
pub fn build_string_to_sign_v2(method: &str, headers: &[(String, String)], resource: &str) -> String {
    let content_md5 = find_header_value(headers, "content-md5").unwrap_or_default();
    let content_type = find_header_value(headers, "content-type").unwrap_or_default();
    // x-amz-date, when present, takes the place of Date.
    let date = if find_header_value(headers, "x-amz-date").is_some() {
        ""
    } else {
        find_header_value(headers, "date").unwrap_or_default()
    };

    let mut amz: Vec<(&str, String)> = headers
        .iter()
        .filter(|(n, _)| n.starts_with("x-amz-"))
        .map(|(n, v)| (n.as_str(), collapse_whitespace(v)))
        .collect();
    amz.sort();

    let mut canonical_amz = String::new();
    for (name, value) in amz {
        canonical_amz.push_str(name);
        canonical_amz.push(':');
        canonical_amz.push_str(&value);
        canonical_amz.push('\n');
    }

    format!("{method}\n{content_md5}\n{content_type}\n{date}\n{canonical_amz}{resource}")
}

/// Compute the V2 signature: Base64(HMAC-SHA1(secret, StringToSign)).
pub fn compute_signature_v2(secret_key: &str, string_to_sign: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

// ── URI encoding ────────────────────────────────────────────────────

/// S3-compatible URI encoding (RFC 3986 with S3 exceptions).
///
/// - Characters A-Z, a-z, 0-9, -, _, ., ~ are NOT encoded.
/// - All other characters are percent-encoded with uppercase hex.
/// - If `encode_slash` is false, `/` is NOT encoded (for URI paths).
/// - If `encode_slash` is true, `/` is encoded as `%2F` (for query params).
pub fn s3_uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 2);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

// ── Helper functions ────────────────────────────────────────────────

/// Collapse consecutive whitespace in a header value to a single space,
/// and trim leading/trailing whitespace.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find a header value by lowercase name from a list of (name, value) pairs.
fn find_header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

// ── Tests ───────────────────────────────────────────────────────────
