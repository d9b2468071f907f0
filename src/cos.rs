//! Object storage (COS) writes with temporary credentials.
//!
//! Requests are signed with the COS v5 scheme (`q-sign-algorithm=sha1`). Only
//! the `host` header is signed and no content checksum is sent.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

use crate::cloud_api::TemporaryCredentials;

type HmacSha1 = Hmac<Sha1>;

/// Signature validity starts this many seconds in the past to absorb clock skew.
const SIGN_BACKDATE_SECS: i64 = 60;
const SIGN_VALIDITY_SECS: i64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum CosError {
    #[error("Invalid storage URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Object storage rejected upload (HTTP {status}): [{code}] {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },
}

/// Inputs of a COS v5 request signature.
#[derive(Debug, Clone)]
pub struct CosSigning<'a> {
    pub secret_id: &'a str,
    pub secret_key: &'a str,
    /// Lowercased by the signer.
    pub method: &'a str,
    /// Decoded object path, starting with `/`.
    pub path: &'a str,
    pub host: &'a str,
    pub start: i64,
    pub end: i64,
}

fn hmac_sha1_hex(key: &[u8], msg: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC key of any size");
    mac.update(msg.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the `Authorization` header value.
pub fn sign_cos(req: &CosSigning<'_>) -> String {
    let key_time = format!("{};{}", req.start, req.end);
    let sign_key = hmac_sha1_hex(req.secret_key.as_bytes(), &key_time);

    let http_string = format!(
        "{}\n{}\n\nhost={}\n",
        req.method.to_ascii_lowercase(),
        req.path,
        urlencoding::encode(req.host)
    );
    let string_to_sign = format!(
        "sha1\n{}\n{}\n",
        key_time,
        hex::encode(Sha1::digest(http_string.as_bytes()))
    );
    let signature = hmac_sha1_hex(sign_key.as_bytes(), &string_to_sign);

    format!(
        "q-sign-algorithm=sha1&q-ak={}&q-sign-time={}&q-key-time={}&q-header-list=host&q-url-param-list=&q-signature={}",
        req.secret_id, key_time, key_time, signature
    )
}

/// `https://{bucket}.{type}.{region}.myqcloud.com{upload_path}`
pub fn public_url(credentials: &TemporaryCredentials) -> String {
    format!(
        "https://{}.{}.{}.myqcloud.com{}",
        credentials.bucket, credentials.storage_type, credentials.region, credentials.upload_path
    )
}

fn object_path(upload_path: &str) -> String {
    if upload_path.starts_with('/') {
        upload_path.to_string()
    } else {
        format!("/{}", upload_path)
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Request URL of the object, honoring an optional origin override.
pub fn object_url(credentials: &TemporaryCredentials, endpoint_override: Option<&str>) -> String {
    let origin = match endpoint_override {
        Some(o) => o.trim_end_matches('/').to_string(),
        None => format!(
            "https://{}.cos.{}.myqcloud.com",
            credentials.bucket, credentials.region
        ),
    };
    format!(
        "{}{}",
        origin,
        encode_path(&object_path(&credentials.upload_path))
    )
}

/// Write `body` to the credential's bucket and upload path.
pub async fn put_object(
    http: &reqwest::Client,
    credentials: &TemporaryCredentials,
    body: Bytes,
    endpoint_override: Option<&str>,
) -> Result<(), CosError> {
    let url = object_url(credentials, endpoint_override);
    let parsed =
        reqwest::Url::parse(&url).map_err(|e| CosError::InvalidUrl(format!("{}: {}", url, e)))?;
    let host = match (parsed.host_str(), parsed.port()) {
        (Some(h), Some(p)) => format!("{}:{}", h, p),
        (Some(h), None) => h.to_string(),
        (None, _) => return Err(CosError::InvalidUrl(url)),
    };

    let now = chrono::Utc::now().timestamp();
    let path = object_path(&credentials.upload_path);
    let authorization = sign_cos(&CosSigning {
        secret_id: &credentials.tmp_secret_id,
        secret_key: &credentials.tmp_secret_key,
        method: "PUT",
        path: &path,
        host: &host,
        start: now - SIGN_BACKDATE_SECS,
        end: now - SIGN_BACKDATE_SECS + SIGN_VALIDITY_SECS,
    });

    tracing::debug!(
        bucket = %credentials.bucket,
        path = %path,
        bytes = body.len(),
        "Writing object"
    );

    let resp = http
        .put(parsed)
        .header("authorization", authorization)
        .header("x-cos-security-token", &credentials.token)
        .body(body)
        .send()
        .await?;

    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }

    let text = resp.text().await.unwrap_or_default();
    Err(CosError::Status {
        status: status.as_u16(),
        code: xml_tag(&text, "Code").unwrap_or_else(|| status.to_string()),
        message: xml_tag(&text, "Message").unwrap_or_else(|| text.chars().take(256).collect()),
    })
}

/// Text of the first `<tag>...</tag>` in a vendor XML error body.
fn xml_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let len = body[start..].find(&close)?;
    Some(body[start..start + len].trim().to_string())
}
