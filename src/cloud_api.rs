//! Cloud control-plane client.
//!
//! Calls are JSON POSTs signed with TC3-HMAC-SHA256 using the long-lived
//! account credentials from `RelayConfig`. Only `DescribeStorageCredential`
//! is used by the relay, but `call` accepts any action of the configured
//! service.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RelayConfig;

type HmacSha256 = Hmac<Sha256>;

const TC3_ALGORITHM: &str = "TC3-HMAC-SHA256";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const SIGNED_HEADERS: &str = "content-type;host";

/// Control-plane error types
#[derive(Debug, thiserror::Error)]
pub enum CloudApiError {
    #[error("Invalid API endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("[{code}] {message} (RequestId: {request_id})")]
    Api {
        code: String,
        message: String,
        request_id: String,
    },

    #[error("Unexpected response (HTTP {status}): {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Parameters of `DescribeStorageCredential`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StorageCredentialRequest {
    pub bot_biz_id: String,
    /// Lowercase extension with leading dot, e.g. `.png`.
    pub file_type: String,
    pub is_public: bool,
    pub type_key: String,
}

/// Short-lived object-storage credentials scoped to one upload path.
#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryCredentials {
    pub tmp_secret_id: String,
    pub tmp_secret_key: String,
    pub token: String,
    pub bucket: String,
    pub region: String,
    /// Storage type segment of the public host, usually `cos`.
    pub storage_type: String,
    pub upload_path: String,
}

impl std::fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("tmp_secret_id", &"<redacted>")
            .field("tmp_secret_key", &"<redacted>")
            .field("token", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("storage_type", &self.storage_type)
            .field("upload_path", &self.upload_path)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCredentials {
    tmp_secret_id: String,
    tmp_secret_key: String,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStorageCredentialResponse {
    credentials: RawCredentials,
    upload_path: String,
    bucket: String,
    region: String,
    #[serde(rename = "Type")]
    storage_type: String,
}

/// Inputs of a TC3-HMAC-SHA256 signature.
#[derive(Debug, Clone)]
pub struct Tc3Signing<'a> {
    pub secret_id: &'a str,
    pub secret_key: &'a str,
    pub service: &'a str,
    pub host: &'a str,
    pub timestamp: i64,
    pub payload: &'a str,
}

fn hmac_sha256(key: &[u8], msg: &str) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key of any size");
    mac.update(msg.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// UTC calendar date of a unix timestamp, as used in the credential scope.
fn tc3_date(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

/// Compute the `Authorization` header value for a signed POST to `/`.
pub fn sign_tc3(req: &Tc3Signing<'_>) -> String {
    let date = tc3_date(req.timestamp);

    let canonical_headers = format!("content-type:{}\nhost:{}\n", JSON_CONTENT_TYPE, req.host);
    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers,
        SIGNED_HEADERS,
        sha256_hex(req.payload)
    );

    let credential_scope = format!("{}/{}/tc3_request", date, req.service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        TC3_ALGORITHM,
        req.timestamp,
        credential_scope,
        sha256_hex(&canonical_request)
    );

    let secret_date = hmac_sha256(format!("TC3{}", req.secret_key).as_bytes(), &date);
    let secret_service = hmac_sha256(&secret_date, req.service);
    let secret_signing = hmac_sha256(&secret_service, "tc3_request");
    let signature = hex::encode(hmac_sha256(&secret_signing, &string_to_sign));

    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        TC3_ALGORITHM, req.secret_id, credential_scope, SIGNED_HEADERS, signature
    )
}

/// Client for one control-plane service (`lke` by default).
#[derive(Clone)]
pub struct CloudApiClient {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    service: String,
    version: String,
    region: String,
    secret_id: String,
    secret_key: String,
}

impl CloudApiClient {
    pub fn new(http: reqwest::Client, config: &RelayConfig) -> Result<Self, CloudApiError> {
        let url = reqwest::Url::parse(&config.api_endpoint).map_err(|e| {
            CloudApiError::InvalidEndpoint(format!("{}: {}", config.api_endpoint, e))
        })?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(CloudApiError::InvalidEndpoint(config.api_endpoint.clone()));
            }
        };

        Ok(Self {
            http,
            endpoint: config.api_endpoint.clone(),
            host,
            service: config.api_service.clone(),
            version: config.api_version.clone(),
            region: config.region.clone(),
            secret_id: config.secret_id.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    /// Invoke `action` and return the contents of the `Response` envelope.
    pub async fn call<P: Serialize>(
        &self,
        action: &str,
        params: &P,
    ) -> Result<serde_json::Value, CloudApiError> {
        let payload = serde_json::to_string(params)?;
        let timestamp = chrono::Utc::now().timestamp();
        let authorization = sign_tc3(&Tc3Signing {
            secret_id: &self.secret_id,
            secret_key: &self.secret_key,
            service: &self.service,
            host: &self.host,
            timestamp,
            payload: &payload,
        });

        tracing::debug!(action, service = %self.service, "Calling control plane");

        let resp = self
            .http
            .post(&self.endpoint)
            .header("content-type", JSON_CONTENT_TYPE)
            .header("authorization", authorization)
            .header("x-tc-action", action)
            .header("x-tc-version", &self.version)
            .header("x-tc-region", &self.region)
            .header("x-tc-timestamp", timestamp.to_string())
            .body(payload)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        parse_envelope(status.as_u16(), &text)
    }

    /// Request temporary storage credentials for one upload.
    pub async fn describe_storage_credential(
        &self,
        request: &StorageCredentialRequest,
    ) -> Result<TemporaryCredentials, CloudApiError> {
        let response = self.call("DescribeStorageCredential", request).await?;
        let parsed: DescribeStorageCredentialResponse = serde_json::from_value(response)?;

        Ok(TemporaryCredentials {
            tmp_secret_id: parsed.credentials.tmp_secret_id,
            tmp_secret_key: parsed.credentials.tmp_secret_key,
            token: parsed.credentials.token,
            bucket: parsed.bucket,
            region: parsed.region,
            storage_type: parsed.storage_type,
            upload_path: parsed.upload_path,
        })
    }
}

fn parse_envelope(status: u16, text: &str) -> Result<serde_json::Value, CloudApiError> {
    let unexpected = || CloudApiError::UnexpectedResponse {
        status,
        body: text.chars().take(512).collect(),
    };

    let mut value: serde_json::Value = serde_json::from_str(text).map_err(|_| unexpected())?;
    let response = match value.get_mut("Response") {
        Some(r) => r.take(),
        None => return Err(unexpected()),
    };

    if let Some(error) = response.get("Error") {
        let field = |v: &serde_json::Value, k: &str| {
            v.get(k)
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string()
        };
        return Err(CloudApiError::Api {
            code: field(error, "Code"),
            message: field(error, "Message"),
            request_id: field(&response, "RequestId"),
        });
    }

    if !(200..300).contains(&status) {
        return Err(unexpected());
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tc3_signature_matches_reference_vector() {
        let auth = sign_tc3(&Tc3Signing {
            secret_id: "AKIDz8krbsJ5yKBZQpn74WFkmLPx3EXAMPLE",
            secret_key: "Gu5t9xGARNpq86cd98joQYCN3EXAMPLE",
            service: "lke",
            host: "lke.tencentcloudapi.com",
            timestamp: 1_700_000_000,
            payload: r#"{"BotBizId":"123","FileType":".png","IsPublic":true,"TypeKey":"realtime"}"#,
        });

        assert_eq!(
            auth,
            "TC3-HMAC-SHA256 Credential=AKIDz8krbsJ5yKBZQpn74WFkmLPx3EXAMPLE/2023-11-14/lke/tc3_request, \
             SignedHeaders=content-type;host, \
             Signature=b6a988a47e9cfcdf5da6fd8c4f88e63ffd444febf632e75f7ab93fc06cebd933"
        );
    }

    #[test]
    fn scope_date_is_utc() {
        assert_eq!(tc3_date(0), "1970-01-01");
        assert_eq!(tc3_date(1_700_000_000), "2023-11-14");
    }

    #[test]
    fn request_serializes_pascal_case() {
        let req = StorageCredentialRequest {
            bot_biz_id: "42".into(),
            file_type: ".png".into(),
            is_public: true,
            type_key: "realtime".into(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"BotBizId": "42", "FileType": ".png", "IsPublic": true, "TypeKey": "realtime"})
        );
    }

    #[test]
    fn envelope_error_maps_to_api_error() {
        let body = json!({
            "Response": {
                "Error": {"Code": "AuthFailure.SignatureFailure", "Message": "bad signature"},
                "RequestId": "req-1"
            }
        })
        .to_string();

        match parse_envelope(200, &body) {
            Err(CloudApiError::Api {
                code,
                message,
                request_id,
            }) => {
                assert_eq!(code, "AuthFailure.SignatureFailure");
                assert_eq!(message, "bad signature");
                assert_eq!(request_id, "req-1");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn non_json_body_is_unexpected() {
        let err = parse_envelope(502, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(
            err,
            CloudApiError::UnexpectedResponse { status: 502, .. }
        ));
    }

    #[test]
    fn storage_credential_response_decodes() {
        let response = json!({
            "Credentials": {"TmpSecretId": "id", "TmpSecretKey": "key", "Token": "tok"},
            "UploadPath": "/public/1/2/photo.png",
            "Bucket": "bucket-1250000000",
            "Region": "ap-guangzhou",
            "Type": "cos",
            "RequestId": "req-2"
        });
        let parsed: DescribeStorageCredentialResponse = serde_json::from_value(response).unwrap();
        assert_eq!(parsed.credentials.token, "tok");
        assert_eq!(parsed.storage_type, "cos");
        assert_eq!(parsed.upload_path, "/public/1/2/photo.png");
    }
}
