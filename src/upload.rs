//! Upload relay: temporary storage credentials from the control plane, then a
//! direct object-storage write of the caller's file.

use bytes::Bytes;
use serde::Serialize;
use std::path::Path;

use crate::cloud_api::{CloudApiClient, CloudApiError, StorageCredentialRequest};
use crate::config::RelayConfig;
use crate::cos::{self, CosError};

/// Multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file provided")]
    MissingFile,

    #[error("File name is empty")]
    EmptyFileName,

    #[error("Invalid upload form: {0}")]
    InvalidForm(String),

    #[error("Failed to obtain temporary credentials: {0}")]
    Credential(#[from] CloudApiError),

    #[error("Upload to object storage failed: {0}")]
    Storage(#[from] CosError),
}

impl UploadError {
    /// Client mistakes are 400, upstream failures 500.
    pub fn status(&self) -> http::StatusCode {
        match self {
            UploadError::MissingFile | UploadError::EmptyFileName | UploadError::InvalidForm(_) => {
                http::StatusCode::BAD_REQUEST
            }
            UploadError::Credential(_) | UploadError::Storage(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub url: String,
    pub cos_path: String,
    pub file_name: String,
}

/// Success body returned to the caller.
#[derive(Debug, Serialize)]
pub struct UploadResponse<'a> {
    pub success: bool,
    #[serde(rename = "imageUrl")]
    pub image_url: &'a str,
    #[serde(rename = "cosPath")]
    pub cos_path: &'a str,
}

impl UploadResult {
    pub fn response(&self) -> UploadResponse<'_> {
        UploadResponse {
            success: true,
            image_url: &self.url,
            cos_path: &self.cos_path,
        }
    }
}

/// Lowercased extension with a leading dot; empty when the name has none.
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Extract the `file` part of a multipart body.
///
/// A `file` part without a filename is an ordinary form value and does not
/// count as a file.
pub async fn read_upload_form(
    content_type: Option<&str>,
    body: Bytes,
) -> Result<UploadedFile, UploadError> {
    let content_type = content_type.ok_or(UploadError::MissingFile)?;
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| UploadError::InvalidForm(e.to_string()))?;

    let stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::InvalidForm(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if file_name.is_empty() {
            return Err(UploadError::EmptyFileName);
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| UploadError::InvalidForm(e.to_string()))?;
        return Ok(UploadedFile { file_name, bytes });
    }

    Err(UploadError::MissingFile)
}

/// Store one already-extracted file and return its public URL.
pub async fn relay_upload(
    http: &reqwest::Client,
    config: &RelayConfig,
    file: UploadedFile,
) -> Result<UploadResult, UploadError> {
    let request = StorageCredentialRequest {
        bot_biz_id: config.bot_biz_id.clone(),
        file_type: file_extension(&file.file_name),
        is_public: config.storage_public,
        type_key: config.storage_type_key.clone(),
    };

    let client = CloudApiClient::new(http.clone(), config)?;
    let credentials = client.describe_storage_credential(&request).await?;
    tracing::debug!(?credentials, "Obtained temporary storage credentials");

    cos::put_object(
        http,
        &credentials,
        file.bytes,
        config.cos_endpoint.as_deref(),
    )
    .await?;

    Ok(UploadResult {
        url: cos::public_url(&credentials),
        cos_path: credentials.upload_path,
        file_name: file.file_name,
    })
}

/// Full upload flow for a raw request body: validate the form first, then
/// call upstream.
pub async fn handle_upload(
    http: &reqwest::Client,
    config: &RelayConfig,
    content_type: Option<&str>,
    body: Bytes,
) -> Result<UploadResult, UploadError> {
    let file = read_upload_form(content_type, body).await?;
    tracing::info!(file_name = %file.file_name, bytes = file.bytes.len(), "Relaying upload");
    relay_upload(http, config, file).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "X-RELAY-BOUNDARY";

    fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    fn part(name: &str, file_name: Option<&str>, body: &str) -> String {
        let disposition = match file_name {
            Some(f) => format!("form-data; name=\"{}\"; filename=\"{}\"", name, f),
            None => format!("form-data; name=\"{}\"", name),
        };
        format!(
            "--{}\r\nContent-Disposition: {}\r\n\r\n{}\r\n",
            BOUNDARY, disposition, body
        )
    }

    fn form(parts: &[String]) -> Bytes {
        Bytes::from(format!("{}--{}--\r\n", parts.concat(), BOUNDARY))
    }

    #[test]
    fn extension_is_lowercased_with_dot() {
        assert_eq!(file_extension("photo.PNG"), ".png");
        assert_eq!(file_extension("archive.tar.GZ"), ".gz");
        assert_eq!(file_extension("README"), "");
        assert_eq!(file_extension(".bashrc"), "");
    }

    #[actix_rt::test]
    async fn form_returns_named_file_part() {
        let body = form(&[
            part("note", None, "ignored"),
            part("file", Some("photo.PNG"), "PNGDATA"),
        ]);
        let file = read_upload_form(Some(&content_type()), body).await.unwrap();
        assert_eq!(file.file_name, "photo.PNG");
        assert_eq!(&file.bytes[..], b"PNGDATA");
    }

    #[actix_rt::test]
    async fn missing_file_field_is_rejected() {
        let body = form(&[part("other", Some("a.png"), "x"), part("file", None, "text")]);
        let err = read_upload_form(Some(&content_type()), body).await.unwrap_err();
        assert!(matches!(err, UploadError::MissingFile));
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn empty_file_name_is_rejected() {
        let body = form(&[part("file", Some(""), "x")]);
        let err = read_upload_form(Some(&content_type()), body).await.unwrap_err();
        assert!(matches!(err, UploadError::EmptyFileName));
    }

    #[actix_rt::test]
    async fn non_multipart_body_is_invalid() {
        let err = read_upload_form(Some("application/json"), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidForm(_)));

        let err = read_upload_form(None, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, UploadError::MissingFile));
    }

    #[test]
    fn success_body_uses_camel_case_keys() {
        let result = UploadResult {
            url: "https://b.cos.r.myqcloud.com/p.png".into(),
            cos_path: "/p.png".into(),
            file_name: "p.png".into(),
        };
        assert_eq!(
            serde_json::to_value(result.response()).unwrap(),
            serde_json::json!({
                "success": true,
                "imageUrl": "https://b.cos.r.myqcloud.com/p.png",
                "cosPath": "/p.png"
            })
        );
    }
}
