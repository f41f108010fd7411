//! Image upload routes

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    storage::{StorageError, StorageHealth, UploadRequest, DEFAULT_FOLDER, DEFAULT_WEBP_QUALITY},
};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// Multipart upload: `file`, plus optional `folder`, `convert_webp` and `webp_quality`
///
/// Malformed input is a 400. Conversion and storage failures are reported
/// in the body with `success: false`.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut request = UploadRequest {
        file_name: None,
        content_type: None,
        bytes: Vec::new(),
        folder: DEFAULT_FOLDER.to_string(),
        convert_webp: true,
        webp_quality: DEFAULT_WEBP_QUALITY,
    };
    let mut has_file = false;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                request.file_name = field.file_name().map(str::to_string);
                request.content_type = field.content_type().map(str::to_string);
                request.bytes = field.bytes().await?.to_vec();
                has_file = true;
            }
            "folder" => request.folder = field.text().await?,
            "convert_webp" => request.convert_webp = parse_bool(&field.text().await?)?,
            "webp_quality" => request.webp_quality = parse_quality(&field.text().await?)?,
            other => {
                tracing::debug!(field = %other, "Ignoring unknown upload field");
            }
        }
    }

    if !has_file {
        return Err(ApiError::Validation("file is required".to_string()));
    }

    match state.uploads.upload(request).await {
        Ok(stored) => Ok(Json(UploadResponse {
            success: true,
            message: "File uploaded successfully".to_string(),
            download_url: Some(stored.file_url.clone()),
            file_url: Some(stored.file_url),
            file_name: Some(stored.file_name),
            storage_method: Some(stored.storage_method),
        })),
        Err(e @ StorageError::InvalidInput(_)) => Err(e.into()),
        Err(e) => {
            tracing::error!(error = %e, "Upload failed");
            Ok(Json(UploadResponse {
                success: false,
                message: format!("Upload failed: {}", e),
                file_url: None,
                file_name: None,
                storage_method: None,
                download_url: None,
            }))
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<StorageHealth> {
    Json(state.uploads.health())
}

fn parse_bool(value: &str) -> ApiResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ApiError::Validation(format!(
            "convert_webp must be a boolean, got {}",
            other
        ))),
    }
}

fn parse_quality(value: &str) -> ApiResult<u8> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|q| (1..=100).contains(q))
        .ok_or_else(|| ApiError::Validation("webp_quality must be between 1 and 100".to_string()))
}
