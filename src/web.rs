use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::fallback::FallbackPools;
use crate::generation::ImageSource;
use crate::media::{detect_mime_type, get_extension_from_mime_type};
use crate::pipeline::{CartoonOutcome, CartoonPipeline, CartoonResponse};
use crate::storage::LocalImageStorage;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CartoonPipeline>,
    pub pools: Arc<FallbackPools>,
    pub storage: Arc<LocalImageStorage>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CartoonizeResponse {
    Generated(CartoonResponse),
    Fallback {
        #[serde(rename = "fallbackUrl")]
        fallback_url: String,
    },
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// 接收用户照片并走完整的卡通化管线。
///
/// Multipart fields: `file` (the photo) and optionally `gender` (the
/// attribute-extraction signal used for fallback selection).
pub async fn handle_cartoonize(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let mut bytes = None;
    let mut gender = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => match field.name() {
                Some("file") => match field.bytes().await {
                    Ok(data) => bytes = Some(data),
                    Err(err) => {
                        return json_error(
                            StatusCode::BAD_REQUEST,
                            &format!("读取文件失败: {err}"),
                        );
                    }
                },
                Some("gender") => match field.text().await {
                    Ok(value) => gender = Some(value),
                    Err(err) => {
                        return json_error(
                            StatusCode::BAD_REQUEST,
                            &format!("读取表单失败: {err}"),
                        );
                    }
                },
                _ => {}
            },
            Ok(None) => break,
            Err(err) => {
                return json_error(StatusCode::BAD_REQUEST, &format!("读取表单失败: {err}"));
            }
        }
    }

    let bytes = match bytes {
        Some(data) if !data.is_empty() => data,
        _ => return json_error(StatusCode::BAD_REQUEST, "未找到上传文件"),
    };
    let Some(mime_type) = detect_mime_type(bytes.as_ref()) else {
        return json_error(StatusCode::BAD_REQUEST, "文件类型不支持");
    };

    // 留档用户原图，文件名不可猜测。
    let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let hash = compute_hash(&format!("upload:{timestamp}:{}", bytes.len()));
    let ext = get_extension_from_mime_type(mime_type);
    let upload_key = format!("uploads/{hash}.{ext}");
    if let Err(err) = state.storage.save(&upload_key, bytes.as_ref()).await {
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("保存文件失败: {err}"),
        );
    }
    info!(key = %upload_key, size = bytes.len(), "user photo uploaded");

    let outcome = state
        .pipeline
        .cartoonize(
            Some(ImageSource::Bytes(bytes.to_vec())),
            gender.as_deref(),
            &state.pools,
        )
        .await;
    let body = match outcome {
        CartoonOutcome::Generated(bundle) => CartoonizeResponse::Generated(bundle.into_response()),
        CartoonOutcome::Fallback { photo_path } => CartoonizeResponse::Fallback {
            fallback_url: photo_path,
        },
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_response_serializes_to_a_single_field() {
        let response = CartoonizeResponse::Fallback {
            fallback_url: "/male/3.png".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, serde_json::json!({ "fallbackUrl": "/male/3.png" }));
    }

    #[test]
    fn generated_response_uses_the_bundle_contract() {
        let response = CartoonizeResponse::Generated(CartoonResponse {
            local_url: "http://localhost:8080/upload/cartoon_x.jpeg".to_string(),
            r2_object_key: Some("cartoon/abc-1.jpeg".to_string()),
            presigned_url: None,
            qr_code_base64: None,
            file_size: 2048,
        });
        let json = serde_json::to_value(&response).unwrap();
        let object = json.as_object().unwrap();
        assert!(object.contains_key("localUrl"));
        assert!(object.contains_key("r2ObjectKey"));
        assert!(object.contains_key("fileSize"));
        assert!(!object.contains_key("presignedUrl"));
    }
}
