use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use super::normalize::normalize;
use super::repo::Analysis;
use crate::error::ApiError;
use crate::state::AppState;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// One full analysis pass: store the upload, call the external webhook,
/// normalize its response, persist the validated record. Any failure after
/// the upload removes the stored object again; nothing is persisted unless
/// the canonical result passed validation.
pub async fn run_analysis(
    state: &AppState,
    user_id: Uuid,
    image: Bytes,
    content_type: &str,
) -> Result<Analysis, ApiError> {
    let ext = ext_from_mime(content_type).ok_or_else(|| {
        ApiError::bad_request("Invalid file type. Only JPEG and PNG images are allowed.")
    })?;

    let scan_id = Uuid::new_v4();
    let key = scan_key(user_id, scan_id, ext);
    state
        .storage
        .put_object(&key, image.clone(), content_type)
        .await
        .map_err(ApiError::internal)?;

    let raw = match state.analyzer.analyze(image, content_type).await {
        Ok(raw) => raw,
        Err(e) => {
            cleanup_upload(state, &key).await;
            return Err(ApiError::new(
                axum::http::StatusCode::BAD_GATEWAY,
                "Failed to analyze image",
            )
            .with_details(e.to_string()));
        }
    };

    let result = match normalize(&raw) {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, user_id = %user_id, "webhook response rejected");
            cleanup_upload(state, &key).await;
            return Err(e.into());
        }
    };

    let analysis = Analysis::create(&state.db, user_id, &key, &result)
        .await
        .map_err(ApiError::internal)?;

    info!(
        analysis_id = %analysis.id,
        user_id = %user_id,
        disease = %analysis.disease,
        severity = %analysis.severity,
        "analysis stored"
    );
    Ok(analysis)
}

const IMAGE_URL_TTL_SECS: u64 = 30 * 60;

/// Short-lived presigned URL for a stored scan image.
pub async fn presigned_image_url(state: &AppState, key: &str) -> Result<String, ApiError> {
    state
        .storage
        .presign_get(key, IMAGE_URL_TTL_SECS)
        .await
        .map_err(ApiError::internal)
}

async fn cleanup_upload(state: &AppState, key: &str) {
    if let Err(e) = state.storage.delete_object(key).await {
        warn!(error = %e, key = %key, "failed to clean up stored image");
    }
}

fn scan_key(user_id: Uuid, scan_id: Uuid, ext: &str) -> String {
    format!("scans/{}/{}.{}", user_id, scan_id, ext)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}
