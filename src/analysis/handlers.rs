use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::dto::{AnalysisDetails, AnalyzeResponse, Pagination, UserStats};
use super::normalize::{AnalysisResult, Severity};
use super::repo::Analysis;
use super::service::{presigned_image_url, run_analysis, MAX_UPLOAD_BYTES};
use crate::{auth::jwt::AuthUser, error::ApiError, state::AppState};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/analyses", get(list_analyses))
        .route("/analyses/:id", get(get_analysis))
        .route("/user/stats", get(user_stats))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/analyses/:id", delete(delete_analysis))
        .route("/analyses", delete(delete_all_analyses))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// POST /api/analyze (multipart, `image` field)
#[instrument(skip(state, mp))]
pub async fn analyze(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut upload = None;
    while let Ok(Some(field)) = mp.next_field().await {
        if field.name() == Some("image") {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let data = field.bytes().await.map_err(|e| {
                ApiError::bad_request("Failed to read image upload").with_details(e.to_string())
            })?;
            upload = Some((data, content_type));
            break;
        }
    }
    let Some((data, content_type)) = upload else {
        return Err(ApiError::bad_request("No image file provided"));
    };
    if data.is_empty() {
        return Err(ApiError::bad_request("No image file provided"));
    }

    let analysis = run_analysis(&state, user_id, data, &content_type).await?;
    Ok(Json(analyze_response(analysis)))
}

#[instrument(skip(state))]
pub async fn list_analyses(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<Analysis>>, ApiError> {
    let (limit, offset) = p.clamped();
    let rows = Analysis::list_by_user(&state.db, user_id, limit, offset).await?;
    Ok(Json(rows))
}

#[instrument(skip(state))]
pub async fn get_analysis(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalysisDetails>, ApiError> {
    let analysis = fetch_owned(&state, user_id, id).await?;
    let image_url = presigned_image_url(&state, &analysis.image_path).await?;
    Ok(Json(AnalysisDetails {
        analysis,
        image_url,
    }))
}

#[instrument(skip(state))]
pub async fn delete_analysis(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let analysis = fetch_owned(&state, user_id, id).await?;
    Analysis::delete(&state.db, analysis.id).await?;

    if let Err(e) = state.storage.delete_object(&analysis.image_path).await {
        warn!(error = %e, key = %analysis.image_path, "failed to delete stored image");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete_all_analyses(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode, ApiError> {
    let image_keys = Analysis::image_paths_by_user(&state.db, user_id).await?;
    Analysis::delete_all_by_user(&state.db, user_id).await?;

    for key in image_keys {
        if let Err(e) = state.storage.delete_object(&key).await {
            warn!(error = %e, key = %key, "failed to delete stored image");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn user_stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserStats>, ApiError> {
    let stats = Analysis::stats_by_user(&state.db, user_id).await?;
    Ok(Json(stats))
}

/// Existing-but-foreign rows are access-denied, not not-found.
async fn fetch_owned(state: &AppState, user_id: Uuid, id: Uuid) -> Result<Analysis, ApiError> {
    let analysis = Analysis::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Analysis not found"))?;
    if analysis.user_id != user_id {
        return Err(ApiError::forbidden("Access denied"));
    }
    Ok(analysis)
}

fn analyze_response(analysis: Analysis) -> AnalyzeResponse {
    let severity = match analysis.severity.as_str() {
        "None" => Severity::None,
        "Mild" => Severity::Mild,
        "Severe" => Severity::Severe,
        _ => Severity::Moderate,
    };
    AnalyzeResponse {
        id: analysis.id,
        result: AnalysisResult {
            disease: analysis.disease,
            severity,
            severity_percent: analysis.severity_percent as i64,
            organic_diagnosis: analysis.organic_diagnosis,
            chemical_diagnosis: analysis.chemical_diagnosis,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn analyze_response_carries_row_fields() {
        let analysis = Analysis {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            image_path: "scans/u/s.jpg".into(),
            disease: "Late Blight".into(),
            severity: "Severe".into(),
            severity_percent: 75,
            organic_diagnosis: "Neem oil".into(),
            chemical_diagnosis: "Copper fungicide".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        let id = analysis.id;
        let response = analyze_response(analysis);
        assert_eq!(response.id, id);
        assert_eq!(response.result.severity, Severity::Severe);
        assert_eq!(response.result.severity_percent, 75);
    }
}
