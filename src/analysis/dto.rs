use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::normalize::AnalysisResult;
use super::repo::Analysis;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

impl Pagination {
    /// Query parameters come straight from the client; keep them off the
    /// database unless they are in range.
    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, 100), self.offset.max(0))
    }
}

/// Response of `POST /api/analyze`: the canonical result plus the new row id.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub id: Uuid,
    #[serde(flatten)]
    pub result: AnalysisResult,
}

/// Response of `GET /api/analyses/:id`: the stored row plus a short-lived
/// presigned URL for the uploaded image.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDetails {
    #[serde(flatten)]
    pub analysis: Analysis,
    pub image_url: String,
}

/// Severity-bucketed dashboard counters.
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub scans_today: i64,
    pub healthy_plants: i64,
    pub need_treatment: i64,
    pub critical_cases: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::normalize::Severity;

    #[test]
    fn analyze_response_flattens_result() {
        let response = AnalyzeResponse {
            id: Uuid::new_v4(),
            result: AnalysisResult {
                disease: "Late Blight".into(),
                severity: Severity::Moderate,
                severity_percent: 65,
                organic_diagnosis: "Neem oil".into(),
                chemical_diagnosis: "Copper fungicide".into(),
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("id").is_some());
        assert_eq!(json["disease"], "Late Blight");
        assert_eq!(json["severity"], "Moderate");
        assert_eq!(json["severity_percent"], 65);
    }

    #[test]
    fn pagination_clamps_hostile_values() {
        let p = Pagination {
            limit: -5,
            offset: -1,
        };
        assert_eq!(p.clamped(), (1, 0));

        let p = Pagination {
            limit: 10_000,
            offset: 40,
        };
        assert_eq!(p.clamped(), (100, 40));

        let p = Pagination {
            limit: 20,
            offset: 0,
        };
        assert_eq!(p.clamped(), (20, 0));
    }

    #[test]
    fn analysis_details_flattens_row_and_adds_image_url() {
        use time::OffsetDateTime;

        let details = AnalysisDetails {
            analysis: Analysis {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                image_path: "scans/u/s.jpg".into(),
                disease: "Rust".into(),
                severity: "Mild".into(),
                severity_percent: 25,
                organic_diagnosis: "Prune".into(),
                chemical_diagnosis: "Myclobutanil".into(),
                created_at: OffsetDateTime::now_utc(),
            },
            image_url: "https://fake.local/scans/u/s.jpg".into(),
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["disease"], "Rust");
        assert_eq!(json["imageUrl"], "https://fake.local/scans/u/s.jpg");
    }

    #[test]
    fn stats_serialize_camel_case() {
        let stats = UserStats {
            scans_today: 3,
            healthy_plants: 1,
            need_treatment: 1,
            critical_cases: 1,
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("scansToday"));
        assert!(json.contains("criticalCases"));
    }
}
