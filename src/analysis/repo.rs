use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::dto::UserStats;
use super::normalize::AnalysisResult;

/// Persisted analysis row. Created exactly once per successful analysis call,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: Uuid,
    pub user_id: Uuid,
    pub image_path: String,
    pub disease: String,
    pub severity: String,
    pub severity_percent: i32,
    pub organic_diagnosis: String,
    pub chemical_diagnosis: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Analysis {
    /// Inserts a validated result. `id` and `created_at` are assigned by the
    /// database at write time.
    pub async fn create(
        db: &PgPool,
        user_id: Uuid,
        image_path: &str,
        result: &AnalysisResult,
    ) -> anyhow::Result<Analysis> {
        let row = sqlx::query_as::<_, Analysis>(
            r#"
            INSERT INTO analyses
                (user_id, image_path, disease, severity, severity_percent,
                 organic_diagnosis, chemical_diagnosis)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, image_path, disease, severity, severity_percent,
                      organic_diagnosis, chemical_diagnosis, created_at
            "#,
        )
        .bind(user_id)
        .bind(image_path)
        .bind(&result.disease)
        .bind(result.severity.as_str())
        .bind(result.severity_percent as i32)
        .bind(&result.organic_diagnosis)
        .bind(&result.chemical_diagnosis)
        .fetch_one(db)
        .await?;
        Ok(row)
    }

    pub async fn list_by_user(
        db: &PgPool,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Analysis>> {
        let rows = sqlx::query_as::<_, Analysis>(
            r#"
            SELECT id, user_id, image_path, disease, severity, severity_percent,
                   organic_diagnosis, chemical_diagnosis, created_at
            FROM analyses
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn get(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Analysis>> {
        let row = sqlx::query_as::<_, Analysis>(
            r#"
            SELECT id, user_id, image_path, disease, severity, severity_percent,
                   organic_diagnosis, chemical_diagnosis, created_at
            FROM analyses
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM analyses WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn delete_all_by_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM analyses WHERE user_id = $1")
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn image_paths_by_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<String>> {
        let keys: Vec<(String,)> =
            sqlx::query_as("SELECT image_path FROM analyses WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(db)
                .await?;
        Ok(keys.into_iter().map(|(k,)| k).collect())
    }

    /// Aggregate stats for the dashboard. Severity buckets: None → healthy,
    /// Mild|Moderate → needs treatment, Severe → critical. "Today" is since
    /// UTC midnight.
    pub async fn stats_by_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<UserStats> {
        let stats = sqlx::query_as::<_, UserStats>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE created_at >= date_trunc('day', now() AT TIME ZONE 'utc') AT TIME ZONE 'utc') AS scans_today,
                COUNT(*) FILTER (WHERE severity = 'None') AS healthy_plants,
                COUNT(*) FILTER (WHERE severity IN ('Mild', 'Moderate')) AS need_treatment,
                COUNT(*) FILTER (WHERE severity = 'Severe') AS critical_cases
            FROM analyses
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(db)
        .await?;
        Ok(stats)
    }
}
