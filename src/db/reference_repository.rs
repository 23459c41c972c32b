use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::db::{DbError, Indicator, Station};

/// Get-or-create access to stations and indicators.
///
/// Uniqueness is enforced by the table constraints. The no-op `DO UPDATE`
/// returns the existing row, waiting for a concurrent insert of the same key
/// to commit, so overlapping runs resolve to the same rows.
#[derive(Clone)]
pub struct ReferenceRepository {
    pool: PgPool,
}

impl ReferenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn get_or_create_station(&self, code: &str) -> Result<i32, DbError> {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO stations (code)
            VALUES ($1)
            ON CONFLICT (code) DO UPDATE SET code = EXCLUDED.code
            RETURNING id
            "#,
        )
        .bind(code)
        .fetch_one(&self.pool)
        .await?;

        debug!("Station {} resolved to id {}", code, id);
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn get_or_create_indicator(&self, code: &str, unit: &str) -> Result<i32, DbError> {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO indicators (code, unit)
            VALUES ($1, $2)
            ON CONFLICT (code, unit) DO UPDATE SET unit = EXCLUDED.unit
            RETURNING id
            "#,
        )
        .bind(code)
        .bind(unit)
        .fetch_one(&self.pool)
        .await?;

        debug!("Indicator {} [{}] resolved to id {}", code, unit, id);
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn find_station(&self, code: &str) -> Result<Option<Station>, DbError> {
        let station = sqlx::query_as::<_, Station>(
            "SELECT id, code, created_at FROM stations WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(station)
    }

    /// Indicators a report code can refer to: the exact code, or every
    /// `code/averaging` variant of a bare code
    #[instrument(skip(self))]
    pub async fn find_series_indicators(&self, code: &str) -> Result<Vec<Indicator>, DbError> {
        let indicators = sqlx::query_as::<_, Indicator>(
            r#"
            SELECT id, code, unit, created_at
            FROM indicators
            WHERE code = $1 OR split_part(code, '/', 1) = $1
            ORDER BY code, unit
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;

        Ok(indicators)
    }

    /// All indicators sharing a code, one per unit
    #[instrument(skip(self))]
    pub async fn find_indicators(&self, code: &str) -> Result<Vec<Indicator>, DbError> {
        let indicators = sqlx::query_as::<_, Indicator>(
            "SELECT id, code, unit, created_at FROM indicators WHERE code = $1 ORDER BY unit",
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;

        Ok(indicators)
    }
}
