use chrono::NaiveDateTime;
use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::db::{DatabaseTotals, DbError, IndicatorCount, MonthlyAverage, StationCount};

/// Selects one station/indicator series for the monthly queries
#[derive(Debug, Clone, Default)]
pub struct SeriesQuery {
    pub station_code: String,
    pub indicator_code: String,
    /// Restrict to one unit when the indicator is published in several
    pub unit: Option<String>,
    /// Inclusive lower bound
    pub from: Option<NaiveDateTime>,
    /// Exclusive upper bound
    pub until: Option<NaiveDateTime>,
}

/// Read-only aggregates over the stored measurements
#[derive(Clone)]
pub struct ReportRepository {
    pool: PgPool,
}

impl ReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn totals(&self) -> Result<DatabaseTotals, DbError> {
        let totals = sqlx::query_as::<_, DatabaseTotals>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM stations) AS stations,
                (SELECT COUNT(*) FROM indicators) AS indicators,
                (SELECT COUNT(*) FROM measurements) AS measurements
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(totals)
    }

    /// Stations with the most measurements
    #[instrument(skip(self))]
    pub async fn top_stations(&self, limit: i64) -> Result<Vec<StationCount>, DbError> {
        let stations = sqlx::query_as::<_, StationCount>(
            r#"
            SELECT s.code, COUNT(m.id) AS measurement_count
            FROM stations s
            JOIN measurements m ON m.station_id = s.id
            GROUP BY s.code
            ORDER BY measurement_count DESC, s.code
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(stations)
    }

    /// All stations with their measurement counts, optionally filtered by a
    /// case-insensitive substring of the code
    #[instrument(skip(self))]
    pub async fn station_counts(&self, search: Option<&str>) -> Result<Vec<StationCount>, DbError> {
        let pattern = search.map(|s| format!("%{}%", escape_like(s)));

        let stations = sqlx::query_as::<_, StationCount>(
            r#"
            SELECT s.code, COUNT(m.id) AS measurement_count
            FROM stations s
            LEFT JOIN measurements m ON m.station_id = s.id
            WHERE $1::text IS NULL OR s.code ILIKE $1
            GROUP BY s.code
            ORDER BY s.code
            "#,
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        debug!("Found {} stations", stations.len());
        Ok(stations)
    }

    /// Indicators with their measurement counts, most measured first
    #[instrument(skip(self))]
    pub async fn indicator_counts(&self) -> Result<Vec<IndicatorCount>, DbError> {
        let indicators = sqlx::query_as::<_, IndicatorCount>(
            r#"
            SELECT i.code, i.unit, COUNT(m.id) AS measurement_count
            FROM indicators i
            LEFT JOIN measurements m ON m.indicator_id = i.id
            GROUP BY i.code, i.unit
            ORDER BY measurement_count DESC, i.code, i.unit
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(indicators)
    }

    /// Monthly averages of one series, rounded to two decimals, oldest first.
    ///
    /// `indicator_ids` are the indicators the query's code was resolved to;
    /// the query's unit narrows them further.
    #[instrument(skip(self))]
    pub async fn monthly_averages(
        &self,
        query: &SeriesQuery,
        indicator_ids: &[i32],
    ) -> Result<Vec<MonthlyAverage>, DbError> {
        let months = sqlx::query_as::<_, MonthlyAverage>(
            r#"
            SELECT
                EXTRACT(YEAR FROM m.measured_at)::int4 AS year,
                EXTRACT(MONTH FROM m.measured_at)::int4 AS month,
                COUNT(*) AS measurement_count,
                ROUND(AVG(m.value)::numeric, 2)::float8 AS average
            FROM measurements m
            JOIN stations s ON s.id = m.station_id
            JOIN indicators i ON i.id = m.indicator_id
            WHERE s.code = $1
              AND i.id = ANY($2)
              AND ($3::text IS NULL OR i.unit = $3)
              AND ($4::timestamp IS NULL OR m.measured_at >= $4)
              AND ($5::timestamp IS NULL OR m.measured_at < $5)
            GROUP BY 1, 2
            ORDER BY 1, 2
            "#,
        )
        .bind(&query.station_code)
        .bind(indicator_ids)
        .bind(query.unit.as_deref())
        .bind(query.from)
        .bind(query.until)
        .fetch_all(&self.pool)
        .await?;

        debug!("Found {} months of data", months.len());
        Ok(months)
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("War"), "War");
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }
}
