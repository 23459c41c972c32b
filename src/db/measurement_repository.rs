use chrono::NaiveDateTime;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument};

use crate::db::{DbError, NewMeasurement};

#[derive(Clone)]
pub struct MeasurementRepository {
    pool: PgPool,
}

impl MeasurementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert measurements inside the caller's transaction.
    ///
    /// Rows whose (station, indicator, timestamp) already exists are ignored,
    /// including duplicates within `measurements` itself. Returns the number of
    /// rows actually inserted. `batch_size` only controls statement size.
    #[instrument(skip(self, tx, measurements), fields(count = measurements.len()))]
    pub async fn insert_batch(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        import_file_id: i32,
        measurements: &[NewMeasurement],
        batch_size: usize,
    ) -> Result<u64, DbError> {
        let mut inserted = 0;

        for chunk in measurements.chunks(batch_size.max(1)) {
            let station_ids: Vec<i32> = chunk.iter().map(|m| m.station_id).collect();
            let indicator_ids: Vec<i32> = chunk.iter().map(|m| m.indicator_id).collect();
            let measured_at: Vec<NaiveDateTime> = chunk.iter().map(|m| m.measured_at).collect();
            let values: Vec<f64> = chunk.iter().map(|m| m.value).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO measurements (station_id, indicator_id, import_file_id, measured_at, value)
                SELECT batch.station_id, batch.indicator_id, $5, batch.measured_at, batch.value
                FROM UNNEST($1::int4[], $2::int4[], $3::timestamp[], $4::float8[])
                    AS batch(station_id, indicator_id, measured_at, value)
                ON CONFLICT ON CONSTRAINT uq_measurement DO NOTHING
                "#,
            )
            .bind(&station_ids)
            .bind(&indicator_ids)
            .bind(&measured_at)
            .bind(&values)
            .bind(import_file_id)
            .execute(&mut **tx)
            .await?;

            inserted += result.rows_affected();
            debug!(
                "Chunk of {} rows: {} inserted",
                chunk.len(),
                result.rows_affected()
            );
        }

        info!(
            "Inserted {} new measurements, {} duplicates skipped",
            inserted,
            measurements.len() as u64 - inserted
        );
        Ok(inserted)
    }

    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM measurements")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Measurements first delivered by one import file
    #[instrument(skip(self))]
    pub async fn count_for_import_file(&self, import_file_id: i32) -> Result<i64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM measurements WHERE import_file_id = $1")
                .bind(import_file_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    #[instrument(skip(self))]
    pub async fn count_for_station(&self, station_code: &str) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM measurements m
            JOIN stations s ON s.id = m.station_id
            WHERE s.code = $1
            "#,
        )
        .bind(station_code)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
