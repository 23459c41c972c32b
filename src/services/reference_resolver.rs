use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::db::{DbError, NewMeasurement, ReferenceRepository};
use crate::importers::MeasurementRecord;

/// Maps station codes and (indicator, unit) pairs to surrogate ids.
///
/// Owned by a single import run; the cache only saves lookups and is dropped
/// with the resolver. Reference rows are committed as they are created, so a
/// cached id always exists in the database.
pub struct ReferenceResolver {
    repo: ReferenceRepository,
    stations: HashMap<String, i32>,
    indicators: HashMap<(String, String), i32>,
}

impl ReferenceResolver {
    pub fn new(repo: ReferenceRepository) -> Self {
        Self {
            repo,
            stations: HashMap::new(),
            indicators: HashMap::new(),
        }
    }

    pub async fn resolve_station(&mut self, code: &str) -> Result<i32, DbError> {
        if let Some(id) = self.stations.get(code) {
            return Ok(*id);
        }

        let id = self.repo.get_or_create_station(code).await?;
        self.stations.insert(code.to_string(), id);
        Ok(id)
    }

    pub async fn resolve_indicator(&mut self, code: &str, unit: &str) -> Result<i32, DbError> {
        let key = (code.to_string(), unit.to_string());
        if let Some(id) = self.indicators.get(&key) {
            return Ok(*id);
        }

        let id = self.repo.get_or_create_indicator(code, unit).await?;
        self.indicators.insert(key, id);
        Ok(id)
    }

    /// Resolve the references of every record, preserving order
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn resolve_batch(
        &mut self,
        records: &[MeasurementRecord],
    ) -> Result<Vec<NewMeasurement>, DbError> {
        let mut batch = Vec::with_capacity(records.len());

        for record in records {
            let station_id = self.resolve_station(&record.station_code).await?;
            let indicator_id = self
                .resolve_indicator(&record.indicator_code, &record.unit)
                .await?;

            batch.push(NewMeasurement {
                station_id,
                indicator_id,
                measured_at: record.measured_at,
                value: record.value,
            });
        }

        debug!(
            "Resolved batch; cache holds {} stations, {} indicators",
            self.stations.len(),
            self.indicators.len()
        );
        Ok(batch)
    }

    pub fn cached_stations(&self) -> usize {
        self.stations.len()
    }

    pub fn cached_indicators(&self) -> usize {
        self.indicators.len()
    }
}
