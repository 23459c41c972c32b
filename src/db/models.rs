use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

// Database entity models
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Station {
    pub id: i32,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Indicator {
    pub id: i32,
    pub code: String,
    pub unit: String,
    pub created_at: DateTime<Utc>,
}

impl Indicator {
    /// Averaging period of wide-layout codes such as `NO2/1g`
    pub fn averaging(&self) -> Option<&str> {
        self.code.split_once('/').map(|(_, averaging)| averaging)
    }
}

/// Measurement with references already resolved to surrogate ids
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewMeasurement {
    pub station_id: i32,
    pub indicator_id: i32,
    pub measured_at: NaiveDateTime,
    pub value: f64,
}

/// Import status of one archive member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Done,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Done => "done",
            ImportStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "done" => Ok(ImportStatus::Done),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(other.to_string()),
        }
    }
}

/// Stable identity of an archive member across runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileIdentity {
    pub archive_name: String,
    pub member_name: String,
}

impl FileIdentity {
    pub fn new(archive_name: impl Into<String>, member_name: impl Into<String>) -> Self {
        Self {
            archive_name: archive_name.into(),
            member_name: member_name.into(),
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.archive_name, self.member_name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportFileRecord {
    pub id: i32,
    #[serde(flatten)]
    pub identity: FileIdentity,
    pub status: ImportStatus,
    pub error_message: Option<String>,
    pub records_imported: i32,
    pub records_skipped: i32,
    pub records_duplicate: i32,
    pub content_crc32: Option<i64>,
    pub attempt_count: i32,
    pub first_attempt_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportFileRecord {
    /// True when the stored checksum is known and differs from `crc32`
    pub fn content_changed(&self, crc32: u32) -> bool {
        self.content_crc32
            .is_some_and(|stored| stored != i64::from(crc32))
    }
}

// Reporting rows
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DatabaseTotals {
    pub stations: i64,
    pub indicators: i64,
    pub measurements: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StationCount {
    pub code: String,
    pub measurement_count: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct IndicatorCount {
    pub code: String,
    pub unit: String,
    pub measurement_count: i64,
}

/// Average of one station/indicator series over one calendar month
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct MonthlyAverage {
    pub year: i32,
    pub month: i32,
    pub measurement_count: i64,
    pub average: f64,
}

impl MonthlyAverage {
    pub fn label(&self) -> String {
        format!("{}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_status_round_trip_strings() {
        for status in [ImportStatus::Pending, ImportStatus::Done, ImportStatus::Failed] {
            assert_eq!(status.as_str().parse::<ImportStatus>().unwrap(), status);
        }
        assert_eq!(
            "in_progress".parse::<ImportStatus>(),
            Err("in_progress".to_string())
        );
    }

    #[test]
    fn test_file_identity_display() {
        let id = FileIdentity::new("data/2024.zip", "2024_NO2_1g.xlsx");
        assert_eq!(id.to_string(), "data/2024.zip!2024_NO2_1g.xlsx");
    }
}
