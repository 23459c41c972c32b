pub mod error;
pub mod import_file_repository;
pub mod measurement_repository;
pub mod models;
pub mod pool;
pub mod reference_repository;
pub mod report_repository;

pub use error::DbError;
pub use import_file_repository::{
    AttemptDecision, CommitError, FailedFilePolicy, FileImportStats, ImportAttempt,
    ImportFileRepository, StatusFilter,
};
pub use measurement_repository::MeasurementRepository;
pub use models::*;
pub use pool::DbPool;
pub use reference_repository::ReferenceRepository;
pub use report_repository::{ReportRepository, SeriesQuery};
