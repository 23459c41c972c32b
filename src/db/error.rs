#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Unknown import status '{0}' in import_files")]
    InvalidStatus(String),
    #[error("Counter {counter} = {value} does not fit the import_files column")]
    CounterOverflow { counter: &'static str, value: u64 },
}
