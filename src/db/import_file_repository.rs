use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use crate::db::{DbError, FileIdentity, ImportFileRecord, ImportStatus};

/// Which status records `list` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    /// Everything not yet `done`
    Incomplete,
}

/// What a run does with files that failed in an earlier run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedFilePolicy {
    /// Leave them failed until `reset_failed` is run
    #[default]
    Skip,
    /// Attempt them again in this run
    Retry,
}

/// Permission to process one file, handed out by `begin_attempt`.
///
/// Consumed by exactly one of `commit_done` or `mark_failed`; it cannot be
/// constructed elsewhere, so a file only changes status through an attempt.
#[derive(Debug)]
pub struct ImportAttempt {
    import_file_id: i32,
    identity: FileIdentity,
}

impl ImportAttempt {
    pub fn import_file_id(&self) -> i32 {
        self.import_file_id
    }

    pub fn identity(&self) -> &FileIdentity {
        &self.identity
    }
}

#[derive(Debug)]
pub enum AttemptDecision {
    Proceed(ImportAttempt),
    AlreadyDone(ImportFileRecord),
    PreviouslyFailed(ImportFileRecord),
}

/// Counters stored with a completed file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileImportStats {
    pub records_imported: u64,
    pub records_duplicate: u64,
    pub records_skipped: u64,
}

impl FileImportStats {
    /// Counters as stored: (imported, duplicate, skipped)
    fn columns(&self) -> Result<(i32, i32, i32), DbError> {
        let column = |counter: &'static str, value: u64| {
            i32::try_from(value).map_err(|_| DbError::CounterOverflow { counter, value })
        };
        Ok((
            column("records_imported", self.records_imported)?,
            column("records_duplicate", self.records_duplicate)?,
            column("records_skipped", self.records_skipped)?,
        ))
    }
}

/// Commit of a `done` mark failed; the attempt is handed back so the caller
/// can record the failure.
#[derive(Debug)]
pub struct CommitError {
    pub attempt: ImportAttempt,
    pub source: DbError,
}

#[derive(FromRow)]
struct ImportFileRow {
    id: i32,
    archive_name: String,
    member_name: String,
    status: String,
    error_message: Option<String>,
    records_imported: i32,
    records_skipped: i32,
    records_duplicate: i32,
    content_crc32: Option<i64>,
    attempt_count: i32,
    first_attempt_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ImportFileRow> for ImportFileRecord {
    type Error = DbError;

    fn try_from(row: ImportFileRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(DbError::InvalidStatus)?;
        Ok(ImportFileRecord {
            id: row.id,
            identity: FileIdentity::new(row.archive_name, row.member_name),
            status,
            error_message: row.error_message,
            records_imported: row.records_imported,
            records_skipped: row.records_skipped,
            records_duplicate: row.records_duplicate,
            content_crc32: row.content_crc32,
            attempt_count: row.attempt_count,
            first_attempt_at: row.first_attempt_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

const RECORD_COLUMNS: &str = "id, archive_name, member_name, status, error_message, \
     records_imported, records_skipped, records_duplicate, content_crc32, attempt_count, \
     first_attempt_at, updated_at, completed_at";

/// Per-file import status tracker
#[derive(Clone)]
pub struct ImportFileRepository {
    pool: PgPool,
}

impl ImportFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Status of a file, `None` when it was never attempted
    #[instrument(skip(self), fields(file = %identity))]
    pub async fn get_status(&self, identity: &FileIdentity) -> Result<Option<ImportStatus>, DbError> {
        Ok(self.find(identity).await?.map(|record| record.status))
    }

    #[instrument(skip(self), fields(file = %identity))]
    pub async fn find(&self, identity: &FileIdentity) -> Result<Option<ImportFileRecord>, DbError> {
        let row = sqlx::query_as::<_, ImportFileRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM import_files WHERE archive_name = $1 AND member_name = $2"
        ))
        .bind(&identity.archive_name)
        .bind(&identity.member_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ImportFileRecord::try_from).transpose()
    }

    /// Register the file (pending on first sight) and decide whether to process it.
    #[instrument(skip(self), fields(file = %identity))]
    pub async fn begin_attempt(
        &self,
        identity: &FileIdentity,
        crc32: u32,
        policy: FailedFilePolicy,
    ) -> Result<AttemptDecision, DbError> {
        let row = sqlx::query_as::<_, ImportFileRow>(&format!(
            r#"
            INSERT INTO import_files (archive_name, member_name, status, content_crc32)
            VALUES ($1, $2, 'pending', $3)
            ON CONFLICT (archive_name, member_name)
                DO UPDATE SET member_name = EXCLUDED.member_name
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&identity.archive_name)
        .bind(&identity.member_name)
        .bind(i64::from(crc32))
        .fetch_one(&self.pool)
        .await?;
        let record = ImportFileRecord::try_from(row)?;

        match (record.status, policy) {
            (ImportStatus::Done, _) => {
                debug!("Already imported, skipping");
                return Ok(AttemptDecision::AlreadyDone(record));
            }
            (ImportStatus::Failed, FailedFilePolicy::Skip) => {
                debug!("Failed in an earlier run, waiting for reset");
                return Ok(AttemptDecision::PreviouslyFailed(record));
            }
            (ImportStatus::Failed, FailedFilePolicy::Retry) | (ImportStatus::Pending, _) => {}
        }

        sqlx::query(
            r#"
            UPDATE import_files
            SET attempt_count = attempt_count + 1,
                content_crc32 = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(i64::from(crc32))
        .execute(&self.pool)
        .await?;

        debug!(
            "Starting attempt {} (was {})",
            record.attempt_count + 1,
            record.status
        );
        Ok(AttemptDecision::Proceed(ImportAttempt {
            import_file_id: record.id,
            identity: record.identity,
        }))
    }

    /// Mark the file done inside its load transaction, then commit.
    ///
    /// Either the measurements and the `done` mark become visible together or
    /// neither does; in the latter case the attempt comes back in the error.
    #[instrument(skip(self, tx, attempt), fields(file = %attempt.identity))]
    pub async fn commit_done(
        &self,
        mut tx: Transaction<'_, Postgres>,
        attempt: ImportAttempt,
        stats: &FileImportStats,
    ) -> Result<(), CommitError> {
        let (imported, duplicate, skipped) = match stats.columns() {
            Ok(columns) => columns,
            Err(source) => return Err(CommitError { attempt, source }),
        };

        let update = sqlx::query(
            r#"
            UPDATE import_files
            SET status = 'done',
                error_message = NULL,
                records_imported = $2,
                records_duplicate = $3,
                records_skipped = $4,
                updated_at = NOW(),
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(attempt.import_file_id)
        .bind(imported)
        .bind(duplicate)
        .bind(skipped)
        .execute(&mut *tx)
        .await;

        let result = match update {
            Ok(_) => tx.commit().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(
                    "{} marked as done ({} imported)",
                    attempt.identity, stats.records_imported
                );
                Ok(())
            }
            Err(e) => Err(CommitError {
                attempt,
                source: e.into(),
            }),
        }
    }

    /// Record a failed attempt with its error summary
    #[instrument(skip(self, attempt), fields(file = %attempt.identity))]
    pub async fn mark_failed(&self, attempt: ImportAttempt, reason: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE import_files
            SET status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(attempt.import_file_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        warn!("{} marked as failed: {}", attempt.identity, reason);
        Ok(())
    }

    /// Move every failed file back to pending; returns how many were reset
    #[instrument(skip(self))]
    pub async fn reset_failed(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE import_files
            SET status = 'pending',
                updated_at = NOW()
            WHERE status = 'failed'
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Reset {} failed files to pending", result.rows_affected());
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    pub async fn list(&self, filter: StatusFilter) -> Result<Vec<ImportFileRecord>, DbError> {
        let condition = match filter {
            StatusFilter::All => "TRUE",
            StatusFilter::Incomplete => "status <> 'done'",
        };

        let rows = sqlx::query_as::<_, ImportFileRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM import_files WHERE {condition} \
             ORDER BY archive_name, member_name"
        ))
        .fetch_all(&self.pool)
        .await?;

        debug!("Found {} import files", rows.len());
        rows.into_iter().map(ImportFileRecord::try_from).collect()
    }
}
