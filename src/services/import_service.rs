use std::path::{Path, PathBuf};
use std::time::Instant;

use indicatif::ProgressBar;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::task::JoinError;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::db::{
    AttemptDecision, CommitError, DbError, FileIdentity, FileImportStats, ImportAttempt,
    ImportFileRepository, MeasurementRepository, ReferenceRepository,
};
use crate::importers::{
    parse_member, ArchiveError, ArchiveReader, MemberEntry, MemberFormat, ParseError,
};
use crate::services::ReferenceResolver;

/// Failure of a single member; recorded as its `failed` status
#[derive(Debug, thiserror::Error)]
pub enum FileImportError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Database error: {0}")]
    Storage(#[from] DbError),

    #[error("Parser task failed: {0}")]
    Task(#[from] JoinError),
}

/// Failure that stops the whole run
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Database error: {0}")]
    Storage(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Imported { stats: FileImportStats },
    /// Done in an earlier run; `content_changed` when the member checksum differs
    SkippedDone { content_changed: bool },
    /// Failed in an earlier run and not retried
    SkippedFailed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberResult {
    pub member_name: String,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveSummary {
    pub archive_name: String,
    pub members: Vec<MemberResult>,
    /// Members ignored by skip pattern or unsupported extension
    pub ignored: usize,
}

impl ArchiveSummary {
    fn count(&self, predicate: impl Fn(&FileOutcome) -> bool) -> usize {
        self.members.iter().filter(|m| predicate(&m.outcome)).count()
    }

    pub fn imported_files(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Imported { .. }))
    }

    pub fn skipped_files(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::SkippedDone { .. } | FileOutcome::SkippedFailed))
    }

    pub fn failed_files(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    pub fn changed_files(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                FileOutcome::SkippedDone {
                    content_changed: true
                }
            )
        })
    }

    pub fn records_imported(&self) -> u64 {
        self.members
            .iter()
            .map(|m| match &m.outcome {
                FileOutcome::Imported { stats } => stats.records_imported,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub archives: Vec<ArchiveSummary>,
}

impl ImportSummary {
    pub fn imported_files(&self) -> usize {
        self.archives.iter().map(ArchiveSummary::imported_files).sum()
    }

    pub fn skipped_files(&self) -> usize {
        self.archives.iter().map(ArchiveSummary::skipped_files).sum()
    }

    pub fn failed_files(&self) -> usize {
        self.archives.iter().map(ArchiveSummary::failed_files).sum()
    }

    pub fn changed_files(&self) -> usize {
        self.archives.iter().map(ArchiveSummary::changed_files).sum()
    }

    pub fn records_imported(&self) -> u64 {
        self.archives.iter().map(ArchiveSummary::records_imported).sum()
    }

    /// Failed members as (archive, member, reason)
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.archives.iter().flat_map(|archive| {
            archive.members.iter().filter_map(move |m| match &m.outcome {
                FileOutcome::Failed { reason } => Some((
                    archive.archive_name.as_str(),
                    m.member_name.as_str(),
                    reason.as_str(),
                )),
                _ => None,
            })
        })
    }
}

/// Imports zip archives member by member, recording each member's status
#[derive(Clone)]
pub struct ImportService {
    pool: PgPool,
    reference_repo: ReferenceRepository,
    measurement_repo: MeasurementRepository,
    import_file_repo: ImportFileRepository,
    config: Config,
    progress: Option<ProgressBar>,
}

impl ImportService {
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self {
            reference_repo: ReferenceRepository::new(pool.clone()),
            measurement_repo: MeasurementRepository::new(pool.clone()),
            import_file_repo: ImportFileRepository::new(pool.clone()),
            pool,
            config,
            progress: None,
        }
    }

    /// Report the member being processed on a spinner
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Import archives in the given order.
    ///
    /// Member failures are recorded and do not stop the run; an archive that
    /// cannot be opened or a status record that cannot be written does.
    #[instrument(skip(self, archives), fields(archives = archives.len()))]
    pub async fn import_archives(&self, archives: &[PathBuf]) -> Result<ImportSummary, ImportError> {
        let start_time = Instant::now();
        let mut resolver = ReferenceResolver::new(self.reference_repo.clone());
        let mut summary = ImportSummary::default();

        for path in archives {
            let archive = self.import_archive(path, &mut resolver).await?;
            summary.archives.push(archive);
        }

        info!(
            "Import finished in {:.2}s: {} files imported, {} skipped, {} failed, {} records",
            start_time.elapsed().as_secs_f64(),
            summary.imported_files(),
            summary.skipped_files(),
            summary.failed_files(),
            summary.records_imported()
        );
        if summary.failed_files() > 0 {
            warn!(
                "{} files failed; inspect them with import-status and retry after reset-failed",
                summary.failed_files()
            );
        }

        Ok(summary)
    }

    #[instrument(skip(self, resolver), fields(archive = %path.display()))]
    pub async fn import_archive(
        &self,
        path: &Path,
        resolver: &mut ReferenceResolver,
    ) -> Result<ArchiveSummary, ImportError> {
        let archive_name = path.display().to_string();
        let mut reader = ArchiveReader::open(path)?;
        let entries = reader.entries()?;
        info!("Processing {} ({} members)", archive_name, entries.len());

        let mut summary = ArchiveSummary {
            archive_name: archive_name.clone(),
            ..Default::default()
        };

        for entry in &entries {
            if self.config.is_skipped_member(&entry.name) {
                debug!("Skipping {} (matches skip pattern)", entry.name);
                summary.ignored += 1;
                continue;
            }
            let Some(format) = MemberFormat::from_name(&entry.name) else {
                debug!("Skipping {} (unsupported format)", entry.name);
                summary.ignored += 1;
                continue;
            };

            if let Some(progress) = &self.progress {
                progress.set_message(format!("{archive_name}: {}", entry.name));
            }

            let identity = FileIdentity::new(archive_name.clone(), entry.name.clone());
            let outcome = self
                .import_member(&mut reader, identity, entry, format, resolver)
                .await?;

            summary.members.push(MemberResult {
                member_name: entry.name.clone(),
                outcome,
            });
        }

        info!(
            "Finished {}: {} imported, {} skipped, {} failed",
            archive_name,
            summary.imported_files(),
            summary.skipped_files(),
            summary.failed_files()
        );
        Ok(summary)
    }

    async fn import_member(
        &self,
        reader: &mut ArchiveReader,
        identity: FileIdentity,
        entry: &MemberEntry,
        format: MemberFormat,
        resolver: &mut ReferenceResolver,
    ) -> Result<FileOutcome, ImportError> {
        let attempt = match self
            .import_file_repo
            .begin_attempt(&identity, entry.crc32, self.config.failed_policy)
            .await?
        {
            AttemptDecision::Proceed(attempt) => attempt,
            AttemptDecision::AlreadyDone(record) => {
                let content_changed = record.content_changed(entry.crc32);
                if content_changed {
                    warn!(
                        "{} was imported before but its content changed; not re-importing",
                        identity
                    );
                }
                return Ok(FileOutcome::SkippedDone { content_changed });
            }
            AttemptDecision::PreviouslyFailed(record) => {
                info!(
                    "{} failed earlier ({}); run reset-failed to retry",
                    identity,
                    record.error_message.as_deref().unwrap_or("no message")
                );
                return Ok(FileOutcome::SkippedFailed);
            }
        };

        let (tx, stats) = match self
            .load_member(reader, entry, format, &attempt, resolver)
            .await
        {
            Ok(loaded) => loaded,
            Err(e) => return self.fail(attempt, &e).await,
        };

        match self.import_file_repo.commit_done(tx, attempt, &stats).await {
            Ok(()) => Ok(FileOutcome::Imported { stats }),
            Err(CommitError { attempt, source }) => {
                self.fail(attempt, &FileImportError::Storage(source)).await
            }
        }
    }

    /// Read, parse and load one member into an open transaction
    async fn load_member(
        &self,
        reader: &mut ArchiveReader,
        entry: &MemberEntry,
        format: MemberFormat,
        attempt: &ImportAttempt,
        resolver: &mut ReferenceResolver,
    ) -> Result<(Transaction<'static, Postgres>, FileImportStats), FileImportError> {
        let content = reader.read(entry)?;
        let parsed = tokio::task::spawn_blocking(move || parse_member(format, &content)).await??;
        debug!(
            "Parsed {} records ({} empty cells) from {}",
            parsed.records.len(),
            parsed.skipped,
            entry.name
        );

        let measurements = resolver.resolve_batch(&parsed.records).await?;

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let inserted = self
            .measurement_repo
            .insert_batch(
                &mut tx,
                attempt.import_file_id(),
                &measurements,
                self.config.batch_size,
            )
            .await?;

        let stats = FileImportStats {
            records_imported: inserted,
            records_duplicate: measurements.len() as u64 - inserted,
            records_skipped: parsed.skipped as u64,
        };
        Ok((tx, stats))
    }

    async fn fail(
        &self,
        attempt: ImportAttempt,
        err: &FileImportError,
    ) -> Result<FileOutcome, ImportError> {
        let reason = err.to_string();
        error!("Failed to import {}: {}", attempt.identity(), reason);
        self.import_file_repo.mark_failed(attempt, &reason).await?;
        Ok(FileOutcome::Failed { reason })
    }
}
