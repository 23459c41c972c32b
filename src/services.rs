pub mod import_service;
pub mod reference_resolver;
pub mod report_service;

pub use import_service::{
    ArchiveSummary, FileImportError, FileOutcome, ImportError, ImportService, ImportSummary,
    MemberResult,
};
pub use reference_resolver::ReferenceResolver;
pub use report_service::{
    DatabaseStats, MonthlyReport, RankedMonth, ReportError, ReportService, SeasonWindow,
    SeasonalityReport, YearSeasonality, select_series,
};
