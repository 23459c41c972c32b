use std::path::PathBuf;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use air_quality_importer::config::Config;
use air_quality_importer::db::{
    DbPool, FailedFilePolicy, ImportFileRepository, ImportStatus, SeriesQuery, StatusFilter,
};
use air_quality_importer::services::{
    ImportService, ImportSummary, MonthlyReport, RankedMonth, ReportService, SeasonalityReport,
};
use air_quality_importer::utils::{month_name, truncate, year_bounds};

/// Longest error message shown in the import-status table
const STATUS_MESSAGE_WIDTH: usize = 50;

#[derive(Parser)]
#[command(name = "air-quality")]
#[command(about = "Import air-quality measurement archives into PostgreSQL", long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(short = 'd', long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the database schema
    InitDb,

    /// Import zip archives with CSV or XLSX measurement files
    Import {
        /// Archives to import, processed in the given order
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Log per-file progress
        #[arg(short, long)]
        verbose: bool,

        /// Attempt files that failed in earlier runs again
        #[arg(long)]
        retry_failed: bool,

        /// Measurements per INSERT statement (overrides IMPORT_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show totals, top stations and indicators
    Stats,

    /// Show per-file import status (only unfinished files by default)
    ImportStatus {
        /// Include files that were imported successfully
        #[arg(short, long)]
        all: bool,

        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Make failed files eligible for the next import run
    ResetFailed,

    /// List stations with their measurement counts
    Stations {
        /// Case-insensitive filter on the station code
        #[arg(short, long)]
        search: Option<String>,
    },

    /// List indicators with their measurement counts
    Indicators,

    /// Monthly averages of one station and indicator
    Monthly {
        #[command(flatten)]
        series: SeriesArgs,
    },

    /// Lowest and highest 3-month windows per year
    Seasonality {
        #[command(flatten)]
        series: SeriesArgs,
    },
}

#[derive(clap::Args)]
struct SeriesArgs {
    /// Station code (e.g. MzWarAlNiepo)
    station: String,

    /// Indicator code (e.g. NO2, PM10/24g); a bare code also matches its
    /// averaged sheet series such as NO2/1g
    #[arg(default_value = "NO2")]
    indicator: String,

    /// First year to include
    #[arg(long)]
    from: Option<i32>,

    /// Last year to include
    #[arg(long)]
    to: Option<i32>,

    /// Unit to use when the indicator is published in several
    #[arg(long)]
    unit: Option<String>,
}

impl SeriesArgs {
    fn to_query(&self) -> SeriesQuery {
        let (from, until) = year_bounds(self.from, self.to);
        SeriesQuery {
            station_code: self.station.clone(),
            indicator_code: self.indicator.clone(),
            unit: self.unit.clone(),
            from,
            until,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before parsing so DATABASE_URL can come from it
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let verbose = matches!(cli.command, Command::Import { verbose: true, .. });
    let default_filter = if verbose {
        "info,air_quality_importer=debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_target(verbose))
        .init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let database_url = cli
        .database_url
        .ok_or("Missing database URL: set DATABASE_URL or pass --database-url")?;
    let config = Config::from_env();

    let db = DbPool::connect(&database_url, config.max_connections).await?;
    let pool = db.pool().clone();

    match cli.command {
        Command::InitDb => {
            db.migrate().await?;
            println!("Database initialized");
        }
        Command::Import {
            archives,
            retry_failed,
            batch_size,
            ..
        } => {
            let policy = if retry_failed {
                FailedFilePolicy::Retry
            } else {
                FailedFilePolicy::Skip
            };
            let mut config = config.with_failed_policy(policy);
            if let Some(size) = batch_size {
                config.batch_size = size.max(1);
            }

            println!("Importing {} archive(s)", archives.len());
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(120));

            let service = ImportService::new(pool, config).with_progress(pb.clone());
            let summary = service.import_archives(&archives).await;
            pb.finish_and_clear();

            print_import_summary(&summary?);
        }
        Command::Stats => {
            let stats = ReportService::new(pool).database_stats().await?;

            println!("Database statistics:");
            println!("   Stations: {}", stats.totals.stations);
            println!("   Indicators: {}", stats.totals.indicators);
            println!("   Measurements: {}", stats.totals.measurements);

            if !stats.top_stations.is_empty() {
                println!("\n   Top {} stations (measurements):", stats.top_stations.len());
                for station in &stats.top_stations {
                    println!("      {}: {}", station.code, station.measurement_count);
                }
            }
            if !stats.indicators.is_empty() {
                println!("\n   Indicators (measurements):");
                for indicator in &stats.indicators {
                    println!(
                        "      {} [{}]: {}",
                        indicator.code, indicator.unit, indicator.measurement_count
                    );
                }
            }
        }
        Command::ImportStatus { all, json } => {
            let filter = if all {
                StatusFilter::All
            } else {
                StatusFilter::Incomplete
            };
            let records = ImportFileRepository::new(pool).list(filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                if all {
                    println!("No files imported yet.");
                } else {
                    println!("All files were imported successfully.");
                }
            } else {
                println!("Import status:\n");
                let mut current_archive: Option<&str> = None;
                for record in &records {
                    let archive = record.identity.archive_name.as_str();
                    if current_archive != Some(archive) {
                        current_archive = Some(archive);
                        println!("{archive}");
                    }

                    let mut line = format!("   [{}] {}", record.status, record.identity.member_name);
                    match record.status {
                        ImportStatus::Done => {
                            line.push_str(&format!(" ({} imported)", record.records_imported));
                        }
                        ImportStatus::Failed => {
                            if let Some(message) = &record.error_message {
                                line.push_str(" - ");
                                line.push_str(&truncate(message, STATUS_MESSAGE_WIDTH));
                            }
                        }
                        ImportStatus::Pending => {}
                    }
                    println!("{line}");
                }
            }
        }
        Command::ResetFailed => {
            let reset = ImportFileRepository::new(pool).reset_failed().await?;
            println!("Reset {reset} file(s) to pending");
        }
        Command::Stations { search } => {
            let stations = ReportService::new(pool).stations(search.as_deref()).await?;
            println!("Stations ({}):\n", stations.len());
            for station in &stations {
                println!("   {}: {} measurements", station.code, station.measurement_count);
            }
        }
        Command::Indicators => {
            let indicators = ReportService::new(pool).indicators().await?;
            println!("Indicators ({}):\n", indicators.len());
            for indicator in &indicators {
                println!(
                    "   {} [{}]: {} measurements",
                    indicator.code, indicator.unit, indicator.measurement_count
                );
            }
        }
        Command::Monthly { series } => {
            let report = ReportService::new(pool)
                .monthly_report(&series.to_query())
                .await?;
            print_monthly_report(&series, &report);
        }
        Command::Seasonality { series } => {
            let report = ReportService::new(pool)
                .seasonality_report(&series.to_query())
                .await?;
            print_seasonality_report(&series, &report);
        }
    }

    db.close().await;
    Ok(())
}

fn print_import_summary(summary: &ImportSummary) {
    for archive in &summary.archives {
        println!(
            "{}: {} imported, {} skipped, {} failed, {} ignored",
            archive.archive_name,
            archive.imported_files(),
            archive.skipped_files(),
            archive.failed_files(),
            archive.ignored
        );
    }

    println!("\nImport finished");
    println!("   Measurements imported: {}", summary.records_imported());
    println!("   Files imported: {}", summary.imported_files());
    println!("   Files skipped: {}", summary.skipped_files());
    if summary.changed_files() > 0 {
        println!(
            "   Files changed since their import (not re-imported): {}",
            summary.changed_files()
        );
    }
    if summary.failed_files() > 0 {
        println!("   Files failed: {}", summary.failed_files());
        for (archive, member, reason) in summary.failures() {
            println!("      {archive}!{member}: {reason}");
        }
        info!("Run `air-quality reset-failed` and import again to retry failed files");
    }
}

fn print_monthly_report(series: &SeriesArgs, report: &MonthlyReport) {
    println!(
        "Monthly averages of {} at {} ({} months)\n",
        series.indicator,
        series.station,
        report.months.len()
    );
    for month in &report.months {
        println!(
            "   {}: {:8.2} ({} measurements)",
            month.label(),
            month.average,
            month.measurement_count
        );
    }

    println!("\nYearly means:");
    for (year, mean) in &report.yearly_means {
        println!("   {year}: {mean:.1}");
    }

    let names = |months: &[RankedMonth]| {
        months
            .iter()
            .map(|m| format!("{} ({}x)", month_name(m.month), m.years_in_rank))
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!("\nTypically highest: {}", names(&report.typically_highest));
    println!("Typically lowest: {}", names(&report.typically_lowest));
}

fn print_seasonality_report(series: &SeriesArgs, report: &SeasonalityReport) {
    let rule = "=".repeat(70);
    println!("{rule}");
    println!(
        "3-month windows of {} (station {})",
        series.indicator, series.station
    );
    println!("{rule}");

    for year in &report.years {
        println!("\nYear {}:", year.year);
        println!(
            "   Lowest:  {:12} = {:6.2}",
            year.lowest.label(),
            year.lowest.average
        );
        println!(
            "   Highest: {:12} = {:6.2}",
            year.highest.label(),
            year.highest.average
        );
        println!(
            "   Difference: {:6.2} (+{:.0}%)",
            year.difference(),
            year.percent()
        );
    }

    println!("\n{rule}");
    println!("SUMMARY");
    println!("{rule}");
    println!("\nMost often lowest:");
    for (label, count) in &report.lowest_counts {
        println!("   {label}: {count}x");
    }
    println!("\nMost often highest:");
    for (label, count) in &report.highest_counts {
        println!("   {label}: {count}x");
    }
}
