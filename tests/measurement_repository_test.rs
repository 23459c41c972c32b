// Bulk loading: conflict-ignore, chunking and rollback on storage errors

mod common;

use std::path::Path;

use air_quality_importer::db::{
    AttemptDecision, FailedFilePolicy, FileIdentity, ImportFileRepository, MeasurementRepository,
    NewMeasurement, ReferenceRepository,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serial_test::serial;
use sqlx::PgPool;

const PREFIX: &str = "MEASREPO_";
const ARCHIVE_DIR: &str = "/measrepo";

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 3, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn hourly(station_id: i32, indicator_id: i32, hours: i64) -> Vec<NewMeasurement> {
    (0..hours)
        .map(|h| NewMeasurement {
            station_id,
            indicator_id,
            measured_at: start() + Duration::hours(h),
            value: h as f64 * 0.5,
        })
        .collect()
}

/// Station, indicator and import file ids for a test series
async fn fixtures(pool: &PgPool, station: &str, member: &str) -> (i32, i32, i32) {
    let references = ReferenceRepository::new(pool.clone());
    let station_id = references.get_or_create_station(station).await.unwrap();
    let indicator_id = references.get_or_create_indicator("NO2", "ug/m3").await.unwrap();

    let tracker = ImportFileRepository::new(pool.clone());
    let identity = FileIdentity::new(format!("{ARCHIVE_DIR}/m.zip"), member);
    let import_file_id = match tracker
        .begin_attempt(&identity, 0, FailedFilePolicy::Retry)
        .await
        .unwrap()
    {
        AttemptDecision::Proceed(attempt) => attempt.import_file_id(),
        other => panic!("unexpected decision {other:?}"),
    };

    (station_id, indicator_id, import_file_id)
}

#[tokio::test]
#[serial]
async fn test_insert_batch_ignores_existing_rows() {
    let pool = common::setup_test_db().await;
    common::cleanup(&pool, Path::new(ARCHIVE_DIR), PREFIX).await;
    let (station_id, indicator_id, file_id) = fixtures(&pool, "MEASREPO_A", "a.csv").await;
    let repo = MeasurementRepository::new(pool.clone());

    let mut tx = pool.begin().await.unwrap();
    let inserted = repo
        .insert_batch(&mut tx, file_id, &hourly(station_id, indicator_id, 10), 100)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(inserted, 10);

    // 10 overlapping hours plus 5 new ones
    let mut tx = pool.begin().await.unwrap();
    let inserted = repo
        .insert_batch(&mut tx, file_id, &hourly(station_id, indicator_id, 15), 100)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(inserted, 5);

    assert_eq!(repo.count_for_station("MEASREPO_A").await.unwrap(), 15);
    assert_eq!(repo.count_for_import_file(file_id).await.unwrap(), 15);
    assert!(repo.count().await.unwrap() >= 15);

    common::cleanup(&pool, Path::new(ARCHIVE_DIR), PREFIX).await;
}

#[tokio::test]
#[serial]
async fn test_insert_batch_result_independent_of_batch_size() {
    let pool = common::setup_test_db().await;
    common::cleanup(&pool, Path::new(ARCHIVE_DIR), PREFIX).await;
    let repo = MeasurementRepository::new(pool.clone());

    let mut counts = Vec::new();
    let runs = [("MEASREPO_ONE", 1), ("MEASREPO_BIG", 10_000), ("MEASREPO_MID", 7)];
    for (station, batch_size) in runs {
        let (station_id, indicator_id, file_id) = fixtures(&pool, station, station).await;
        let mut rows = hourly(station_id, indicator_id, 50);
        // in-batch duplicate
        rows.push(rows[3]);

        let mut tx = pool.begin().await.unwrap();
        let inserted = repo
            .insert_batch(&mut tx, file_id, &rows, batch_size)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        counts.push((inserted, repo.count_for_station(station).await.unwrap()));
    }

    assert!(counts.iter().all(|c| *c == (50, 50)), "{counts:?}");

    common::cleanup(&pool, Path::new(ARCHIVE_DIR), PREFIX).await;
}

#[tokio::test]
#[serial]
async fn test_failed_load_leaves_no_rows() {
    let pool = common::setup_test_db().await;
    common::cleanup(&pool, Path::new(ARCHIVE_DIR), PREFIX).await;
    let (station_id, indicator_id, file_id) = fixtures(&pool, "MEASREPO_FK", "fk.csv").await;
    let repo = MeasurementRepository::new(pool.clone());

    let mut rows = hourly(station_id, indicator_id, 20);
    // unknown station in the last chunk
    rows.push(NewMeasurement {
        station_id: -1,
        ..rows[0]
    });

    let mut tx = pool.begin().await.unwrap();
    let result = repo.insert_batch(&mut tx, file_id, &rows, 5).await;
    assert!(result.is_err());
    drop(tx);

    assert_eq!(repo.count_for_station("MEASREPO_FK").await.unwrap(), 0);
    assert_eq!(repo.count_for_import_file(file_id).await.unwrap(), 0);

    common::cleanup(&pool, Path::new(ARCHIVE_DIR), PREFIX).await;
}
