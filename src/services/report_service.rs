use std::collections::BTreeMap;

use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::db::{
    DatabaseTotals, DbError, Indicator, IndicatorCount, MonthlyAverage, ReferenceRepository,
    ReportRepository, SeriesQuery, StationCount,
};
use crate::utils::month_abbrev;

/// Stations shown in the `stats` overview
const TOP_STATIONS: i64 = 5;
/// Size of the highest/lowest month groups
const RANK_SIZE: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Database error: {0}")]
    Storage(#[from] DbError),

    #[error("Unknown station '{0}'")]
    UnknownStation(String),

    #[error("Unknown indicator '{0}'")]
    UnknownIndicator(String),

    #[error("No data for station '{station}' and indicator '{indicator}'")]
    NoData { station: String, indicator: String },

    #[error("Indicator '{indicator}' is published in several units ({}), select one", .units.join(", "))]
    AmbiguousUnit {
        indicator: String,
        units: Vec<String>,
    },

    #[error("Indicator '{indicator}' has several averaging periods ({}), use the full code", .codes.join(", "))]
    AmbiguousAveraging {
        indicator: String,
        codes: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub totals: DatabaseTotals,
    pub top_stations: Vec<StationCount>,
    pub indicators: Vec<IndicatorCount>,
}

/// Calendar month ranked across all years of a series
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMonth {
    pub month: i32,
    /// Mean of this month's averages over all years
    pub mean: f64,
    /// Years in which the month was among that year's three highest (or lowest)
    pub years_in_rank: usize,
}

#[derive(Debug, Clone)]
pub struct MonthlyReport {
    pub months: Vec<MonthlyAverage>,
    /// Mean of the monthly averages per year, oldest first
    pub yearly_means: Vec<(i32, f64)>,
    pub typically_highest: Vec<RankedMonth>,
    pub typically_lowest: Vec<RankedMonth>,
}

/// Three consecutive months, possibly reaching into the next year
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonWindow {
    pub start_year: i32,
    pub months: [i32; 3],
    pub average: f64,
}

impl SeasonWindow {
    /// e.g. `Nov-Dec-Jan`
    pub fn label(&self) -> String {
        self.months
            .iter()
            .map(|m| month_abbrev(*m))
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearSeasonality {
    pub year: i32,
    pub lowest: SeasonWindow,
    pub highest: SeasonWindow,
}

impl YearSeasonality {
    pub fn difference(&self) -> f64 {
        self.highest.average - self.lowest.average
    }

    /// Difference relative to the lowest window; 0 when the lowest is not positive
    pub fn percent(&self) -> f64 {
        if self.lowest.average > 0.0 {
            self.difference() / self.lowest.average * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SeasonalityReport {
    pub years: Vec<YearSeasonality>,
    /// Window label and how many years it was the lowest, most frequent first
    pub lowest_counts: Vec<(String, usize)>,
    pub highest_counts: Vec<(String, usize)>,
}

/// Mean of the monthly averages of each year
pub fn yearly_means(months: &[MonthlyAverage]) -> Vec<(i32, f64)> {
    let mut by_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for m in months {
        by_year.entry(m.year).or_default().push(m.average);
    }

    by_year
        .into_iter()
        .map(|(year, values)| (year, mean(&values)))
        .collect()
}

/// Calendar months whose cross-year mean is within the three highest and the
/// three lowest, ties included.
///
/// Returns `(highest, lowest)`, each ordered by `years_in_rank` descending.
pub fn typical_months(months: &[MonthlyAverage]) -> (Vec<RankedMonth>, Vec<RankedMonth>) {
    let mut by_month: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for m in months {
        by_month.entry(m.month).or_default().push(m.average);
    }
    let mut means: Vec<(i32, f64)> = by_month
        .into_iter()
        .map(|(month, values)| (month, mean(&values)))
        .collect();
    if means.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let (top_counts, bottom_counts) = yearly_rank_counts(months);

    means.sort_by(|a, b| a.1.total_cmp(&b.1));
    let bottom_threshold = means[(RANK_SIZE - 1).min(means.len() - 1)].1;
    let mut lowest: Vec<RankedMonth> = means
        .iter()
        .filter(|(_, value)| *value <= bottom_threshold)
        .map(|&(month, value)| RankedMonth {
            month,
            mean: value,
            years_in_rank: bottom_counts[month_index(month)],
        })
        .collect();

    means.reverse();
    let top_threshold = means[(RANK_SIZE - 1).min(means.len() - 1)].1;
    let mut highest: Vec<RankedMonth> = means
        .iter()
        .filter(|(_, value)| *value >= top_threshold)
        .map(|&(month, value)| RankedMonth {
            month,
            mean: value,
            years_in_rank: top_counts[month_index(month)],
        })
        .collect();

    // stable: equal counts keep their order by mean
    lowest.sort_by(|a, b| b.years_in_rank.cmp(&a.years_in_rank));
    highest.sort_by(|a, b| b.years_in_rank.cmp(&a.years_in_rank));
    (highest, lowest)
}

/// Per calendar month, the number of years it was in that year's top and
/// bottom three (ties included). Years with fewer than three months are ignored.
fn yearly_rank_counts(months: &[MonthlyAverage]) -> ([usize; 12], [usize; 12]) {
    let mut top = [0; 12];
    let mut bottom = [0; 12];

    let mut by_year: BTreeMap<i32, Vec<&MonthlyAverage>> = BTreeMap::new();
    for m in months {
        by_year.entry(m.year).or_default().push(m);
    }

    for (_, mut year) in by_year {
        if year.len() < RANK_SIZE {
            continue;
        }
        year.sort_by(|a, b| a.average.total_cmp(&b.average));

        let bottom_threshold = year[RANK_SIZE - 1].average;
        let top_threshold = year[year.len() - RANK_SIZE].average;
        for m in &year {
            if m.average <= bottom_threshold {
                bottom[month_index(m.month)] += 1;
            }
            if m.average >= top_threshold {
                top[month_index(m.month)] += 1;
            }
        }
    }

    (top, bottom)
}

/// Lowest and highest 3-month window of every year with a complete window.
///
/// Windows start in the given year and may end in the next one; all three
/// months must have data.
pub fn seasonality(months: &[MonthlyAverage]) -> SeasonalityReport {
    let data: BTreeMap<(i32, i32), f64> =
        months.iter().map(|m| ((m.year, m.month), m.average)).collect();
    let years: Vec<i32> = {
        let mut years: Vec<i32> = months.iter().map(|m| m.year).collect();
        years.sort_unstable();
        years.dedup();
        years
    };

    let mut report = SeasonalityReport::default();

    for year in years {
        let mut windows: Vec<SeasonWindow> = (1..=12)
            .filter_map(|start| window_at(&data, year, start))
            .collect();
        if windows.is_empty() {
            continue;
        }

        // stable: among equal averages the earliest window is lowest, the latest highest
        windows.sort_by(|a, b| a.average.total_cmp(&b.average));
        let lowest = windows[0].clone();
        let highest = windows[windows.len() - 1].clone();

        bump(&mut report.lowest_counts, lowest.label());
        bump(&mut report.highest_counts, highest.label());
        report.years.push(YearSeasonality {
            year,
            lowest,
            highest,
        });
    }

    report.lowest_counts.sort_by(|a, b| b.1.cmp(&a.1));
    report.highest_counts.sort_by(|a, b| b.1.cmp(&a.1));
    report
}

/// Pick the indicators one report series is averaged over.
///
/// `candidates` are the exact code and its `code/averaging` variants. They
/// must share one unit (after the optional unit filter) and at most one
/// averaging period; a bare code without a period joins that period.
pub fn select_series(
    indicator: &str,
    unit: Option<&str>,
    candidates: &[Indicator],
) -> Result<Vec<i32>, ReportError> {
    let selected: Vec<&Indicator> = candidates
        .iter()
        .filter(|i| unit.map_or(true, |u| i.unit == u))
        .collect();
    if selected.is_empty() {
        let name = match unit {
            Some(unit) => format!("{indicator} [{unit}]"),
            None => indicator.to_string(),
        };
        return Err(ReportError::UnknownIndicator(name));
    }

    let mut units: Vec<String> = selected.iter().map(|i| i.unit.clone()).collect();
    units.sort();
    units.dedup();
    if units.len() > 1 {
        return Err(ReportError::AmbiguousUnit {
            indicator: indicator.to_string(),
            units,
        });
    }

    let mut periods: Vec<&str> = selected.iter().filter_map(|i| i.averaging()).collect();
    periods.sort_unstable();
    periods.dedup();
    if periods.len() > 1 {
        let mut codes: Vec<String> = selected
            .iter()
            .filter(|i| i.averaging().is_some())
            .map(|i| i.code.clone())
            .collect();
        codes.sort();
        codes.dedup();
        return Err(ReportError::AmbiguousAveraging {
            indicator: indicator.to_string(),
            codes,
        });
    }

    Ok(selected.iter().map(|i| i.id).collect())
}

fn window_at(data: &BTreeMap<(i32, i32), f64>, year: i32, start: i32) -> Option<SeasonWindow> {
    let mut months = [0; 3];
    let mut total = 0.0;

    for (i, slot) in months.iter_mut().enumerate() {
        let offset = start - 1 + i as i32;
        let key = (year + offset / 12, offset % 12 + 1);
        total += data.get(&key)?;
        *slot = key.1;
    }

    Some(SeasonWindow {
        start_year: year,
        months,
        average: total / 3.0,
    })
}

fn bump(counts: &mut Vec<(String, usize)>, label: String) {
    match counts.iter_mut().find(|(l, _)| *l == label) {
        Some((_, count)) => *count += 1,
        None => counts.push((label, 1)),
    }
}

fn month_index(month: i32) -> usize {
    (month.clamp(1, 12) - 1) as usize
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Reporting over the stored measurements
#[derive(Clone)]
pub struct ReportService {
    report_repo: ReportRepository,
    reference_repo: ReferenceRepository,
}

impl ReportService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            report_repo: ReportRepository::new(pool.clone()),
            reference_repo: ReferenceRepository::new(pool),
        }
    }

    #[instrument(skip(self))]
    pub async fn database_stats(&self) -> Result<DatabaseStats, ReportError> {
        Ok(DatabaseStats {
            totals: self.report_repo.totals().await?,
            top_stations: self.report_repo.top_stations(TOP_STATIONS).await?,
            indicators: self.report_repo.indicator_counts().await?,
        })
    }

    pub async fn stations(&self, search: Option<&str>) -> Result<Vec<StationCount>, ReportError> {
        Ok(self.report_repo.station_counts(search).await?)
    }

    pub async fn indicators(&self) -> Result<Vec<IndicatorCount>, ReportError> {
        Ok(self.report_repo.indicator_counts().await?)
    }

    #[instrument(skip(self))]
    pub async fn monthly_report(&self, query: &SeriesQuery) -> Result<MonthlyReport, ReportError> {
        let months = self.series(query).await?;
        let (typically_highest, typically_lowest) = typical_months(&months);

        Ok(MonthlyReport {
            yearly_means: yearly_means(&months),
            typically_highest,
            typically_lowest,
            months,
        })
    }

    #[instrument(skip(self))]
    pub async fn seasonality_report(
        &self,
        query: &SeriesQuery,
    ) -> Result<SeasonalityReport, ReportError> {
        let months = self.series(query).await?;
        Ok(seasonality(&months))
    }

    /// Monthly averages of a series; explains an empty result
    async fn series(&self, query: &SeriesQuery) -> Result<Vec<MonthlyAverage>, ReportError> {
        if self
            .reference_repo
            .find_station(&query.station_code)
            .await?
            .is_none()
        {
            return Err(ReportError::UnknownStation(query.station_code.clone()));
        }

        let candidates = self
            .reference_repo
            .find_series_indicators(&query.indicator_code)
            .await?;
        let indicator_ids =
            select_series(&query.indicator_code, query.unit.as_deref(), &candidates)?;
        debug!(
            "Indicator {} resolved to ids {:?}",
            query.indicator_code, indicator_ids
        );

        let months = self
            .report_repo
            .monthly_averages(query, &indicator_ids)
            .await?;
        if months.is_empty() {
            return Err(ReportError::NoData {
                station: query.station_code.clone(),
                indicator: query.indicator_code.clone(),
            });
        }

        debug!("Series has {} months", months.len());
        Ok(months)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(year: i32, month: i32, average: f64) -> MonthlyAverage {
        MonthlyAverage {
            year,
            month,
            measurement_count: 24,
            average,
        }
    }

    fn full_year(year: i32, averages: [f64; 12]) -> Vec<MonthlyAverage> {
        averages
            .iter()
            .enumerate()
            .map(|(i, avg)| month(year, i as i32 + 1, *avg))
            .collect()
    }

    fn indicator(id: i32, code: &str, unit: &str) -> Indicator {
        Indicator {
            id,
            code: code.to_string(),
            unit: unit.to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_select_series_bare_code_matches_wide_layout_code() {
        let candidates = vec![indicator(1, "NO2", "ug/m3"), indicator(2, "NO2/1g", "ug/m3")];

        assert_eq!(select_series("NO2", None, &candidates).unwrap(), vec![1, 2]);
        assert_eq!(
            select_series("NO2", None, &candidates[1..]).unwrap(),
            vec![2]
        );
    }

    #[test]
    fn test_select_series_requires_unit_when_several() {
        let candidates = vec![indicator(1, "CO", "mg/m3"), indicator(2, "CO", "ug/m3")];

        match select_series("CO", None, &candidates) {
            Err(ReportError::AmbiguousUnit { units, .. }) => {
                assert_eq!(units, vec!["mg/m3", "ug/m3"]);
            }
            other => panic!("expected ambiguous unit, got {other:?}"),
        }
        assert_eq!(select_series("CO", Some("ug/m3"), &candidates).unwrap(), vec![2]);
        assert!(matches!(
            select_series("CO", Some("ppm"), &candidates),
            Err(ReportError::UnknownIndicator(name)) if name == "CO [ppm]"
        ));
    }

    #[test]
    fn test_select_series_rejects_mixed_averaging_periods() {
        let candidates = vec![
            indicator(1, "PM10/1g", "ug/m3"),
            indicator(2, "PM10/24g", "ug/m3"),
        ];

        let err = select_series("PM10", None, &candidates).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Indicator 'PM10' has several averaging periods (PM10/1g, PM10/24g), use the full code"
        );
        assert_eq!(
            select_series("PM10/24g", None, &candidates[1..]).unwrap(),
            vec![2]
        );
        assert!(matches!(
            select_series("SO2", None, &[]),
            Err(ReportError::UnknownIndicator(_))
        ));
    }

    #[test]
    fn test_yearly_means() {
        let months = vec![month(2020, 1, 10.0), month(2020, 2, 20.0), month(2021, 1, 5.0)];
        assert_eq!(yearly_means(&months), vec![(2020, 15.0), (2021, 5.0)]);
    }

    #[test]
    fn test_typical_months_winter_high_summer_low() {
        let averages = [
            40.0, 38.0, 30.0, 25.0, 20.0, 15.0, 12.0, 14.0, 22.0, 28.0, 35.0, 42.0,
        ];
        let mut months = full_year(2020, averages);
        months.extend(full_year(2021, averages));

        let (highest, lowest) = typical_months(&months);

        let high: Vec<i32> = highest.iter().map(|m| m.month).collect();
        assert_eq!(high, vec![12, 1, 2]);
        assert!(highest.iter().all(|m| m.years_in_rank == 2));

        let low: Vec<i32> = lowest.iter().map(|m| m.month).collect();
        assert_eq!(low, vec![7, 8, 6]);
        assert!(lowest.iter().all(|m| m.years_in_rank == 2));
    }

    #[test]
    fn test_typical_months_include_ties() {
        // months 2 and 3 tie for third lowest
        let months = vec![
            month(2020, 1, 1.0),
            month(2020, 4, 2.0),
            month(2020, 2, 3.0),
            month(2020, 3, 3.0),
            month(2020, 5, 9.0),
        ];

        let (highest, lowest) = typical_months(&months);

        assert_eq!(lowest.len(), 4);
        let mut low: Vec<i32> = lowest.iter().map(|m| m.month).collect();
        low.sort();
        assert_eq!(low, vec![1, 2, 3, 4]);

        // 5, then the tied 3 and 2 at the third-highest value
        assert_eq!(highest.len(), 3);
        assert_eq!(highest[0].month, 5);
        assert!(highest.iter().all(|m| m.years_in_rank == 1));
    }

    #[test]
    fn test_typical_months_short_years_not_counted() {
        let months = vec![month(2020, 1, 10.0), month(2020, 2, 20.0)];

        let (highest, lowest) = typical_months(&months);

        assert_eq!(highest.len(), 2);
        assert_eq!(lowest.len(), 2);
        assert!(highest.iter().all(|m| m.years_in_rank == 0));
    }

    #[test]
    fn test_typical_months_empty() {
        let (highest, lowest) = typical_months(&[]);
        assert!(highest.is_empty());
        assert!(lowest.is_empty());
    }

    #[test]
    fn test_seasonality_windows_cross_year_end() {
        let mut months = full_year(
            2020,
            [
                30.0, 28.0, 20.0, 15.0, 10.0, 8.0, 9.0, 11.0, 18.0, 25.0, 35.0, 40.0,
            ],
        );
        months.push(month(2021, 1, 45.0));

        let report = seasonality(&months);

        // 2021 has a single month, so no complete window starts there
        assert_eq!(report.years.len(), 1);
        let year = &report.years[0];
        assert_eq!(year.year, 2020);
        assert_eq!(year.lowest.months, [5, 6, 7]);
        assert_eq!(year.lowest.label(), "May-Jun-Jul");
        assert_eq!(year.highest.months, [11, 12, 1]);
        assert_eq!(year.highest.label(), "Nov-Dec-Jan");
        assert!((year.highest.average - 40.0).abs() < 1e-9);
        assert!((year.lowest.average - 9.0).abs() < 1e-9);
        assert!((year.difference() - 31.0).abs() < 1e-9);
        assert!((year.percent() - 344.444).abs() < 0.01);
    }

    #[test]
    fn test_seasonality_requires_three_months() {
        // gap in March breaks every window touching it
        let months = vec![
            month(2020, 1, 1.0),
            month(2020, 2, 2.0),
            month(2020, 4, 4.0),
            month(2020, 5, 5.0),
            month(2020, 6, 6.0),
        ];

        let report = seasonality(&months);

        assert_eq!(report.years.len(), 1);
        assert_eq!(report.years[0].lowest.months, [4, 5, 6]);
        assert_eq!(report.years[0].highest.months, [4, 5, 6]);
    }

    #[test]
    fn test_seasonality_percent_zero_when_lowest_not_positive() {
        let months = vec![
            month(2020, 1, -1.0),
            month(2020, 2, 0.0),
            month(2020, 3, 1.0),
            month(2020, 4, 5.0),
        ];

        let report = seasonality(&months);

        assert_eq!(report.years[0].percent(), 0.0);
        assert!(report.years[0].difference() > 0.0);
    }

    #[test]
    fn test_seasonality_counts_most_frequent_first() {
        let winter_high = [
            30.0, 28.0, 20.0, 15.0, 10.0, 8.0, 9.0, 11.0, 18.0, 25.0, 35.0, 40.0,
        ];
        let mut months = full_year(2019, winter_high);
        months.extend(full_year(2020, winter_high));
        months.extend(full_year(2021, [6.0; 12]));

        let report = seasonality(&months);

        assert_eq!(report.years.len(), 3);
        assert_eq!(report.lowest_counts[0], ("May-Jun-Jul".to_string(), 2));
        assert_eq!(report.lowest_counts.len(), 2);
        // 2019 peaks in Nov-Dec-Jan; 2020 meets a flat 2021 and peaks in Oct-Nov-Dec
        assert_eq!(report.highest_counts[0], ("Oct-Nov-Dec".to_string(), 2));
        assert_eq!(report.highest_counts[1], ("Nov-Dec-Jan".to_string(), 1));
    }
}
