/// Shared helpers for the reporting commands
use chrono::{NaiveDate, NaiveDateTime};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Full English month name for a 1-based month number
///
/// ```
/// use air_quality_importer::utils::month_name;
///
/// assert_eq!(month_name(1), "January");
/// assert_eq!(month_name(13), "?");
/// ```
pub fn month_name(month: i32) -> &'static str {
    usize::try_from(month - 1)
        .ok()
        .and_then(|i| MONTH_NAMES.get(i))
        .copied()
        .unwrap_or("?")
}

/// Three-letter month abbreviation, e.g. `Jan`
pub fn month_abbrev(month: i32) -> &'static str {
    let name = month_name(month);
    name.get(..3).unwrap_or(name)
}

/// Turn an inclusive year range into `[from, until)` timestamp bounds.
///
/// `to` covers the whole year, so the upper bound is January 1st of the next one.
///
/// ```
/// use air_quality_importer::utils::year_bounds;
///
/// let (from, until) = year_bounds(Some(2020), Some(2021));
/// assert_eq!(from.unwrap().to_string(), "2020-01-01 00:00:00");
/// assert_eq!(until.unwrap().to_string(), "2022-01-01 00:00:00");
/// ```
pub fn year_bounds(
    from: Option<i32>,
    to: Option<i32>,
) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
    (
        from.and_then(start_of_year),
        to.and_then(|year| year.checked_add(1)).and_then(start_of_year),
    )
}

fn start_of_year(year: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Shorten a message for table output, appending `...` when cut
pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let cut: String = value.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_abbrev() {
        assert_eq!(month_abbrev(1), "Jan");
        assert_eq!(month_abbrev(9), "Sep");
        assert_eq!(month_abbrev(12), "Dec");
        assert_eq!(month_abbrev(0), "?");
    }

    #[test]
    fn test_year_bounds_open_ended() {
        assert_eq!(year_bounds(None, None), (None, None));

        let (from, until) = year_bounds(None, Some(2019));
        assert!(from.is_none());
        assert_eq!(until.unwrap().to_string(), "2020-01-01 00:00:00");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 50), "short");
        let long = "x".repeat(60);
        let cut = truncate(&long, 50);
        assert_eq!(cut.chars().count(), 50);
        assert!(cut.ends_with("..."));
        // multi-byte characters are not split
        assert_eq!(truncate("źźźźźź", 5), "źź...");
    }
}
