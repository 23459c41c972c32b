use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Line {line}: malformed timestamp '{value}'")]
    MalformedTimestamp { line: u64, value: String },

    #[error("Line {line}: invalid measurement value '{value}'")]
    InvalidValue { line: u64, value: String },

    #[error("Line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Line {line}: missing mandatory field '{field}'")]
    MissingField { line: u64, field: &'static str },

    #[error("Header is missing mandatory column '{0}'")]
    MissingColumn(&'static str),

    #[error("Failed to read workbook: {0}")]
    Workbook(String),

    #[error("Unexpected sheet layout: {0}")]
    Layout(String),

    #[error("Line {line}: {message}")]
    Csv { line: u64, message: String },
}

impl ParseError {
    /// Line number of the offending row, when the error is tied to one
    pub fn line(&self) -> Option<u64> {
        match self {
            ParseError::MalformedTimestamp { line, .. }
            | ParseError::InvalidValue { line, .. }
            | ParseError::ColumnCount { line, .. }
            | ParseError::MissingField { line, .. }
            | ParseError::Csv { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// One validated measurement as read from an archive member
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub station_code: String,
    pub indicator_code: String,
    pub unit: String,
    pub measured_at: NaiveDateTime,
    pub value: f64,
}

/// Column positions of the five mandatory fields in a long-layout member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSchema {
    pub station: usize,
    pub indicator: usize,
    pub unit: usize,
    pub timestamp: usize,
    pub value: usize,
    pub width: usize,
}

impl Default for ColumnSchema {
    fn default() -> Self {
        Self {
            station: 0,
            indicator: 1,
            unit: 2,
            timestamp: 3,
            value: 4,
            width: 5,
        }
    }
}

const STATION_HEADERS: &[&str] = &["station", "station_code", "kod stacji", "kod_stacji"];
const INDICATOR_HEADERS: &[&str] = &["indicator", "indicator_code", "wskaźnik", "wskaznik"];
const UNIT_HEADERS: &[&str] = &["unit", "jednostka"];
const TIMESTAMP_HEADERS: &[&str] = &[
    "timestamp",
    "measured_at",
    "czas pomiaru",
    "czas_pomiaru",
    "data",
];
const VALUE_HEADERS: &[&str] = &["value", "wartość", "wartosc"];

impl ColumnSchema {
    /// Map header names to column positions.
    ///
    /// A header that names none of the known columns falls back to the
    /// positional default. A header naming only some of them is rejected.
    pub fn from_header<'a, I>(header: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<String> = header
            .into_iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
            .collect();

        let find = |aliases: &'static [&'static str]| {
            names
                .iter()
                .position(|n| aliases.iter().any(|alias| *alias == n.as_str()))
        };

        let station = find(STATION_HEADERS);
        let indicator = find(INDICATOR_HEADERS);
        let unit = find(UNIT_HEADERS);
        let timestamp = find(TIMESTAMP_HEADERS);
        let value = find(VALUE_HEADERS);

        if [station, indicator, unit, timestamp, value]
            .iter()
            .all(Option::is_none)
        {
            return Ok(Self {
                width: names.len().max(5),
                ..Self::default()
            });
        }

        Ok(Self {
            station: station.ok_or(ParseError::MissingColumn("station"))?,
            indicator: indicator.ok_or(ParseError::MissingColumn("indicator"))?,
            unit: unit.ok_or(ParseError::MissingColumn("unit"))?,
            timestamp: timestamp.ok_or(ParseError::MissingColumn("timestamp"))?,
            value: value.ok_or(ParseError::MissingColumn("value"))?,
            width: names.len(),
        })
    }
}

/// Parse one long-layout row into a validated record.
pub fn parse_row(
    fields: &[&str],
    schema: &ColumnSchema,
    line: u64,
) -> Result<MeasurementRecord, ParseError> {
    if fields.len() != schema.width {
        return Err(ParseError::ColumnCount {
            line,
            expected: schema.width,
            found: fields.len(),
        });
    }

    let station_code = required(fields, schema.station, "station", line)?;
    let indicator_code = required(fields, schema.indicator, "indicator", line)?;
    let unit = required(fields, schema.unit, "unit", line)?;
    let timestamp = required(fields, schema.timestamp, "timestamp", line)?;
    let value = required(fields, schema.value, "value", line)?;

    let measured_at = parse_timestamp(timestamp, line)?;
    let value = parse_value(value, line)?;

    Ok(MeasurementRecord {
        station_code: station_code.to_string(),
        indicator_code: indicator_code.to_string(),
        unit: unit.to_string(),
        measured_at,
        value,
    })
}

fn required<'a>(
    fields: &[&'a str],
    index: usize,
    field: &'static str,
    line: u64,
) -> Result<&'a str, ParseError> {
    let value = fields[index].trim();
    if value.is_empty() {
        Err(ParseError::MissingField { line, field })
    } else {
        Ok(value)
    }
}

/// Parse a measurement value written with either a decimal comma or point.
pub fn parse_value(raw: &str, line: u64) -> Result<f64, ParseError> {
    let trimmed = raw.trim();
    let invalid = || ParseError::InvalidValue {
        line,
        value: raw.to_string(),
    };

    let separators = trimmed.chars().filter(|c| *c == ',' || *c == '.').count();
    if trimmed.is_empty() || separators > 1 {
        return Err(invalid());
    }

    // Rust's float parser also accepts "nan", "inf" and exponents; the source
    // format only ever uses plain decimals
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-' | '+'))
    {
        return Err(invalid());
    }

    let value: f64 = trimmed.replace(',', ".").parse().map_err(|_| invalid())?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid())
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timezone-naive timestamp; a bare date means midnight.
pub fn parse_timestamp(raw: &str, line: u64) -> Result<NaiveDateTime, ParseError> {
    let trimmed = raw.trim();

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt);
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ParseError::MalformedTimestamp {
            line,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_parse_value_decimal_comma() {
        assert_eq!(parse_value("23,5", 1).unwrap(), 23.5);
        assert_eq!(parse_value(" 7,25 ", 1).unwrap(), 7.25);
    }

    #[test]
    fn test_parse_value_decimal_point_and_integer() {
        assert_eq!(parse_value("23.5", 1).unwrap(), 23.5);
        assert_eq!(parse_value("12", 1).unwrap(), 12.0);
        assert_eq!(parse_value("-0,4", 1).unwrap(), -0.4);
    }

    #[test]
    fn test_parse_value_rejects_garbage() {
        let err = parse_value("abc", 7).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidValue {
                line: 7,
                value: "abc".to_string()
            }
        );
        assert_eq!(err.line(), Some(7));

        assert!(parse_value("1,2,3", 1).is_err());
        assert!(parse_value("NaN", 1).is_err());
        assert!(parse_value("inf", 1).is_err());
        assert!(parse_value("1e5", 1).is_err());
        assert!(parse_value("", 1).is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            parse_timestamp("2024-01-01 01:00:00", 1).unwrap(),
            ts("2024-01-01 01:00:00")
        );
        assert_eq!(
            parse_timestamp("2024-01-01T13:00:00", 1).unwrap(),
            ts("2024-01-01 13:00:00")
        );
        assert_eq!(
            parse_timestamp("2024-01-01 13:30", 1).unwrap(),
            ts("2024-01-01 13:30:00")
        );
        assert_eq!(
            parse_timestamp("2024-02-29", 1).unwrap(),
            ts("2024-02-29 00:00:00")
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_ambiguous() {
        assert!(matches!(
            parse_timestamp("01/02/2024 10:00", 3),
            Err(ParseError::MalformedTimestamp { line: 3, .. })
        ));
        assert!(parse_timestamp("2023-02-29", 1).is_err());
        assert!(parse_timestamp("yesterday", 1).is_err());
    }

    #[test]
    fn test_parse_row_valid() {
        let schema = ColumnSchema::default();
        let record = parse_row(
            &["MzWarAlNiepo", "NO2", "ug/m3", "2024-01-01 01:00:00", "23,5"],
            &schema,
            2,
        )
        .unwrap();

        assert_eq!(record.station_code, "MzWarAlNiepo");
        assert_eq!(record.indicator_code, "NO2");
        assert_eq!(record.unit, "ug/m3");
        assert_eq!(record.measured_at, ts("2024-01-01 01:00:00"));
        assert_eq!(record.value, 23.5);
    }

    #[test]
    fn test_parse_row_errors() {
        let schema = ColumnSchema::default();

        assert_eq!(
            parse_row(&["A", "NO2", "ug/m3", "2024-01-01"], &schema, 4),
            Err(ParseError::ColumnCount {
                line: 4,
                expected: 5,
                found: 4
            })
        );
        assert_eq!(
            parse_row(&["", "NO2", "ug/m3", "2024-01-01", "1"], &schema, 5),
            Err(ParseError::MissingField {
                line: 5,
                field: "station"
            })
        );
        assert_eq!(
            parse_row(&["A", "NO2", "ug/m3", "2024-01-01", " "], &schema, 6),
            Err(ParseError::MissingField {
                line: 6,
                field: "value"
            })
        );
        assert!(matches!(
            parse_row(&["A", "NO2", "ug/m3", "2024-01-01", "abc"], &schema, 9),
            Err(ParseError::InvalidValue { line: 9, .. })
        ));
    }

    #[test]
    fn test_schema_from_named_header() {
        let schema = ColumnSchema::from_header([
            "Czas pomiaru",
            "Kod stacji",
            "Wskaźnik",
            "Jednostka",
            "Wartość",
        ])
        .unwrap();

        assert_eq!(schema.timestamp, 0);
        assert_eq!(schema.station, 1);
        assert_eq!(schema.indicator, 2);
        assert_eq!(schema.unit, 3);
        assert_eq!(schema.value, 4);
        assert_eq!(schema.width, 5);
    }

    #[test]
    fn test_schema_unknown_header_is_positional() {
        let schema = ColumnSchema::from_header(["a", "b", "c", "d", "e"]).unwrap();
        assert_eq!(schema, ColumnSchema::default());
    }

    #[test]
    fn test_schema_partial_header_rejected() {
        let err = ColumnSchema::from_header(["station", "indicator", "timestamp", "value"])
            .unwrap_err();
        assert_eq!(err, ParseError::MissingColumn("unit"));
    }
}
