use std::io::Cursor;

use calamine::{Data, Range, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, info};

use super::row_parser::{parse_timestamp, parse_value, MeasurementRecord, ParseError};
use super::ParsedMember;

/// Rows searched for the first timestamp when locating the data block
const DATA_ROW_SEARCH: std::ops::Range<usize> = 5..15;
const DEFAULT_DATA_ROW: usize = 6;

/// Header block of a wide-layout sheet
#[derive(Debug, Clone)]
struct SheetHeader {
    station_codes: Vec<String>,
    units: Vec<String>,
    indicator_code: String,
    data_start_col: usize,
    data_start_row: usize,
}

/// Parser for the network's yearly Excel exports (one column per station)
///
/// # Expected Sheet Structure:
/// ```text
/// Row 1: "Nr" | 1 | 2 | ...
/// Row 2: "Kod stacji" | station codes ...
/// Row 3: "Wskaźnik" | indicator name (same for all columns)
/// Row 4: "Czas uśredniania" | averaging time (e.g. 1g, 24g)
/// Row 5: "Jednostka" | unit per column
/// Row 6: "Kod stanowiska" | position codes  (or "Data od" | "Data do" | ...)
/// Row 7 (optional): "Czas pomiaru"
/// Row 7/8..: timestamp | values ...
/// ```
///
/// Files using the "Data od"/"Data do" variant carry two date columns, so
/// their values start at column C instead of B.
pub struct ExcelImporter;

impl ExcelImporter {
    /// Parse the first sheet of an in-memory workbook
    pub fn parse(content: &[u8]) -> Result<ParsedMember, ParseError> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(content))
            .map_err(|e| ParseError::Workbook(e.to_string()))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ParseError::Workbook("workbook has no sheets".to_string()))?
            .map_err(|e| ParseError::Workbook(e.to_string()))?;

        Self::parse_range(&range)
    }

    /// Parse a worksheet range into measurement records
    pub fn parse_range(range: &Range<Data>) -> Result<ParsedMember, ParseError> {
        let header = Self::parse_header(range)?;
        debug!(
            "Sheet has {} station columns for {}, data from row {}",
            header.station_codes.len(),
            header.indicator_code,
            header.data_start_row + 1
        );

        let mut records = Vec::new();
        let mut skipped = 0;

        for row in header.data_start_row..range.height() {
            let line = row as u64 + 1;

            let measured_at = match Self::parse_date_cell(range.get((row, 0)), line)? {
                Some(dt) => dt,
                None => continue,
            };

            for (offset, station_code) in header.station_codes.iter().enumerate() {
                let col = header.data_start_col + offset;

                match Self::parse_value_cell(range.get((row, col)), line)? {
                    Some(value) => records.push(MeasurementRecord {
                        station_code: station_code.clone(),
                        indicator_code: header.indicator_code.clone(),
                        unit: header.units[offset].clone(),
                        measured_at,
                        value,
                    }),
                    None => skipped += 1,
                }
            }
        }

        info!(
            "Parsed {} measurements ({} empty cells) for {}",
            records.len(),
            skipped,
            header.indicator_code
        );
        Ok(ParsedMember { records, skipped })
    }

    fn parse_header(range: &Range<Data>) -> Result<SheetHeader, ParseError> {
        if range.height() < 6 {
            return Err(ParseError::Layout(format!(
                "expected at least 6 header rows, found {}",
                range.height()
            )));
        }

        let data_start_col = match range.get((5, 0)) {
            Some(Data::String(s)) if s.contains("Data") => 2,
            _ => 1,
        };

        let mut station_codes = Vec::new();
        for col in data_start_col..range.width() {
            match cell_text(range.get((1, col))) {
                Some(code) => station_codes.push(code),
                None => break,
            }
        }
        if station_codes.is_empty() {
            return Err(ParseError::Layout("no station codes in row 2".to_string()));
        }

        let indicator = cell_text(range.get((2, data_start_col))).ok_or(
            ParseError::MissingField {
                line: 3,
                field: "indicator",
            },
        )?;
        let indicator_code = match cell_text(range.get((3, data_start_col))) {
            Some(averaging) => format!("{indicator}/{averaging}"),
            None => indicator,
        };

        let units = (0..station_codes.len())
            .map(|offset| {
                cell_text(range.get((4, data_start_col + offset))).ok_or(
                    ParseError::MissingField {
                        line: 5,
                        field: "unit",
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SheetHeader {
            station_codes,
            units,
            indicator_code,
            data_start_col,
            data_start_row: Self::detect_data_start_row(range),
        })
    }

    fn detect_data_start_row(range: &Range<Data>) -> usize {
        let end = DATA_ROW_SEARCH.end.min(range.height());
        for row in DATA_ROW_SEARCH.start..end {
            let found = match range.get((row, 0)) {
                Some(Data::DateTime(_)) | Some(Data::DateTimeIso(_)) => true,
                Some(Data::String(s)) => parse_timestamp(s, 0).is_ok(),
                _ => false,
            };
            if found {
                return row;
            }
        }
        DEFAULT_DATA_ROW
    }

    /// Returns `None` for an empty first cell (trailing or spacer rows)
    fn parse_date_cell(
        cell: Option<&Data>,
        line: u64,
    ) -> Result<Option<NaiveDateTime>, ParseError> {
        let malformed = |value: String| ParseError::MalformedTimestamp { line, value };

        match cell {
            Some(Data::DateTime(excel_date)) => excel_date
                .as_datetime()
                .map(Some)
                .ok_or_else(|| malformed(format!("{excel_date:?}"))),
            Some(Data::DateTimeIso(s)) => parse_timestamp(s, line).map(Some),
            Some(Data::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Data::String(s)) => parse_timestamp(s, line).map(Some),
            Some(Data::Float(serial)) => excel_serial_to_datetime(*serial)
                .map(Some)
                .ok_or_else(|| malformed(serial.to_string())),
            Some(Data::Int(serial)) => excel_serial_to_datetime(*serial as f64)
                .map(Some)
                .ok_or_else(|| malformed(serial.to_string())),
            Some(Data::Empty) | None => Ok(None),
            Some(other) => Err(malformed(format!("{other:?}"))),
        }
    }

    /// Returns `None` for an empty cell (station not measuring)
    fn parse_value_cell(cell: Option<&Data>, line: u64) -> Result<Option<f64>, ParseError> {
        match cell {
            Some(Data::Float(f)) => Ok(Some(*f)),
            Some(Data::Int(i)) => Ok(Some(*i as f64)),
            Some(Data::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Data::String(s)) => parse_value(s, line).map(Some),
            Some(Data::Empty) | None => Ok(None),
            Some(other) => Err(ParseError::InvalidValue {
                line,
                value: format!("{other:?}"),
            }),
        }
    }
}

fn cell_text(cell: Option<&Data>) -> Option<String> {
    match cell {
        Some(Data::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Data::Int(i)) => Some(i.to_string()),
        Some(Data::Float(f)) => Some(format!("{f:.0}")),
        _ => None,
    }
}

/// Convert an Excel serial date (days since 1899-12-30, fractional time) to a timestamp
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    base.checked_add_signed(Duration::seconds(seconds))
}
