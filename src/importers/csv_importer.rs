use std::borrow::Cow;

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

use super::row_parser::{parse_row, ColumnSchema, ParseError};
use super::ParsedMember;

/// Parser for long-layout members: one measurement per row, with a header.
///
/// ```text
/// Kod stacji;Wskaźnik;Jednostka;Czas pomiaru;Wartość
/// MzWarAlNiepo;NO2;ug/m3;2024-01-01 01:00:00;23,5
/// ```
pub struct CsvImporter;

impl CsvImporter {
    pub fn parse(content: &[u8]) -> Result<ParsedMember, ParseError> {
        let text = decode(content);
        let delimiter = detect_delimiter(&text);

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());

        let header = reader.headers().map_err(csv_error)?.clone();
        let schema = ColumnSchema::from_header(header.iter())?;
        debug!(?schema, delimiter = %(delimiter as char), "Detected member layout");

        let mut records = Vec::new();
        for result in reader.records() {
            let row: StringRecord = result.map_err(csv_error)?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            let fields: Vec<&str> = row.iter().collect();
            records.push(parse_row(&fields, &schema, line)?);
        }

        Ok(ParsedMember {
            records,
            skipped: 0,
        })
    }
}

/// Exports are UTF-8 nowadays; older ones are Windows-1250.
fn decode(content: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(content) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1250.decode(content);
            text
        }
    }
}

fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    if header.contains(';') {
        b';'
    } else if header.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

fn csv_error(err: csv::Error) -> ParseError {
    ParseError::Csv {
        line: err.position().map(|p| p.line()).unwrap_or(0),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "station_code;indicator;unit;timestamp;value\n";

    #[test]
    fn test_parse_semicolon_member() {
        let content = format!(
            "{HEADER}MzWarAlNiepo;NO2;ug/m3;2024-01-01 01:00:00;23,5\n\
             MzWarAlNiepo;NO2;ug/m3;2024-01-01 02:00:00;19,0\n"
        );

        let parsed = CsvImporter::parse(content.as_bytes()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].value, 23.5);
        assert_eq!(parsed.records[1].value, 19.0);
        assert_eq!(parsed.skipped, 0);
    }

    #[test]
    fn test_parse_error_cites_line() {
        let content = format!(
            "{HEADER}A;NO2;ug/m3;2024-01-01 01:00:00;1,0\n\
             A;NO2;ug/m3;2024-01-01 02:00:00;abc\n"
        );

        let err = CsvImporter::parse(content.as_bytes()).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidValue {
                line: 3,
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_parse_tab_delimited_reordered_columns() {
        let content = "timestamp\tvalue\tstation\tindicator\tunit\n\
                       2024-03-01 00:00\t4.5\tDsWrocWisA\tPM10\tug/m3\n";

        let parsed = CsvImporter::parse(content.as_bytes()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].station_code, "DsWrocWisA");
        assert_eq!(parsed.records[0].indicator_code, "PM10");
        assert_eq!(parsed.records[0].value, 4.5);
    }

    #[test]
    fn test_parse_windows_1250_header() {
        // "Wskaźnik" with ź encoded as 0x9F in Windows-1250
        let mut content = b"Kod stacji;Wska\x9Fnik;Jednostka;Czas pomiaru;Warto\x9C\xE6\n".to_vec();
        content.extend_from_slice(b"KpBydPlPozn;SO2;ug/m3;2024-01-01 01:00:00;3,2\n");

        let parsed = CsvImporter::parse(&content).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].indicator_code, "SO2");
        assert_eq!(parsed.records[0].value, 3.2);
    }

    #[test]
    fn test_parse_wrong_column_count() {
        let content = format!("{HEADER}A;NO2;ug/m3;2024-01-01 01:00:00\n");

        assert!(matches!(
            CsvImporter::parse(content.as_bytes()),
            Err(ParseError::ColumnCount {
                line: 2,
                expected: 5,
                found: 4
            })
        ));
    }

    #[test]
    fn test_parse_header_only() {
        let parsed = CsvImporter::parse(HEADER.as_bytes()).unwrap();
        assert!(parsed.records.is_empty());
    }
}
