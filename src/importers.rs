//! Archive members and the parsers that turn them into measurement records

pub mod archive_reader;
pub mod csv_importer;
pub mod excel_importer;
pub mod row_parser;

// Re-export commonly used items
pub use archive_reader::{ArchiveError, ArchiveReader, MemberEntry};
pub use csv_importer::CsvImporter;
pub use excel_importer::ExcelImporter;
pub use row_parser::{parse_row, ColumnSchema, MeasurementRecord, ParseError};

/// All records of one member, ready for reference resolution
#[derive(Debug, Clone, Default)]
pub struct ParsedMember {
    pub records: Vec<MeasurementRecord>,
    /// Empty cells in wide-layout sheets (station not measuring)
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFormat {
    Csv,
    Xlsx,
}

impl MemberFormat {
    /// Format by file extension; `None` for members the importer ignores
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".csv") || lower.ends_with(".txt") {
            Some(MemberFormat::Csv)
        } else if lower.ends_with(".xlsx") {
            Some(MemberFormat::Xlsx)
        } else {
            None
        }
    }
}

/// Parse member bytes according to its format. Pure: no I/O besides memory.
pub fn parse_member(format: MemberFormat, content: &[u8]) -> Result<ParsedMember, ParseError> {
    match format {
        MemberFormat::Csv => CsvImporter::parse(content),
        MemberFormat::Xlsx => ExcelImporter::parse(content),
    }
}
