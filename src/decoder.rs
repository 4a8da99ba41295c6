//! Turns uploaded spreadsheet bytes into a [`RawGrid`].
//!
//! Only the first worksheet is read. Cell values are kept as the source stored
//! them: numbers stay numbers, text stays text, nothing is coerced here.

use crate::error::DecodeError;
use crate::schema::{CellValue, RawGrid};
use calamine::{open_workbook_auto_from_rs, Data, Ods, Reader, Sheets, Xls, Xlsx};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::path::Path;

pub const DEFAULT_MAX_FILE_BYTES: usize = 15 * 1024 * 1024;
pub const DEFAULT_MAX_ROWS: usize = 100_000;

/// Days between the 1900 and 1904 Excel epochs.
const EXCEL_1904_OFFSET_DAYS: f64 = 1462.0;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Xlsx,
    Xls,
    Ods,
    Csv,
}

impl FileFormat {
    pub fn from_extension(extension: &str) -> Result<Self, DecodeError> {
        match extension.trim().trim_start_matches('.').to_lowercase().as_str() {
            "xlsx" | "xlsm" => Ok(FileFormat::Xlsx),
            "xls" => Ok(FileFormat::Xls),
            "ods" => Ok(FileFormat::Ods),
            "csv" => Ok(FileFormat::Csv),
            other => Err(DecodeError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_file_name(name: &str) -> Result<Self, DecodeError> {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| DecodeError::UnsupportedFormat(name.to_string()))?;
        Self::from_extension(extension)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ext = match self {
            FileFormat::Xlsx => "xlsx",
            FileFormat::Xls => "xls",
            FileFormat::Ods => "ods",
            FileFormat::Csv => "csv",
        };
        write!(f, "{}", ext)
    }
}

/// Ceilings guarding against pathological uploads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DecodeLimits {
    pub max_bytes: usize,
    pub max_rows: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_FILE_BYTES,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

/// Decodes `bytes` into a grid. With no declared format, zip and OLE containers
/// are handed to the spreadsheet reader and everything else is read as CSV.
pub fn decode_workbook(
    bytes: &[u8],
    format: Option<FileFormat>,
    limits: &DecodeLimits,
) -> Result<RawGrid, DecodeError> {
    if bytes.len() > limits.max_bytes {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            limit: limits.max_bytes,
        });
    }

    let (mut rows, first_row) = match format {
        Some(FileFormat::Csv) => (decode_csv(bytes, limits)?, 0),
        Some(other) => decode_spreadsheet(bytes, Some(other), limits)?,
        None if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) => {
            decode_spreadsheet(bytes, None, limits)?
        }
        None => (decode_csv(bytes, limits)?, 0),
    };

    while rows.last().is_some_and(|row| row.is_empty()) {
        rows.pop();
    }

    debug!(
        "Decoded {} bytes ({}) into {} rows",
        bytes.len(),
        format.map(|f| f.to_string()).unwrap_or_else(|| "sniffed".to_string()),
        rows.len()
    );

    Ok(RawGrid::new(rows).with_first_row(first_row))
}

fn decode_spreadsheet(
    bytes: &[u8],
    format: Option<FileFormat>,
    limits: &DecodeLimits,
) -> Result<(Vec<Vec<CellValue>>, usize), DecodeError> {
    let cursor = Cursor::new(bytes);
    let mut workbook: Sheets<Cursor<&[u8]>> = match format {
        Some(FileFormat::Xlsx) => Sheets::Xlsx(Xlsx::new(cursor).map_err(unreadable)?),
        Some(FileFormat::Xls) => Sheets::Xls(Xls::new(cursor).map_err(unreadable)?),
        Some(FileFormat::Ods) => Sheets::Ods(Ods::new(cursor).map_err(unreadable)?),
        _ => open_workbook_auto_from_rs(cursor).map_err(unreadable)?,
    };

    if workbook.sheet_names().is_empty() {
        return Err(DecodeError::NoSheets);
    }

    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(e)) => return Err(unreadable(e)),
        None => return Err(DecodeError::NoSheets),
    };

    if range.height() > limits.max_rows {
        return Err(DecodeError::TooManyRows {
            limit: limits.max_rows,
        });
    }

    // The range starts at the first used cell. Leading blank columns are
    // padded back so cells keep their sheet column; the skipped rows are
    // carried as the grid's first row.
    let (first_row, first_col) = range
        .start()
        .map(|(row, col)| (row as usize, col as usize))
        .unwrap_or((0, 0));
    let rows: Vec<Vec<CellValue>> = range
        .rows()
        .map(|row| {
            std::iter::repeat(CellValue::Empty)
                .take(first_col)
                .chain(row.iter().map(cell_from_data))
                .collect()
        })
        .collect();
    Ok((rows, first_row))
}

fn decode_csv(bytes: &[u8], limits: &DecodeLimits) -> Result<Vec<Vec<CellValue>>, DecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| DecodeError::Unreadable(format!("CSV row {}: {}", idx, e)))?;
        if rows.len() >= limits.max_rows {
            return Err(DecodeError::TooManyRows {
                limit: limits.max_rows,
            });
        }
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }

    Ok(rows)
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        Data::DateTime(dt) => CellValue::Number(serial_1900(dt.as_f64(), dt.is_1904())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(format!("#ERROR:{:?}", e)),
    }
}

/// Shifts a 1904-system serial onto the 1900 system every later stage reads.
fn serial_1900(serial: f64, is_1904: bool) -> f64 {
    if is_1904 {
        serial + EXCEL_1904_OFFSET_DAYS
    } else {
        serial
    }
}

fn unreadable<E: fmt::Display>(e: E) -> DecodeError {
    DecodeError::Unreadable(e.to_string())
}
