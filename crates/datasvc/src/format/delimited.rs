//! CSV and TSV decoding.
//!
//! # Inference
//!
//! The first record is always the header. Every remaining cell is held as
//! text until the whole column has been seen, then the column is assigned
//! the first candidate type that every non-empty cell parses as:
//!
//! - Int64, rejecting redundant leading zeros so identifiers like `007`
//!   stay text.
//! - Float64, finite values only.
//! - Boolean, `true`/`false` in any case.
//! - Utf8, always succeeds.
//!
//! Empty cells are null regardless of the column type. Whitespace only cells
//! are not empty, and force the column to text.
use crate::errors::{DatasvcError, Result};
use crate::scalar::Scalar;
use crate::table::TabularTable;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateType {
    Int64,
    Float64,
    Boolean,
    Utf8,
}

impl CandidateType {
    const ORDERED: [CandidateType; 4] = [
        CandidateType::Int64,
        CandidateType::Float64,
        CandidateType::Boolean,
        CandidateType::Utf8,
    ];

    fn accepts(&self, cell: &str) -> bool {
        match self {
            CandidateType::Int64 => parse_int(cell).is_some(),
            CandidateType::Float64 => parse_float(cell).is_some(),
            CandidateType::Boolean => parse_bool(cell).is_some(),
            CandidateType::Utf8 => true,
        }
    }

    fn convert(&self, cell: String) -> Scalar {
        if is_null_cell(&cell) {
            return Scalar::Null;
        }
        let converted = match self {
            CandidateType::Int64 => parse_int(&cell).map(Scalar::Int),
            CandidateType::Float64 => parse_float(&cell).map(Scalar::Float),
            CandidateType::Boolean => parse_bool(&cell).map(Scalar::Bool),
            CandidateType::Utf8 => None,
        };
        converted.unwrap_or(Scalar::Text(cell))
    }
}

/// Decode delimited text with a header row.
pub fn decode_delimited(bytes: &[u8], delimiter: u8, format: &str) -> Result<TabularTable> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(format, e))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if columns.is_empty() {
        return Err(DatasvcError::malformed(format, "line 1", "missing header row"));
    }

    let mut cells: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(format, e))?;
        cells.push(record.iter().map(|c| c.to_string()).collect());
    }

    let types: Vec<CandidateType> = (0..columns.len())
        .map(|idx| infer_column(cells.iter().map(|row| row[idx].as_str())))
        .collect();

    let rows = cells
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&types)
                .map(|(cell, typ)| typ.convert(cell))
                .collect()
        })
        .collect();

    TabularTable::try_new(columns, rows).map_err(|e| super::attribute_to_format(format, e))
}

fn infer_column<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> CandidateType {
    let mut non_null = cells.filter(|c| !is_null_cell(c)).peekable();
    if non_null.peek().is_none() {
        return CandidateType::Utf8;
    }

    for candidate in CandidateType::ORDERED {
        if non_null.clone().all(|c| candidate.accepts(c)) {
            return candidate;
        }
    }
    CandidateType::Utf8
}

fn csv_error(format: &str, err: csv::Error) -> DatasvcError {
    let location = match err.position() {
        Some(pos) => format!("line {}", pos.line()),
        None => "unknown position".to_string(),
    };
    let msg = match err.kind() {
        csv::ErrorKind::Utf8 { err, .. } => format!("invalid UTF-8: {err}"),
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {expected_len} fields, found {len}"),
        _ => err.to_string(),
    };
    DatasvcError::malformed(format, location, msg)
}

fn is_null_cell(cell: &str) -> bool {
    cell.is_empty()
}

fn parse_int(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    if has_redundant_leading_zero(cell) {
        return None;
    }
    cell.parse().ok()
}

fn parse_float(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    // Rust accepts "inf", "NaN" and friends, none of which we want.
    if !cell
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    if has_redundant_leading_zero(cell) {
        return None;
    }
    let v: f64 = cell.parse().ok()?;
    v.is_finite().then_some(v)
}

fn parse_bool(cell: &str) -> Option<bool> {
    let cell = cell.trim();
    if cell.eq_ignore_ascii_case("true") {
        Some(true)
    } else if cell.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Check if the integer part of a number has a leading zero that isn't the
/// only digit, e.g. `007` or `-01.5`.
fn has_redundant_leading_zero(cell: &str) -> bool {
    let digits = cell.strip_prefix(['-', '+']).unwrap_or(cell);
    let int_part: &str = digits
        .split(['.', 'e', 'E'])
        .next()
        .unwrap_or(digits);
    int_part.len() > 1 && int_part.starts_with('0')
}
