//! Decoding raw source bytes into tables.
pub mod delimited;
pub mod json;

use std::fmt;
use std::str::FromStr;

use crate::errors::{DatasvcError, Result};
use crate::table::TabularTable;

/// Supported source file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Csv,
    Tsv,
    /// A JSON array of records.
    Json,
    /// Newline delimited JSON records.
    JsonLines,
}

impl FileFormat {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Tsv => "tsv",
            FileFormat::Json => "json",
            FileFormat::JsonLines => "jsonl",
        }
    }

    /// Decode bytes in this format into a table.
    pub fn decode(&self, bytes: &[u8]) -> Result<TabularTable> {
        match self {
            FileFormat::Csv => delimited::decode_delimited(bytes, b',', self.as_str()),
            FileFormat::Tsv => delimited::decode_delimited(bytes, b'\t', self.as_str()),
            FileFormat::Json => json::decode_json_array(bytes),
            FileFormat::JsonLines => json::decode_json_lines(bytes),
        }
    }

    /// Split a file name into its stem and format.
    ///
    /// Only the final path component is considered, and only the last
    /// extension determines the format: `dir/sales.2024.csv` has stem
    /// `sales.2024`.
    pub fn from_filename(filename: &str) -> Result<(&str, FileFormat)> {
        let name = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename);

        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, ext),
            None => {
                return Err(DatasvcError::UnsupportedFormat {
                    format: String::new(),
                });
            }
        };

        let format = ext.parse::<FileFormat>()?;
        Ok((stem, format))
    }
}

impl FromStr for FileFormat {
    type Err = DatasvcError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "csv" => FileFormat::Csv,
            "tsv" | "tab" => FileFormat::Tsv,
            "json" => FileFormat::Json,
            "jsonl" | "ndjson" => FileFormat::JsonLines,
            _ => {
                return Err(DatasvcError::UnsupportedFormat {
                    format: s.to_string(),
                });
            }
        })
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decode bytes using a format tag.
pub fn decode(format: &str, bytes: &[u8]) -> Result<TabularTable> {
    format.parse::<FileFormat>()?.decode(bytes)
}

/// Rewrite a table validation error to name the source format.
fn attribute_to_format(format: &str, err: DatasvcError) -> DatasvcError {
    match err {
        DatasvcError::MalformedInput { location, msg, .. } => DatasvcError::MalformedInput {
            format: format.to_string(),
            location,
            msg,
        },
        other => other,
    }
}
