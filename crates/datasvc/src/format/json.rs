//! JSON and JSON lines decoding.
//!
//! Columns are the union of record keys in the order they're first seen.
//! Records missing a key get a null for that column.
use indexmap::IndexSet;
use serde_json::{Map, Value};

use crate::errors::{DatasvcError, Result};
use crate::scalar::Scalar;
use crate::table::TabularTable;

const JSON: &str = "json";
const JSON_LINES: &str = "jsonl";

/// Decode a JSON array of objects.
pub fn decode_json_array(bytes: &[u8]) -> Result<TabularTable> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| json_error(JSON, None, e))?;

    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(DatasvcError::malformed(
                JSON,
                "line 1",
                format!("expected an array of records, got {}", value_kind(&other)),
            ));
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(map) => records.push(map),
            other => {
                return Err(DatasvcError::malformed(
                    JSON,
                    format!("record {}", idx + 1),
                    format!("expected an object, got {}", value_kind(&other)),
                ));
            }
        }
    }

    records_to_table(JSON, records)
}

/// Decode newline delimited JSON objects. Blank lines are skipped.
pub fn decode_json_lines(bytes: &[u8]) -> Result<TabularTable> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        DatasvcError::malformed(
            JSON_LINES,
            format!("byte {}", e.valid_up_to()),
            "invalid UTF-8",
        )
    })?;

    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_num = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).map_err(|e| json_error(JSON_LINES, Some(line_num), e))?;
        match value {
            Value::Object(map) => records.push(map),
            other => {
                return Err(DatasvcError::malformed(
                    JSON_LINES,
                    format!("line {line_num}"),
                    format!("expected an object, got {}", value_kind(&other)),
                ));
            }
        }
    }

    records_to_table(JSON_LINES, records)
}

fn records_to_table(format: &str, records: Vec<Map<String, Value>>) -> Result<TabularTable> {
    let mut columns: IndexSet<String> = IndexSet::new();
    for record in &records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.insert(key.clone());
            }
        }
    }

    let rows = records
        .into_iter()
        .map(|mut record| {
            columns
                .iter()
                .map(|col| match record.remove(col) {
                    Some(value) => value_to_scalar(value),
                    None => Scalar::Null,
                })
                .collect()
        })
        .collect();

    TabularTable::try_new(columns.into_iter().collect(), rows)
        .map_err(|e| super::attribute_to_format(format, e))
}

fn value_to_scalar(value: Value) -> Scalar {
    match value {
        Value::Null => Scalar::Null,
        Value::Bool(b) => Scalar::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Scalar::Int(i),
            // Numbers are always finite when parsed from JSON text.
            None => match n.as_f64() {
                Some(f) => Scalar::Float(f),
                None => Scalar::Text(n.to_string()),
            },
        },
        Value::String(s) => Scalar::Text(s),
        nested @ (Value::Array(_) | Value::Object(_)) => Scalar::Text(nested.to_string()),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn json_error(format: &str, line: Option<usize>, err: serde_json::Error) -> DatasvcError {
    let location = match line {
        Some(line) => format!("line {line}, column {}", err.column()),
        None => format!("line {}, column {}", err.line(), err.column()),
    };
    DatasvcError::malformed(format, location, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_union_in_first_seen_order() {
        let table = decode_json_array(br#"[{"b": 1, "a": "x"}, {"c": true, "a": null}]"#).unwrap();
        assert_eq!(["b", "a", "c"], table.columns());
        assert_eq!(
            vec![
                vec![Scalar::Int(1), Scalar::text("x"), Scalar::Null],
                vec![Scalar::Null, Scalar::Null, Scalar::Bool(true)],
            ],
            table.rows()
        );
    }

    #[test]
    fn numbers() {
        let table = decode_json_array(br#"[{"a": 1, "b": 1.0, "c": 18446744073709551615}]"#).unwrap();
        assert_eq!(
            vec![vec![
                Scalar::Int(1),
                Scalar::Float(1.0),
                Scalar::Float(18446744073709551615.0)
            ]],
            table.rows()
        );
    }

    #[test]
    fn nested_values_are_text() {
        let table = decode_json_array(br#"[{"a": [1, 2], "b": {"c": "d"}}]"#).unwrap();
        assert_eq!(
            vec![vec![Scalar::text("[1,2]"), Scalar::text(r#"{"c":"d"}"#)]],
            table.rows()
        );
    }

    #[test]
    fn empty_array() {
        let table = decode_json_array(b"[]").unwrap();
        assert_eq!(0, table.num_columns());
        assert_eq!(0, table.num_rows());
    }

    #[test]
    fn not_an_array() {
        let err = decode_json_array(br#"{"a": 1}"#).unwrap_err();
        assert!(matches!(err, DatasvcError::MalformedInput { .. }), "{err}");
    }

    #[test]
    fn non_object_record() {
        let err = decode_json_array(br#"[{"a": 1}, 2]"#).unwrap_err();
        match err {
            DatasvcError::MalformedInput { location, .. } => assert_eq!("record 2", location),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_json() {
        let err = decode_json_array(b"[{\"a\": 1},\n{\"a\" 2}]").unwrap_err();
        match err {
            DatasvcError::MalformedInput { location, .. } => {
                assert!(location.starts_with("line 2"), "{location}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_key_rejected() {
        let err = decode_json_array(br#"[{"": 1}]"#).unwrap_err();
        assert!(
            matches!(err, DatasvcError::MalformedInput { ref format, .. } if format == "json"),
            "{err}"
        );
    }

    #[test]
    fn json_lines() {
        let table = decode_json_lines(b"{\"a\": 1}\n\n{\"b\": \"x\"}\n").unwrap();
        assert_eq!(["a", "b"], table.columns());
        assert_eq!(
            vec![
                vec![Scalar::Int(1), Scalar::Null],
                vec![Scalar::Null, Scalar::text("x")],
            ],
            table.rows()
        );
    }

    #[test]
    fn json_lines_bad_line() {
        let err = decode_json_lines(b"{\"a\": 1}\n[1]\n").unwrap_err();
        match err {
            DatasvcError::MalformedInput { location, .. } => assert_eq!("line 2", location),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
