use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::{DatasvcError, Result};
use crate::scalar::Scalar;

/// An ordered list of named columns and rows of scalars.
///
/// Column names are unique and every row has exactly one value per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct TabularTable {
    columns: Vec<String>,
    rows: Vec<Vec<Scalar>>,
}

impl TabularTable {
    /// Create a new table, validating the column names and row widths.
    pub fn try_new(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Result<Self> {
        validate_columns(&columns).map_err(|msg| DatasvcError::malformed("table", "header", msg))?;
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DatasvcError::malformed(
                    "table",
                    format!("row {}", idx + 1),
                    format!(
                        "expected {} values, got {}",
                        columns.len(),
                        row.len()
                    ),
                ));
            }
        }
        Ok(TabularTable { columns, rows })
    }

    /// Create a table without checking invariants.
    ///
    /// Callers must already guarantee unique column names and matching row
    /// widths.
    pub(crate) fn new_unchecked(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Self {
        debug_assert!(validate_columns(&columns).is_ok());
        debug_assert!(rows.iter().all(|row| row.len() == columns.len()));
        TabularTable { columns, rows }
    }

    pub fn empty(columns: Vec<String>) -> Result<Self> {
        Self::try_new(columns, Vec::new())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Scalar>] {
        &self.rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Index of a column by its exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterate over the values of a single column.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Scalar> {
        self.rows.iter().map(move |row| &row[idx])
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<Scalar>>) {
        (self.columns, self.rows)
    }
}

fn validate_columns(columns: &[String]) -> Result<(), String> {
    let mut seen = HashSet::with_capacity(columns.len());
    for (idx, col) in columns.iter().enumerate() {
        if col.is_empty() {
            return Err(format!("column {} has an empty name", idx + 1));
        }
        if !seen.insert(col.as_str()) {
            return Err(format!("duplicate column name '{col}'"));
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Scalar>>,
}

impl TryFrom<RawTable> for TabularTable {
    type Error = DatasvcError;

    fn try_from(raw: RawTable) -> Result<Self> {
        TabularTable::try_new(raw.columns, raw.rows)
    }
}

/// Make output column names unique by suffixing repeats with `_1`, `_2`, ...
///
/// Suffixes skip over names that are already taken.
pub(crate) fn dedup_column_names(names: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let name = if name.is_empty() {
            "?column?".to_string()
        } else {
            name
        };
        if taken.insert(name.clone()) {
            out.push(name);
            continue;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{name}_{n}");
            if taken.insert(candidate.clone()) {
                out.push(candidate);
                break;
            }
            n += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = TabularTable::try_new(cols(&["a", "b"]), vec![vec![Scalar::Int(1)]]).unwrap_err();
        assert!(
            matches!(err, DatasvcError::MalformedInput { ref location, .. } if location == "row 1"),
            "{err}"
        );
    }

    #[test]
    fn duplicate_columns_rejected() {
        TabularTable::try_new(cols(&["a", "a"]), Vec::new()).unwrap_err();
        TabularTable::try_new(cols(&["a", ""]), Vec::new()).unwrap_err();
    }

    #[test]
    fn serde_validates() {
        let table: TabularTable =
            serde_json::from_str(r#"{"columns":["a","b"],"rows":[[1,"x"],[null,2.5]]}"#).unwrap();
        assert_eq!(2, table.num_rows());
        assert_eq!(
            vec![Scalar::Null, Scalar::Float(2.5)],
            table.rows()[1]
        );

        serde_json::from_str::<TabularTable>(r#"{"columns":["a"],"rows":[[1,2]]}"#).unwrap_err();
    }

    #[test]
    fn dedup_names() {
        assert_eq!(
            cols(&["a", "a_2", "a_1", "b", "a_3"]),
            dedup_column_names(cols(&["a", "a_2", "a", "b", "a"]))
        );
    }
}
