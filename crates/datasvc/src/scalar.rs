use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single cell value.
///
/// Serialized as the plain JSON value. Floats are expected to be finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn text(s: impl Into<String>) -> Self {
        Scalar::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Name of the type for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "boolean",
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "float",
            Scalar::Text(_) => "text",
        }
    }

    /// Compare two values with SQL semantics.
    ///
    /// Returns `Ok(None)` if either side is null. Integers and floats compare
    /// numerically with each other. Comparing any other pair of differing
    /// types is an error.
    pub fn sql_cmp(&self, other: &Scalar) -> Result<Option<Ordering>, TypeMismatch> {
        let ord = match (self, other) {
            (Scalar::Null, _) | (_, Scalar::Null) => return Ok(None),
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Float(b)) => cmp_int_float(*a, *b),
            (Scalar::Float(a), Scalar::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Scalar::Float(a), Scalar::Float(b)) => {
                // Finite floats always compare, and -0.0 equals 0.0.
                a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b))
            }
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            (a, b) => {
                return Err(TypeMismatch {
                    left: a.type_name(),
                    right: b.type_name(),
                });
            }
        };
        Ok(Some(ord))
    }

    /// Total order used for sorting.
    ///
    /// Values of the same type (numbers counting as one type) order
    /// naturally. Across types: null < boolean < number < text.
    pub fn sort_cmp(&self, other: &Scalar) -> Ordering {
        match self.sql_cmp(other) {
            Ok(Some(ord)) => ord,
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Bool(_) => 1,
            Scalar::Int(_) | Scalar::Float(_) => 2,
            Scalar::Text(_) => 3,
        }
    }
}

/// Compare an integer with a float without losing precision for large
/// integers.
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    // i64 bounds as floats. Anything at or above 2^63 is greater than every
    // i64.
    const MAX: f64 = 9_223_372_036_854_775_808.0;
    if f >= MAX {
        return Ordering::Less;
    }
    if f < -MAX {
        return Ordering::Greater;
    }
    let truncated = f.trunc();
    match i.cmp(&(truncated as i64)) {
        Ordering::Equal => 0.0f64.total_cmp(&(f - truncated)),
        ord => ord,
    }
}

/// Two values that can't be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMismatch {
    pub left: &'static str,
    pub right: &'static str,
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot compare {} with {}", self.left, self.right)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Scalar::Null,
        }
    }
}

/// Hashable form of a scalar used for grouping and DISTINCT.
///
/// Integral floats collapse onto the equal integer so `1` and `1.0` land in
/// the same group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ScalarKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
}

impl From<&Scalar> for ScalarKey {
    fn from(value: &Scalar) -> Self {
        match value {
            Scalar::Null => ScalarKey::Null,
            Scalar::Bool(v) => ScalarKey::Bool(*v),
            Scalar::Int(v) => ScalarKey::Int(*v),
            Scalar::Float(v) => {
                if v.fract() == 0.0 && *v >= -9.223_372_036_854_776e18 && *v < 9.223_372_036_854_776e18
                {
                    ScalarKey::Int(*v as i64)
                } else {
                    ScalarKey::Float(v.to_bits())
                }
            }
            Scalar::Text(v) => ScalarKey::Text(v.clone()),
        }
    }
}

pub(crate) fn row_key(row: &[Scalar]) -> Vec<ScalarKey> {
    row.iter().map(ScalarKey::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_values() {
        let row = vec![
            Scalar::Null,
            Scalar::Bool(true),
            Scalar::Int(-3),
            Scalar::Float(1.5),
            Scalar::text("x"),
        ];
        let s = serde_json::to_string(&row).unwrap();
        assert_eq!(r#"[null,true,-3,1.5,"x"]"#, s);

        let back: Vec<Scalar> = serde_json::from_str(&s).unwrap();
        assert_eq!(row, back);
    }

    #[test]
    fn integral_float_stays_float() {
        let s = serde_json::to_string(&Scalar::Float(2.0)).unwrap();
        assert_eq!("2.0", s);
        let back: Scalar = serde_json::from_str(&s).unwrap();
        assert_eq!(Scalar::Float(2.0), back);
    }

    #[test]
    fn numeric_comparison() {
        assert_eq!(
            Some(Ordering::Less),
            Scalar::Int(1).sql_cmp(&Scalar::Float(1.5)).unwrap()
        );
        assert_eq!(
            Some(Ordering::Equal),
            Scalar::Float(3.0).sql_cmp(&Scalar::Int(3)).unwrap()
        );
        assert_eq!(
            Some(Ordering::Greater),
            Scalar::Int(i64::MAX).sql_cmp(&Scalar::Float(9.2e18)).unwrap()
        );
        assert_eq!(None, Scalar::Null.sql_cmp(&Scalar::Int(1)).unwrap());
    }

    #[test]
    fn negative_zero_equals_zero() {
        let neg = Scalar::Float(-0.0);
        assert_eq!(Some(Ordering::Equal), neg.sql_cmp(&Scalar::Float(0.0)).unwrap());
        assert_eq!(Some(Ordering::Equal), neg.sql_cmp(&Scalar::Int(0)).unwrap());
        assert_eq!(Ordering::Equal, neg.sort_cmp(&Scalar::Float(0.0)));
        assert_eq!(ScalarKey::from(&neg), ScalarKey::from(&Scalar::Float(0.0)));
    }

    #[test]
    fn mismatched_types() {
        let err = Scalar::Int(1).sql_cmp(&Scalar::text("1")).unwrap_err();
        assert_eq!("cannot compare integer with text", err.to_string());
    }

    #[test]
    fn sort_order_across_types() {
        let mut vals = vec![
            Scalar::text("a"),
            Scalar::Int(2),
            Scalar::Bool(false),
            Scalar::Float(1.5),
        ];
        vals.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            vec![
                Scalar::Bool(false),
                Scalar::Float(1.5),
                Scalar::Int(2),
                Scalar::text("a"),
            ],
            vals
        );
    }

    #[test]
    fn keys_collapse_integral_floats() {
        assert_eq!(
            ScalarKey::from(&Scalar::Int(1)),
            ScalarKey::from(&Scalar::Float(1.0))
        );
        assert_ne!(
            ScalarKey::from(&Scalar::Int(1)),
            ScalarKey::from(&Scalar::Float(1.5))
        );
    }
}
