use std::cmp::Ordering;

use dataplay_parser::ast::{BinaryOperator, UnaryOperator};

use super::bind::{BoundExpr, ScalarFunction};
use crate::errors::{Result, internal, runtime};
use crate::scalar::Scalar;

/// Values an expression can read during evaluation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EvalInput<'a> {
    /// The current input row.
    pub columns: &'a [Scalar],
    /// Group key values for the current group.
    pub keys: &'a [Scalar],
    /// Aggregate results for the current group.
    pub aggregates: &'a [Scalar],
}

impl<'a> EvalInput<'a> {
    pub fn row(columns: &'a [Scalar]) -> Self {
        EvalInput {
            columns,
            keys: &[],
            aggregates: &[],
        }
    }

    pub fn group(keys: &'a [Scalar], aggregates: &'a [Scalar]) -> Self {
        EvalInput {
            columns: &[],
            keys,
            aggregates,
        }
    }
}

impl BoundExpr {
    pub fn eval(&self, input: &EvalInput) -> Result<Scalar> {
        match self {
            BoundExpr::Column(idx) => fetch(input.columns, *idx, "column"),
            BoundExpr::GroupKey(idx) => fetch(input.keys, *idx, "group key"),
            BoundExpr::Aggregate(idx) => fetch(input.aggregates, *idx, "aggregate"),
            BoundExpr::Literal(v) => Ok(v.clone()),
            BoundExpr::Unary { op, expr } => unary(*op, expr.eval(input)?),
            BoundExpr::Binary { left, op, right } => match op {
                BinaryOperator::And => {
                    let l = truth(left.eval(input)?, "AND")?;
                    if l == Some(false) {
                        return Ok(Scalar::Bool(false));
                    }
                    let r = truth(right.eval(input)?, "AND")?;
                    Ok(from_truth(match (l, r) {
                        (_, Some(false)) => Some(false),
                        (Some(true), Some(true)) => Some(true),
                        _ => None,
                    }))
                }
                BinaryOperator::Or => {
                    let l = truth(left.eval(input)?, "OR")?;
                    if l == Some(true) {
                        return Ok(Scalar::Bool(true));
                    }
                    let r = truth(right.eval(input)?, "OR")?;
                    Ok(from_truth(match (l, r) {
                        (_, Some(true)) => Some(true),
                        (Some(false), Some(false)) => Some(false),
                        _ => None,
                    }))
                }
                op => binary(*op, left.eval(input)?, right.eval(input)?),
            },
            BoundExpr::IsNull { expr, negated } => {
                Ok(Scalar::Bool(expr.eval(input)?.is_null() != *negated))
            }
            BoundExpr::InList {
                expr,
                list,
                negated,
            } => {
                let value = expr.eval(input)?;
                if value.is_null() {
                    return Ok(Scalar::Null);
                }
                let mut saw_null = false;
                for item in list {
                    match compare(&value, &item.eval(input)?)? {
                        Some(Ordering::Equal) => return Ok(Scalar::Bool(!*negated)),
                        Some(_) => (),
                        None => saw_null = true,
                    }
                }
                if saw_null {
                    Ok(Scalar::Null)
                } else {
                    Ok(Scalar::Bool(*negated))
                }
            }
            BoundExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let value = expr.eval(input)?;
                let above = compare(&value, &low.eval(input)?)?.map(|o| o != Ordering::Less);
                let below = compare(&value, &high.eval(input)?)?.map(|o| o != Ordering::Greater);
                let between = match (above, below) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
                Ok(from_truth(between.map(|b| b != *negated)))
            }
            BoundExpr::Like {
                expr,
                pattern,
                negated,
            } => match (expr.eval(input)?, pattern.eval(input)?) {
                (Scalar::Null, _) | (_, Scalar::Null) => Ok(Scalar::Null),
                (Scalar::Text(s), Scalar::Text(p)) => {
                    let s: Vec<char> = s.chars().collect();
                    let p: Vec<char> = p.chars().collect();
                    Ok(Scalar::Bool(like_match(&s, &p) != *negated))
                }
                (s, p) => Err(runtime!(
                    "LIKE requires text operands, got {} and {}",
                    s.type_name(),
                    p.type_name()
                )),
            },
            BoundExpr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                let operand = match operand {
                    Some(operand) => Some(operand.eval(input)?),
                    None => None,
                };
                for (when, then) in when_then {
                    let when = when.eval(input)?;
                    let matched = match &operand {
                        Some(operand) => compare(operand, &when)? == Some(Ordering::Equal),
                        None => truth(when, "CASE WHEN")? == Some(true),
                    };
                    if matched {
                        return then.eval(input);
                    }
                }
                match else_expr {
                    Some(else_expr) => else_expr.eval(input),
                    None => Ok(Scalar::Null),
                }
            }
            BoundExpr::Function { func, args } => function(*func, args, input),
        }
    }
}

fn fetch(values: &[Scalar], idx: usize, what: &str) -> Result<Scalar> {
    values
        .get(idx)
        .cloned()
        .ok_or_else(|| internal!("Missing {what} at index {idx}"))
}

/// Interpret a value as a SQL boolean, `None` meaning unknown.
pub(crate) fn truth(value: Scalar, context: &str) -> Result<Option<bool>> {
    match value {
        Scalar::Bool(b) => Ok(Some(b)),
        Scalar::Null => Ok(None),
        other => Err(runtime!(
            "Argument of {context} must be boolean, got {}",
            other.type_name()
        )),
    }
}

fn from_truth(value: Option<bool>) -> Scalar {
    match value {
        Some(b) => Scalar::Bool(b),
        None => Scalar::Null,
    }
}

pub(crate) fn compare(left: &Scalar, right: &Scalar) -> Result<Option<Ordering>> {
    left.sql_cmp(right).map_err(|e| runtime!("{e}"))
}

fn unary(op: UnaryOperator, value: Scalar) -> Result<Scalar> {
    match (op, value) {
        (_, Scalar::Null) => Ok(Scalar::Null),
        (UnaryOperator::Not, Scalar::Bool(b)) => Ok(Scalar::Bool(!b)),
        (UnaryOperator::Minus, Scalar::Int(v)) => v
            .checked_neg()
            .map(Scalar::Int)
            .ok_or_else(|| runtime!("Integer overflow negating {v}")),
        (UnaryOperator::Minus, Scalar::Float(v)) => Ok(Scalar::Float(-v)),
        (UnaryOperator::Plus, v @ (Scalar::Int(_) | Scalar::Float(_))) => Ok(v),
        (op, v) => Err(runtime!(
            "Cannot apply '{}' to {}",
            op.to_string().trim(),
            v.type_name()
        )),
    }
}

fn binary(op: BinaryOperator, left: Scalar, right: Scalar) -> Result<Scalar> {
    match op {
        BinaryOperator::Plus
        | BinaryOperator::Minus
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => arithmetic(op, left, right),
        BinaryOperator::StringConcat => match (left, right) {
            (Scalar::Null, _) | (_, Scalar::Null) => Ok(Scalar::Null),
            (l, r) => Ok(Scalar::Text(format!("{l}{r}"))),
        },
        BinaryOperator::Eq
        | BinaryOperator::NotEq
        | BinaryOperator::Lt
        | BinaryOperator::LtEq
        | BinaryOperator::Gt
        | BinaryOperator::GtEq => {
            let ord = match compare(&left, &right)? {
                Some(ord) => ord,
                None => return Ok(Scalar::Null),
            };
            let result = match op {
                BinaryOperator::Eq => ord == Ordering::Equal,
                BinaryOperator::NotEq => ord != Ordering::Equal,
                BinaryOperator::Lt => ord == Ordering::Less,
                BinaryOperator::LtEq => ord != Ordering::Greater,
                BinaryOperator::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Ok(Scalar::Bool(result))
        }
        BinaryOperator::And | BinaryOperator::Or => {
            Err(internal!("Logical operator {op} evaluated as a binary operator"))
        }
    }
}

fn arithmetic(op: BinaryOperator, left: Scalar, right: Scalar) -> Result<Scalar> {
    match (left, right) {
        (Scalar::Null, _) | (_, Scalar::Null) => Ok(Scalar::Null),
        (Scalar::Int(a), Scalar::Int(b)) => int_arithmetic(op, a, b),
        (Scalar::Int(a), Scalar::Float(b)) => float_arithmetic(op, a as f64, b),
        (Scalar::Float(a), Scalar::Int(b)) => float_arithmetic(op, a, b as f64),
        (Scalar::Float(a), Scalar::Float(b)) => float_arithmetic(op, a, b),
        (l, r) => Err(runtime!(
            "Cannot apply '{op}' to {} and {}",
            l.type_name(),
            r.type_name()
        )),
    }
}

/// Integer arithmetic. Division truncates toward zero.
fn int_arithmetic(op: BinaryOperator, a: i64, b: i64) -> Result<Scalar> {
    if matches!(op, BinaryOperator::Divide | BinaryOperator::Modulo) && b == 0 {
        return Err(runtime!("Division by zero"));
    }
    let result = match op {
        BinaryOperator::Plus => a.checked_add(b),
        BinaryOperator::Minus => a.checked_sub(b),
        BinaryOperator::Multiply => a.checked_mul(b),
        BinaryOperator::Divide => a.checked_div(b),
        BinaryOperator::Modulo => a.checked_rem(b),
        other => return Err(internal!("Not an arithmetic operator: {other}")),
    };
    result
        .map(Scalar::Int)
        .ok_or_else(|| runtime!("Integer overflow evaluating {a} {op} {b}"))
}

fn float_arithmetic(op: BinaryOperator, a: f64, b: f64) -> Result<Scalar> {
    if matches!(op, BinaryOperator::Divide | BinaryOperator::Modulo) && b == 0.0 {
        return Err(runtime!("Division by zero"));
    }
    let result = match op {
        BinaryOperator::Plus => a + b,
        BinaryOperator::Minus => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide => a / b,
        BinaryOperator::Modulo => a % b,
        other => return Err(internal!("Not an arithmetic operator: {other}")),
    };
    finite(result)
}

fn finite(v: f64) -> Result<Scalar> {
    if v.is_finite() {
        Ok(Scalar::Float(v))
    } else {
        Err(runtime!("Float result out of range"))
    }
}

fn function(func: ScalarFunction, args: &[BoundExpr], input: &EvalInput) -> Result<Scalar> {
    if func == ScalarFunction::Coalesce {
        for arg in args {
            let v = arg.eval(input)?;
            if !v.is_null() {
                return Ok(v);
            }
        }
        return Ok(Scalar::Null);
    }

    let values = args
        .iter()
        .map(|arg| arg.eval(input))
        .collect::<Result<Vec<_>>>()?;
    if values.iter().any(|v| v.is_null()) {
        return Ok(Scalar::Null);
    }

    let type_err = |v: &Scalar| runtime!("Function {func} does not accept {}", v.type_name());

    match (func, values.as_slice()) {
        (ScalarFunction::Lower, [Scalar::Text(s)]) => Ok(Scalar::Text(s.to_lowercase())),
        (ScalarFunction::Upper, [Scalar::Text(s)]) => Ok(Scalar::Text(s.to_uppercase())),
        (ScalarFunction::Length, [Scalar::Text(s)]) => Ok(Scalar::Int(s.chars().count() as i64)),
        (ScalarFunction::Abs, [Scalar::Int(v)]) => v
            .checked_abs()
            .map(Scalar::Int)
            .ok_or_else(|| runtime!("Integer overflow evaluating abs({v})")),
        (ScalarFunction::Abs, [Scalar::Float(v)]) => Ok(Scalar::Float(v.abs())),
        (ScalarFunction::Round, [v]) => round(v, 0).ok_or_else(|| type_err(v))?,
        (ScalarFunction::Round, [v, Scalar::Int(digits)]) => {
            round(v, *digits).ok_or_else(|| type_err(v))?
        }
        (ScalarFunction::Round, [_, digits]) => Err(runtime!(
            "Function round expects an integer number of digits, got {}",
            digits.type_name()
        )),
        (_, [v, ..]) => Err(type_err(v)),
        (_, []) => Err(internal!("Function {func} called with no arguments")),
    }
}

/// Round half away from zero to `digits` decimal places.
///
/// Integers are returned unchanged unless rounding to tens or more. Returns
/// `None` for non-numeric input.
fn round(value: &Scalar, digits: i64) -> Option<Result<Scalar>> {
    let digits = digits.clamp(-308, 308) as i32;
    match value {
        Scalar::Int(v) if digits >= 0 => Some(Ok(Scalar::Int(*v))),
        Scalar::Int(v) => Some(round_float(*v as f64, digits)),
        Scalar::Float(v) => Some(round_float(*v, digits)),
        _ => None,
    }
}

fn round_float(v: f64, digits: i32) -> Result<Scalar> {
    // Scale by an exact power of ten in both directions.
    let factor = 10f64.powi(digits.abs());
    let scaled = if digits >= 0 { v * factor } else { v / factor };
    if !scaled.is_finite() {
        // Too many digits requested to make a difference.
        return finite(v);
    }
    if digits >= 0 {
        finite(scaled.round() / factor)
    } else {
        finite(scaled.round() * factor)
    }
}

/// SQL LIKE matching, `%` matches any run of characters and `_` matches a
/// single character.
fn like_match(s: &[char], p: &[char]) -> bool {
    let (mut si, mut pi) = (0, 0);
    // Position of the last `%` seen and the input position it was matched
    // against, for backtracking.
    let mut star: Option<(usize, usize)> = None;

    while si < s.len() {
        if pi < p.len() && (p[pi] == '_' || (p[pi] != '%' && p[pi] == s[si])) {
            si += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, si));
            pi += 1;
        } else if let Some((star_pi, star_si)) = star {
            pi = star_pi + 1;
            si = star_si + 1;
            star = Some((star_pi, star_si + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use dataplay_parser::parse_filter;

    use super::*;
    use crate::errors::DatasvcError;
    use crate::query::Relation;
    use crate::query::bind::{BindMode, Scope};

    fn eval_with(expr: &str, row: &[Scalar]) -> Result<Scalar> {
        let columns: Vec<String> = (0..row.len()).map(|i| format!("c{i}")).collect();
        let relation = Relation {
            id: "t".to_string(),
            name: "t".to_string(),
        };
        let scope = Scope::for_relation(&relation, &columns);
        let bound = scope.bind(&parse_filter(expr).unwrap(), &mut BindMode::Row)?;
        bound.eval(&EvalInput::row(row))
    }

    fn eval(expr: &str) -> Result<Scalar> {
        eval_with(expr, &[])
    }

    #[test]
    fn arithmetic() {
        assert_eq!(Scalar::Int(7), eval("1 + 2 * 3").unwrap());
        assert_eq!(Scalar::Int(-2), eval("-7 / 3").unwrap());
        assert_eq!(Scalar::Int(1), eval("7 % 3").unwrap());
        assert_eq!(Scalar::Float(3.5), eval("7 / 2.0").unwrap());
        assert_eq!(Scalar::Null, eval("1 + null").unwrap());
    }

    #[test]
    fn arithmetic_errors() {
        for expr in [
            "1 / 0",
            "1 % 0",
            "1.0 / 0",
            "9223372036854775807 + 1",
            "1e308 * 10",
            "'a' + 1",
        ] {
            let err = eval(expr).unwrap_err();
            assert!(
                matches!(err, DatasvcError::QueryRuntime { .. }),
                "{expr}: {err}"
            );
        }
    }

    #[test]
    fn three_valued_logic() {
        assert_eq!(Scalar::Null, eval("null = 1").unwrap());
        assert_eq!(Scalar::Bool(false), eval("null and false").unwrap());
        assert_eq!(Scalar::Null, eval("null and true").unwrap());
        assert_eq!(Scalar::Bool(true), eval("null or true").unwrap());
        assert_eq!(Scalar::Null, eval("not null").unwrap());
        assert_eq!(Scalar::Bool(true), eval("null is null").unwrap());
    }

    #[test]
    fn short_circuit() {
        assert_eq!(Scalar::Bool(false), eval("false and 1 / 0 = 1").unwrap());
        assert_eq!(Scalar::Bool(true), eval("true or 1 / 0 = 1").unwrap());
    }

    #[test]
    fn comparison_type_mismatch() {
        let err = eval_with("c0 > 1", &[Scalar::text("x")]).unwrap_err();
        assert!(matches!(err, DatasvcError::QueryRuntime { .. }), "{err}");
    }

    #[test]
    fn in_list() {
        assert_eq!(Scalar::Bool(true), eval("2 in (1, 2)").unwrap());
        assert_eq!(Scalar::Bool(false), eval("3 in (1, 2)").unwrap());
        assert_eq!(Scalar::Null, eval("3 in (1, null)").unwrap());
        assert_eq!(Scalar::Bool(true), eval("3 not in (1, 2)").unwrap());
    }

    #[test]
    fn between() {
        assert_eq!(Scalar::Bool(true), eval("2 between 1 and 3").unwrap());
        assert_eq!(Scalar::Bool(true), eval("2.5 not between 3 and 4").unwrap());
        assert_eq!(Scalar::Bool(false), eval("5 between null and 4").unwrap());
        assert_eq!(Scalar::Null, eval("2 between null and 4").unwrap());
    }

    #[test]
    fn like() {
        assert_eq!(Scalar::Bool(true), eval("'hello' like 'h%o'").unwrap());
        assert_eq!(Scalar::Bool(true), eval("'hello' like '_ell_'").unwrap());
        assert_eq!(Scalar::Bool(false), eval("'hello' like 'h%x'").unwrap());
        assert_eq!(Scalar::Bool(true), eval("'' like '%'").unwrap());
        assert_eq!(Scalar::Bool(true), eval("'abcbc' like '%bc'").unwrap());
        assert_eq!(Scalar::Bool(false), eval("'abc' not like 'a%'").unwrap());
    }

    #[test]
    fn case_expressions() {
        assert_eq!(
            Scalar::text("two"),
            eval("case 2 when 1 then 'one' when 2 then 'two' end").unwrap()
        );
        assert_eq!(
            Scalar::Null,
            eval("case when 1 > 2 then 'yes' end").unwrap()
        );
        assert_eq!(
            Scalar::text("no"),
            eval("case when null then 'yes' else 'no' end").unwrap()
        );
    }

    #[test]
    fn functions() {
        assert_eq!(Scalar::text("abc"), eval("lower('AbC')").unwrap());
        assert_eq!(Scalar::text("ABC"), eval("upper('AbC')").unwrap());
        assert_eq!(Scalar::Int(3), eval("length('héé')").unwrap());
        assert_eq!(Scalar::Int(4), eval("abs(-4)").unwrap());
        assert_eq!(Scalar::Float(2.35), eval("round(2.346, 2)").unwrap());
        assert_eq!(Scalar::Float(-3.0), eval("round(-2.5)").unwrap());
        assert_eq!(Scalar::Int(12), eval("round(12)").unwrap());
        assert_eq!(Scalar::Float(1200.0), eval("round(1234, -2)").unwrap());
        assert_eq!(Scalar::Int(2), eval("coalesce(null, 2, 3)").unwrap());
        assert_eq!(Scalar::Null, eval("upper(null)").unwrap());
        eval("upper(1)").unwrap_err();
    }

    #[test]
    fn concat() {
        assert_eq!(Scalar::text("a1"), eval("'a' || 1").unwrap());
        assert_eq!(Scalar::Null, eval("'a' || null").unwrap());
    }
}
