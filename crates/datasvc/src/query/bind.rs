//! Resolve parsed expressions against a relation.
//!
//! Binding turns names into column indices, parses literals, and checks
//! function names and arities, so evaluation never has to look at names
//! again.
use std::fmt;

use dataplay_parser::ast::{
    BinaryOperator,
    Expr,
    Function,
    FunctionArg,
    Ident,
    Literal,
    ObjectReference,
    UnaryOperator,
    is_aggregate_name,
};

use super::Relation;
use crate::errors::{Result, runtime};
use crate::scalar::Scalar;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BoundExpr {
    /// Column in the input row.
    Column(usize),
    Literal(Scalar),
    Unary {
        op: UnaryOperator,
        expr: Box<BoundExpr>,
    },
    Binary {
        left: Box<BoundExpr>,
        op: BinaryOperator,
        right: Box<BoundExpr>,
    },
    IsNull {
        expr: Box<BoundExpr>,
        negated: bool,
    },
    InList {
        expr: Box<BoundExpr>,
        list: Vec<BoundExpr>,
        negated: bool,
    },
    Between {
        expr: Box<BoundExpr>,
        low: Box<BoundExpr>,
        high: Box<BoundExpr>,
        negated: bool,
    },
    Like {
        expr: Box<BoundExpr>,
        pattern: Box<BoundExpr>,
        negated: bool,
    },
    Case {
        operand: Option<Box<BoundExpr>>,
        when_then: Vec<(BoundExpr, BoundExpr)>,
        else_expr: Option<Box<BoundExpr>>,
    },
    Function {
        func: ScalarFunction,
        args: Vec<BoundExpr>,
    },
    /// Value of a GROUP BY expression for the current group.
    GroupKey(usize),
    /// Value of an aggregate for the current group.
    Aggregate(usize),
}

impl BoundExpr {
    /// Check if this expression reads any input column directly.
    pub fn references_columns(&self) -> bool {
        match self {
            BoundExpr::Column(_) => true,
            BoundExpr::Literal(_) | BoundExpr::GroupKey(_) | BoundExpr::Aggregate(_) => false,
            BoundExpr::Unary { expr, .. } | BoundExpr::IsNull { expr, .. } => {
                expr.references_columns()
            }
            BoundExpr::Binary { left, right, .. } => {
                left.references_columns() || right.references_columns()
            }
            BoundExpr::InList { expr, list, .. } => {
                expr.references_columns() || list.iter().any(|e| e.references_columns())
            }
            BoundExpr::Between {
                expr, low, high, ..
            } => expr.references_columns() || low.references_columns() || high.references_columns(),
            BoundExpr::Like { expr, pattern, .. } => {
                expr.references_columns() || pattern.references_columns()
            }
            BoundExpr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                operand.as_ref().is_some_and(|e| e.references_columns())
                    || when_then
                        .iter()
                        .any(|(w, t)| w.references_columns() || t.references_columns())
                    || else_expr.as_ref().is_some_and(|e| e.references_columns())
            }
            BoundExpr::Function { args, .. } => args.iter().any(|e| e.references_columns()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalarFunction {
    Lower,
    Upper,
    Length,
    Abs,
    Round,
    Coalesce,
}

impl ScalarFunction {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "lower" => ScalarFunction::Lower,
            "upper" => ScalarFunction::Upper,
            "length" | "char_length" => ScalarFunction::Length,
            "abs" => ScalarFunction::Abs,
            "round" => ScalarFunction::Round,
            "coalesce" => ScalarFunction::Coalesce,
            _ => return None,
        })
    }

    /// Inclusive bounds on the number of arguments.
    fn arity(&self) -> (usize, usize) {
        match self {
            ScalarFunction::Lower
            | ScalarFunction::Upper
            | ScalarFunction::Length
            | ScalarFunction::Abs => (1, 1),
            ScalarFunction::Round => (1, 2),
            ScalarFunction::Coalesce => (1, usize::MAX),
        }
    }
}

impl fmt::Display for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarFunction::Lower => "lower",
            ScalarFunction::Upper => "upper",
            ScalarFunction::Length => "length",
            ScalarFunction::Abs => "abs",
            ScalarFunction::Round => "round",
            ScalarFunction::Coalesce => "coalesce",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "count" => AggregateFunction::Count,
            "sum" => AggregateFunction::Sum,
            "avg" => AggregateFunction::Avg,
            "min" => AggregateFunction::Min,
            "max" => AggregateFunction::Max,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BoundAggregate {
    pub func: AggregateFunction,
    /// Argument to the aggregate, `None` for `count(*)`.
    pub arg: Option<BoundExpr>,
    pub distinct: bool,
}

/// Expressions collected while binding a grouped query.
#[derive(Debug, Default)]
pub(crate) struct GroupingState {
    /// Bound GROUP BY expressions.
    pub keys: Vec<BoundExpr>,
    /// Distinct aggregates referenced by the query.
    pub aggregates: Vec<BoundAggregate>,
}

#[derive(Debug)]
pub(crate) enum BindMode<'a> {
    /// Expressions are evaluated against each input row.
    Row,
    /// Expressions are evaluated once per group, and may only reference
    /// group keys and aggregates.
    Grouped(&'a mut GroupingState),
}

/// The names visible to expressions in a query.
#[derive(Debug)]
pub(crate) struct Scope<'a> {
    /// Names the relation can be qualified with. Empty if the query has no
    /// FROM.
    qualifiers: Vec<String>,
    columns: &'a [String],
    has_relation: bool,
}

impl<'a> Scope<'a> {
    /// Scope with no relation, e.g. `SELECT 1 + 1`.
    pub fn empty() -> Self {
        Scope {
            qualifiers: Vec::new(),
            columns: &[],
            has_relation: false,
        }
    }

    /// Scope for the dataset, checking that the FROM reference actually
    /// names it.
    pub fn for_reference(
        relation: &Relation,
        reference: &ObjectReference,
        alias: Option<&Ident>,
        columns: &'a [String],
    ) -> Result<Self> {
        let ident = match reference.0.as_slice() {
            [ident] => ident,
            _ => {
                return Err(runtime!(
                    "Qualified relation names are not supported: {reference}"
                ));
            }
        };

        if !ident_matches(ident, &relation.id) && !ident_matches(ident, &relation.name) {
            return Err(runtime!(
                "Unknown relation '{}', this query can only read dataset '{}'",
                ident.value,
                relation.id
            ));
        }

        let qualifiers = match alias {
            Some(alias) => vec![alias.value.clone()],
            None => vec![relation.id.clone(), relation.name.clone()],
        };

        Ok(Scope {
            qualifiers,
            columns,
            has_relation: true,
        })
    }

    /// Scope for the dataset with no explicit FROM, used by the filter
    /// dialect.
    pub fn for_relation(relation: &Relation, columns: &'a [String]) -> Self {
        Scope {
            qualifiers: vec![relation.id.clone(), relation.name.clone()],
            columns,
            has_relation: true,
        }
    }

    /// Check if the query reads the relation at all.
    pub fn has_relation(&self) -> bool {
        self.has_relation
    }

    pub fn columns(&self) -> &'a [String] {
        self.columns
    }

    /// Check if a qualifier like `t` in `t.*` names the relation.
    pub fn matches_qualifier(&self, ident: &Ident) -> bool {
        self.qualifiers.iter().any(|q| ident_matches(ident, q))
    }

    pub fn resolve_column(&self, ident: &Ident) -> Result<usize> {
        if !self.has_relation {
            return Err(runtime!(
                "Column '{}' referenced in a query without a FROM clause",
                ident.value
            ));
        }

        if let Some(idx) = self.columns.iter().position(|c| c == &ident.value) {
            return Ok(idx);
        }

        if !ident.quoted {
            let lower = ident.value.to_lowercase();
            let mut matches = self
                .columns
                .iter()
                .enumerate()
                .filter(|(_, c)| c.to_lowercase() == lower);
            match (matches.next(), matches.next()) {
                (Some((idx, _)), None) => return Ok(idx),
                (Some(_), Some(_)) => {
                    return Err(runtime!(
                        "Column reference '{}' is ambiguous, quote the name to match exactly",
                        ident.value
                    ));
                }
                _ => (),
            }
        }

        Err(runtime!(
            "Unknown column '{}', available columns: {}",
            ident.value,
            self.columns.join(", ")
        ))
    }

    fn resolve_compound(&self, idents: &[Ident]) -> Result<usize> {
        match idents {
            [qualifier, column] => {
                if !self.matches_qualifier(qualifier) {
                    return Err(runtime!(
                        "Unknown relation '{}' in column reference",
                        qualifier.value
                    ));
                }
                self.resolve_column(column)
            }
            _ => {
                let parts: Vec<_> = idents.iter().map(|i| i.to_string()).collect();
                Err(runtime!("Invalid column reference: {}", parts.join(".")))
            }
        }
    }

    pub fn bind(&self, expr: &Expr, mode: &mut BindMode) -> Result<BoundExpr> {
        if let BindMode::Grouped(state) = mode {
            if !expr.contains_aggregate() {
                let bound = self.bind(expr, &mut BindMode::Row)?;
                if let Some(idx) = state.keys.iter().position(|key| key == &bound) {
                    return Ok(BoundExpr::GroupKey(idx));
                }
                if !bound.references_columns() {
                    return Ok(bound);
                }
            }

            if let Expr::Function(func) = expr {
                if is_aggregate_name(&func.name.value) {
                    return self.bind_aggregate(func, state);
                }
            }
        }

        Ok(match expr {
            Expr::Ident(ident) => self.bind_column(self.resolve_column(ident)?, expr, mode)?,
            Expr::CompoundIdent(idents) => {
                self.bind_column(self.resolve_compound(idents)?, expr, mode)?
            }
            Expr::Literal(lit) => BoundExpr::Literal(bind_literal(lit)?),
            Expr::Nested(expr) => self.bind(expr, mode)?,
            Expr::UnaryExpr { op, expr } => BoundExpr::Unary {
                op: *op,
                expr: Box::new(self.bind(expr, mode)?),
            },
            Expr::BinaryExpr { left, op, right } => BoundExpr::Binary {
                left: Box::new(self.bind(left, mode)?),
                op: *op,
                right: Box::new(self.bind(right, mode)?),
            },
            Expr::IsNull { expr, negated } => BoundExpr::IsNull {
                expr: Box::new(self.bind(expr, mode)?),
                negated: *negated,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => BoundExpr::InList {
                expr: Box::new(self.bind(expr, mode)?),
                list: list
                    .iter()
                    .map(|e| self.bind(e, mode))
                    .collect::<Result<Vec<_>>>()?,
                negated: *negated,
            },
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => BoundExpr::Between {
                expr: Box::new(self.bind(expr, mode)?),
                low: Box::new(self.bind(low, mode)?),
                high: Box::new(self.bind(high, mode)?),
                negated: *negated,
            },
            Expr::Like {
                expr,
                negated,
                pattern,
            } => BoundExpr::Like {
                expr: Box::new(self.bind(expr, mode)?),
                pattern: Box::new(self.bind(pattern, mode)?),
                negated: *negated,
            },
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                let operand = match operand {
                    Some(operand) => Some(Box::new(self.bind(operand, mode)?)),
                    None => None,
                };
                let mut bound_when_then = Vec::with_capacity(when_then.len());
                for (when, then) in when_then {
                    bound_when_then.push((self.bind(when, mode)?, self.bind(then, mode)?));
                }
                let else_expr = match else_expr {
                    Some(else_expr) => Some(Box::new(self.bind(else_expr, mode)?)),
                    None => None,
                };
                BoundExpr::Case {
                    operand,
                    when_then: bound_when_then,
                    else_expr,
                }
            }
            Expr::Function(func) => {
                if is_aggregate_name(&func.name.value) {
                    return Err(runtime!(
                        "Aggregate function {} is not allowed here",
                        func.name.value
                    ));
                }
                self.bind_scalar_function(func, mode)?
            }
        })
    }

    fn bind_column(&self, idx: usize, expr: &Expr, mode: &BindMode) -> Result<BoundExpr> {
        match mode {
            BindMode::Row => Ok(BoundExpr::Column(idx)),
            BindMode::Grouped(_) => Err(runtime!(
                "Column '{expr}' must appear in the GROUP BY clause or be used in an aggregate function"
            )),
        }
    }

    fn bind_scalar_function(&self, func: &Function, mode: &mut BindMode) -> Result<BoundExpr> {
        let scalar = ScalarFunction::from_name(&func.name.value)
            .ok_or_else(|| runtime!("Unknown function '{}'", func.name.value))?;

        if func.distinct {
            return Err(runtime!("DISTINCT is only allowed in aggregate functions"));
        }

        let (min, max) = scalar.arity();
        if func.args.len() < min || func.args.len() > max {
            return Err(runtime!(
                "Function {scalar} called with {} arguments",
                func.args.len()
            ));
        }

        let mut args = Vec::with_capacity(func.args.len());
        for arg in &func.args {
            match arg {
                FunctionArg::Expr(expr) => args.push(self.bind(expr, mode)?),
                FunctionArg::Wildcard => {
                    return Err(runtime!("Function {scalar} does not accept '*'"));
                }
            }
        }

        Ok(BoundExpr::Function { func: scalar, args })
    }

    fn bind_aggregate(&self, func: &Function, state: &mut GroupingState) -> Result<BoundExpr> {
        let agg = AggregateFunction::from_name(&func.name.value)
            .ok_or_else(|| runtime!("Unknown aggregate '{}'", func.name.value))?;

        let arg = match (agg, func.args.as_slice()) {
            (AggregateFunction::Count, [FunctionArg::Wildcard]) if !func.distinct => None,
            (_, [FunctionArg::Expr(expr)]) => Some(self.bind(expr, &mut BindMode::Row)?),
            _ => {
                return Err(runtime!(
                    "Invalid arguments to aggregate: {}",
                    Expr::Function(func.clone())
                ));
            }
        };

        let bound = BoundAggregate {
            func: agg,
            arg,
            distinct: func.distinct,
        };

        let idx = match state.aggregates.iter().position(|a| a == &bound) {
            Some(idx) => idx,
            None => {
                state.aggregates.push(bound);
                state.aggregates.len() - 1
            }
        };

        Ok(BoundExpr::Aggregate(idx))
    }
}

/// Check if an identifier refers to a name.
///
/// Quoted identifiers must match exactly, unquoted ones ignore case.
pub(crate) fn ident_matches(ident: &Ident, name: &str) -> bool {
    if ident.quoted {
        ident.value == name
    } else {
        ident.value == name || ident.value.to_lowercase() == name.to_lowercase()
    }
}

fn bind_literal(lit: &Literal) -> Result<Scalar> {
    Ok(match lit {
        Literal::Null => Scalar::Null,
        Literal::Boolean(b) => Scalar::Bool(*b),
        Literal::SingleQuotedString(s) => Scalar::Text(s.clone()),
        Literal::Number(n) => {
            let is_float = n.contains(['.', 'e', 'E']);
            if !is_float {
                if let Ok(v) = n.parse::<i64>() {
                    return Ok(Scalar::Int(v));
                }
            }
            match n.parse::<f64>() {
                Ok(v) if v.is_finite() => Scalar::Float(v),
                _ => return Err(runtime!("Numeric literal out of range: {n}")),
            }
        }
    })
}
