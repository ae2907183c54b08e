//! Execution of a single `SELECT` over one relation.
use std::cmp::Ordering;
use std::collections::HashSet;

use dataplay_parser::ast::{Expr, Ident, Literal, OrderByNode, QueryNode, SelectExpr};
use indexmap::IndexMap;

use super::Relation;
use super::aggregate::Accumulator;
use super::bind::{BindMode, BoundExpr, GroupingState, Scope, ident_matches};
use super::context::ExecContext;
use super::eval::{EvalInput, truth};
use crate::errors::{Result, runtime};
use crate::scalar::{Scalar, ScalarKey, row_key};
use crate::table::{TabularTable, dedup_column_names};

/// A projection item after wildcard expansion.
#[derive(Debug)]
enum Projection<'q> {
    /// Source column pulled in by `*` or `rel.*`.
    Column(usize),
    Expr(&'q Expr),
}

#[derive(Debug)]
enum SortSource {
    /// Sort on an already computed output column.
    Output(usize),
    /// Sort on an expression not in the output.
    Expr(BoundExpr),
}

#[derive(Debug)]
struct SortKey {
    source: SortSource,
    desc: bool,
    nulls_first: bool,
}

#[derive(Debug)]
struct OutputRow {
    values: Vec<Scalar>,
    /// Values for `SortSource::Expr` keys, in key order.
    sort_values: Vec<Scalar>,
}

#[derive(Debug)]
struct Group {
    keys: Vec<Scalar>,
    accumulators: Vec<Accumulator>,
}

pub(crate) fn execute_select(
    relation: &Relation,
    table: &TabularTable,
    query: &QueryNode,
    ctx: &ExecContext,
) -> Result<TabularTable> {
    let select = &query.select;

    // A query without FROM produces a single row from no input columns.
    let no_from: [Vec<Scalar>; 1] = [Vec::new()];
    let (scope, input) = match &select.from {
        Some(from) => (
            Scope::for_reference(
                relation,
                &from.reference,
                from.alias.as_ref(),
                table.columns(),
            )?,
            table.rows(),
        ),
        None => (Scope::empty(), no_from.as_slice()),
    };

    let rows = filter_rows(&scope, input, select.where_expr.as_ref(), ctx)?;

    let projections = expand_projections(&scope, &select.projections)?;
    let names: Vec<String> = projections.iter().map(|(name, _)| name.clone()).collect();

    let grouped = !select.group_by.is_empty()
        || select.having.is_some()
        || projections
            .iter()
            .any(|(_, p)| matches!(p, Projection::Expr(expr) if expr.contains_aggregate()))
        || query.order_by.iter().any(|o| o.expr.contains_aggregate());

    let mut output = if grouped {
        execute_grouped(&scope, query, &projections, &names, rows, ctx)?
    } else {
        execute_ungrouped(&scope, query, &projections, &names, rows, ctx)?
    };

    if select.distinct {
        if output
            .keys
            .iter()
            .any(|k| matches!(k.source, SortSource::Expr(_)))
        {
            return Err(runtime!(
                "For SELECT DISTINCT, ORDER BY expressions must appear in the select list"
            ));
        }
        let mut seen: HashSet<Vec<ScalarKey>> = HashSet::new();
        output.rows.retain(|row| seen.insert(row_key(&row.values)));
    }

    if !output.keys.is_empty() {
        let keys = &output.keys;
        output.rows.sort_by(|a, b| compare_rows(keys, a, b));
        ctx.check()?;
    }

    let offset = to_usize(query.limit.offset.unwrap_or(0));
    let limit = query.limit.limit.map(to_usize).unwrap_or(usize::MAX);
    let rows: Vec<Vec<Scalar>> = output
        .rows
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|row| row.values)
        .collect();

    Ok(TabularTable::new_unchecked(dedup_column_names(names), rows))
}

#[derive(Debug)]
struct Output {
    rows: Vec<OutputRow>,
    keys: Vec<SortKey>,
}

/// Apply WHERE, keeping only rows where the predicate is true.
fn filter_rows<'a>(
    scope: &Scope,
    input: &'a [Vec<Scalar>],
    predicate: Option<&Expr>,
    ctx: &ExecContext,
) -> Result<Vec<&'a [Scalar]>> {
    let predicate = match predicate {
        Some(expr) => Some(scope.bind(expr, &mut BindMode::Row)?),
        None => None,
    };

    let mut checker = ctx.checker();
    let mut rows = Vec::new();
    for row in input {
        checker.tick()?;
        if let Some(predicate) = &predicate {
            if truth(predicate.eval(&EvalInput::row(row))?, "WHERE")? != Some(true) {
                continue;
            }
        }
        rows.push(row.as_slice());
    }

    Ok(rows)
}

fn expand_projections<'q>(
    scope: &Scope,
    items: &'q [SelectExpr],
) -> Result<Vec<(String, Projection<'q>)>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SelectExpr::Wildcard => {
                if !scope.has_relation() {
                    return Err(runtime!("SELECT * with no FROM clause"));
                }
                out.extend(expand_all(scope));
            }
            SelectExpr::QualifiedWildcard(reference) => {
                let matches = match reference.0.as_slice() {
                    [qualifier] => scope.matches_qualifier(qualifier),
                    _ => false,
                };
                if !matches {
                    return Err(runtime!("Unknown relation in wildcard: {reference}.*"));
                }
                out.extend(expand_all(scope));
            }
            SelectExpr::Expr(expr) => out.push((output_name(scope, expr), Projection::Expr(expr))),
            SelectExpr::AliasedExpr(expr, alias) => {
                out.push((alias.value.clone(), Projection::Expr(expr)))
            }
        }
    }
    Ok(out)
}

fn expand_all<'q>(scope: &Scope) -> Vec<(String, Projection<'q>)> {
    scope
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.clone(), Projection::Column(idx)))
        .collect()
}

/// Name of an unaliased output column.
///
/// Column references take the name of the column they resolve to, anything
/// else is named by its SQL text.
fn output_name(scope: &Scope, expr: &Expr) -> String {
    let ident = match expr {
        Expr::Ident(ident) => ident,
        Expr::CompoundIdent(idents) => match idents.last() {
            Some(ident) => ident,
            None => return expr.to_string(),
        },
        _ => return expr.to_string(),
    };
    scope
        .resolve_column(ident)
        .ok()
        .and_then(|idx| scope.columns().get(idx).cloned())
        .unwrap_or_else(|| ident.value.clone())
}

fn execute_ungrouped(
    scope: &Scope,
    query: &QueryNode,
    projections: &[(String, Projection)],
    names: &[String],
    rows: Vec<&[Scalar]>,
    ctx: &ExecContext,
) -> Result<Output> {
    let exprs = projections
        .iter()
        .map(|(_, p)| match p {
            Projection::Column(idx) => Ok(BoundExpr::Column(*idx)),
            Projection::Expr(expr) => scope.bind(expr, &mut BindMode::Row),
        })
        .collect::<Result<Vec<_>>>()?;

    let keys = bind_order_by(scope, &query.order_by, names, &exprs, &mut BindMode::Row)?;

    // Without sorting or deduplication, rows past the limit are never needed.
    let stop_after = if keys.is_empty() && !query.select.distinct {
        query.limit.limit.map(|limit| {
            to_usize(limit).saturating_add(to_usize(query.limit.offset.unwrap_or(0)))
        })
    } else {
        None
    };

    let mut checker = ctx.checker();
    let mut out = Vec::new();
    for row in rows {
        if stop_after.is_some_and(|n| out.len() >= n) {
            break;
        }
        checker.tick()?;
        let input = EvalInput::row(row);
        out.push(OutputRow {
            values: eval_all(&exprs, &input)?,
            sort_values: eval_sort_values(&keys, &input)?,
        });
    }

    Ok(Output { rows: out, keys })
}

fn execute_grouped(
    scope: &Scope,
    query: &QueryNode,
    projections: &[(String, Projection)],
    names: &[String],
    rows: Vec<&[Scalar]>,
    ctx: &ExecContext,
) -> Result<Output> {
    let select = &query.select;
    let mut state = GroupingState::default();
    for expr in &select.group_by {
        let key = scope.bind(expr, &mut BindMode::Row)?;
        state.keys.push(key);
    }

    let mut exprs = Vec::with_capacity(projections.len());
    for (_, projection) in projections {
        let bound = match projection {
            Projection::Column(idx) => state
                .keys
                .iter()
                .position(|key| key == &BoundExpr::Column(*idx))
                .map(BoundExpr::GroupKey)
                .ok_or_else(|| {
                    runtime!(
                        "Column '{}' must appear in the GROUP BY clause or be used in an aggregate function",
                        scope.columns().get(*idx).map(String::as_str).unwrap_or("?")
                    )
                })?,
            Projection::Expr(expr) => scope.bind(expr, &mut BindMode::Grouped(&mut state))?,
        };
        exprs.push(bound);
    }

    let having = match &select.having {
        Some(expr) => Some(scope.bind(expr, &mut BindMode::Grouped(&mut state))?),
        None => None,
    };

    let keys = bind_order_by(
        scope,
        &query.order_by,
        names,
        &exprs,
        &mut BindMode::Grouped(&mut state),
    )?;

    let mut groups: IndexMap<Vec<ScalarKey>, Group> = IndexMap::new();
    let mut checker = ctx.checker();
    for row in rows {
        checker.tick()?;
        let input = EvalInput::row(row);
        let key_values = eval_all(&state.keys, &input)?;
        let group = groups.entry(row_key(&key_values)).or_insert_with(|| Group {
            keys: key_values,
            accumulators: state.aggregates.iter().map(Accumulator::new).collect(),
        });

        for (acc, agg) in group.accumulators.iter_mut().zip(&state.aggregates) {
            let value = match &agg.arg {
                Some(arg) => Some(arg.eval(&input)?),
                None => None,
            };
            acc.update(value)?;
        }
    }

    // Aggregating without GROUP BY always produces one row.
    if groups.is_empty() && select.group_by.is_empty() {
        groups.insert(
            Vec::new(),
            Group {
                keys: Vec::new(),
                accumulators: state.aggregates.iter().map(Accumulator::new).collect(),
            },
        );
    }

    let mut out = Vec::with_capacity(groups.len());
    for (_, group) in groups {
        checker.tick()?;
        let aggregates = group
            .accumulators
            .into_iter()
            .map(Accumulator::finish)
            .collect::<Result<Vec<_>>>()?;
        let input = EvalInput::group(&group.keys, &aggregates);

        if let Some(having) = &having {
            if truth(having.eval(&input)?, "HAVING")? != Some(true) {
                continue;
            }
        }

        out.push(OutputRow {
            values: eval_all(&exprs, &input)?,
            sort_values: eval_sort_values(&keys, &input)?,
        });
    }

    Ok(Output { rows: out, keys })
}

/// Resolve ORDER BY items.
///
/// An integer literal is a 1-based position in the select list, and a bare
/// name matching an output column sorts on that column. Anything else is
/// bound as an expression against the input.
fn bind_order_by(
    scope: &Scope,
    order_by: &[OrderByNode],
    names: &[String],
    outputs: &[BoundExpr],
    mode: &mut BindMode,
) -> Result<Vec<SortKey>> {
    let mut keys = Vec::with_capacity(order_by.len());
    for node in order_by {
        let by_name = match &node.expr {
            Expr::Ident(ident) => output_position(names, ident),
            _ => None,
        };

        let source = match (&node.expr, by_name) {
            (Expr::Literal(Literal::Number(n)), _) if n.bytes().all(|b| b.is_ascii_digit()) => {
                match n.parse::<usize>() {
                    Ok(pos) if pos >= 1 && pos <= names.len() => SortSource::Output(pos - 1),
                    _ => return Err(runtime!("ORDER BY position {n} is not in select list")),
                }
            }
            (_, Some(idx)) => SortSource::Output(idx),
            (expr, None) => {
                let bound = scope.bind(expr, mode)?;
                match outputs.iter().position(|out| out == &bound) {
                    Some(idx) => SortSource::Output(idx),
                    None => SortSource::Expr(bound),
                }
            }
        };

        let asc = node.asc.unwrap_or(true);
        keys.push(SortKey {
            source,
            desc: !asc,
            nulls_first: node.nulls_first.unwrap_or(!asc),
        });
    }
    Ok(keys)
}

fn output_position(names: &[String], ident: &Ident) -> Option<usize> {
    names.iter().position(|name| ident_matches(ident, name))
}

fn eval_all(exprs: &[BoundExpr], input: &EvalInput) -> Result<Vec<Scalar>> {
    exprs.iter().map(|expr| expr.eval(input)).collect()
}

fn eval_sort_values(keys: &[SortKey], input: &EvalInput) -> Result<Vec<Scalar>> {
    keys.iter()
        .filter_map(|key| match &key.source {
            SortSource::Expr(expr) => Some(expr.eval(input)),
            SortSource::Output(_) => None,
        })
        .collect()
}

fn compare_rows(keys: &[SortKey], a: &OutputRow, b: &OutputRow) -> Ordering {
    let mut expr_idx = 0;
    for key in keys {
        let (left, right) = match key.source {
            SortSource::Output(idx) => (&a.values[idx], &b.values[idx]),
            SortSource::Expr(_) => {
                let pair = (&a.sort_values[expr_idx], &b.sort_values[expr_idx]);
                expr_idx += 1;
                pair
            }
        };

        let ord = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if key.nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if key.nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if key.desc => left.sort_cmp(right).reverse(),
            (false, false) => left.sort_cmp(right),
        };

        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}
