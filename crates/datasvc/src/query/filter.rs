use dataplay_parser::parse_filter;

use super::Relation;
use super::bind::{BindMode, Scope};
use super::context::ExecContext;
use super::eval::{EvalInput, truth};
use crate::errors::{DatasvcError, Result};
use crate::table::TabularTable;

/// Evaluate a boolean expression against every row, returning the matching
/// rows with all source columns in source order.
pub(crate) fn execute_filter(
    relation: &Relation,
    table: &TabularTable,
    filter: &str,
    ctx: &ExecContext,
) -> Result<TabularTable> {
    let expr = parse_filter(filter).map_err(|e| DatasvcError::syntax(filter, e))?;

    let scope = Scope::for_relation(relation, table.columns());
    let predicate = scope.bind(&expr, &mut BindMode::Row)?;

    let mut checker = ctx.checker();
    let mut rows = Vec::new();
    for row in table.rows() {
        checker.tick()?;
        if truth(predicate.eval(&EvalInput::row(row))?, "filter")? == Some(true) {
            rows.push(row.clone());
        }
    }

    Ok(TabularTable::new_unchecked(table.columns().to_vec(), rows))
}
