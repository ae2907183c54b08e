//! Parser for the dataset query dialects. Heavily inspired by sqlparser-rs.
//!
//! Two entry points are provided:
//!
//! - [`parse_query`] parses a single `SELECT` statement.
//! - [`parse_filter`] parses a single boolean expression, used by the filter
//!   dialect.
pub mod ast;
pub mod errors;
pub mod keywords;
pub mod parser;
pub mod tokens;

use ast::{AstParseable, Expr, QueryNode};
use errors::Result;
use parser::Parser;

/// Parse a SQL query string into a query node.
pub fn parse_query(sql: &str) -> Result<QueryNode> {
    let mut parser = Parser::with_sql_string(sql)?;
    let query = parser.parse_statement()?;
    Ok(query)
}

/// Parse a filter expression.
///
/// The entire input must be consumed by the expression.
pub fn parse_filter(input: &str) -> Result<Expr> {
    let mut parser = Parser::with_sql_string(input)?;
    let expr = Expr::parse(&mut parser)?;
    parser.expect_end()?;
    Ok(expr)
}
