//! Query execution over a single in-memory table.
mod aggregate;
pub(crate) mod bind;
pub mod context;
mod eval;
mod filter;
mod select;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dataplay_parser::parse_query;
use tracing::debug;

use crate::config::{DEFAULT_CHECK_INTERVAL_ROWS, DatasvcConfig};
use crate::errors::{DatasvcError, Result};
use crate::table::TabularTable;
pub use context::ExecContext;

/// The dataset a query reads, as it can be named in the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub id: String,
    pub name: String,
}

impl Relation {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Relation {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Supported query languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// A single `SELECT` statement.
    #[default]
    Sql,
    /// A boolean expression over column names.
    Filter,
}

impl Dialect {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sql => "sql",
            Dialect::Filter => "filter",
        }
    }
}

impl FromStr for Dialect {
    type Err = DatasvcError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "sql" => Dialect::Sql,
            "filter" | "expr" => Dialect::Filter,
            _ => {
                return Err(DatasvcError::UnsupportedDialect {
                    dialect: s.to_string(),
                });
            }
        })
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runs queries against tables.
///
/// Execution is synchronous and CPU bound, use [`QueryEngine::execute_blocking`]
/// from async code.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine {
    default_timeout: Option<Duration>,
    check_interval_rows: usize,
}

impl Default for QueryEngine {
    fn default() -> Self {
        QueryEngine::new(None, DEFAULT_CHECK_INTERVAL_ROWS)
    }
}

impl QueryEngine {
    pub fn new(default_timeout: Option<Duration>, check_interval_rows: usize) -> Self {
        QueryEngine {
            default_timeout,
            check_interval_rows,
        }
    }

    pub fn from_config(config: &DatasvcConfig) -> Self {
        Self::new(config.query_timeout(), config.check_interval_rows)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Create an execution context using the engine defaults.
    ///
    /// `timeout` overrides the default timeout when set.
    pub fn context(&self, timeout: Option<Duration>) -> ExecContext {
        let ctx = ExecContext::new().with_check_interval(self.check_interval_rows);
        match timeout.or(self.default_timeout) {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    /// Execute a query against a table, producing a new table.
    pub fn execute(
        &self,
        relation: &Relation,
        table: &TabularTable,
        query: &str,
        dialect: Dialect,
        ctx: &ExecContext,
    ) -> Result<TabularTable> {
        ctx.check()?;
        debug!(id = %relation.id, %dialect, rows = table.num_rows(), "executing query");

        let result = match dialect {
            Dialect::Sql => {
                let node = parse_query(query).map_err(|e| DatasvcError::syntax(query, e))?;
                select::execute_select(relation, table, &node, ctx)?
            }
            Dialect::Filter => filter::execute_filter(relation, table, query, ctx)?,
        };

        ctx.check()?;
        Ok(result)
    }

    /// Execute a query on the blocking thread pool.
    ///
    /// If the context has a timeout, the query is abandoned once it elapses
    /// and its cancellation token is fired so the task stops at its next
    /// check.
    pub async fn execute_blocking(
        &self,
        relation: Relation,
        table: Arc<TabularTable>,
        query: String,
        dialect: Dialect,
        ctx: ExecContext,
    ) -> Result<TabularTable> {
        let engine = *self;
        let timeout = ctx.timeout();
        let cancel = ctx.cancellation_token().clone();

        let handle = tokio::task::spawn_blocking(move || {
            engine.execute(&relation, &table, &query, dialect, &ctx)
        });

        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, handle).await {
                Ok(result) => result?,
                Err(_) => {
                    cancel.cancel();
                    Err(DatasvcError::QueryTimeout { timeout })
                }
            },
            None => handle.await?,
        }
    }
}
