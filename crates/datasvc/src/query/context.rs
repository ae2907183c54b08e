use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_CHECK_INTERVAL_ROWS;
use crate::errors::{DatasvcError, Result};

/// Execution limits for a single query.
///
/// Checked between evaluation steps. A query stops at the first check after
/// its deadline passes, its cancellation token fires, or the dataset it reads
/// is deleted.
#[derive(Debug, Clone)]
pub struct ExecContext {
    deadline: Option<Deadline>,
    cancel: CancellationToken,
    tombstone: Option<Tombstone>,
    check_interval: usize,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    timeout: Duration,
}

#[derive(Debug, Clone)]
struct Tombstone {
    id: String,
    token: CancellationToken,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecContext {
    pub fn new() -> Self {
        ExecContext {
            deadline: None,
            cancel: CancellationToken::new(),
            tombstone: None,
            check_interval: DEFAULT_CHECK_INTERVAL_ROWS,
        }
    }

    /// Stop the query once `timeout` has elapsed from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Deadline {
            at: Instant::now() + timeout,
            timeout,
        });
        self
    }

    /// Stop the query when the caller's token is cancelled.
    ///
    /// A child token is held so cancelling the query internally (e.g. on
    /// timeout) never cancels the caller's token.
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.cancel = token.child_token();
        self
    }

    /// Fail with `DatasetGone` once the dataset's tombstone fires.
    pub fn with_tombstone(mut self, id: impl Into<String>, token: CancellationToken) -> Self {
        self.tombstone = Some(Tombstone {
            id: id.into(),
            token,
        });
        self
    }

    pub fn with_check_interval(mut self, rows: usize) -> Self {
        self.check_interval = rows.max(1);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.deadline.map(|d| d.timeout)
    }

    /// Token cancelled to stop this query. Cancelling it doesn't affect the
    /// caller's token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check if the query should keep going.
    pub fn check(&self) -> Result<()> {
        if let Some(tombstone) = &self.tombstone {
            if tombstone.token.is_cancelled() {
                return Err(DatasvcError::DatasetGone {
                    id: tombstone.id.clone(),
                });
            }
        }
        if self.cancel.is_cancelled() {
            return Err(DatasvcError::QueryCancelled);
        }
        if let Some(deadline) = &self.deadline {
            if Instant::now() >= deadline.at {
                return Err(DatasvcError::QueryTimeout {
                    timeout: deadline.timeout,
                });
            }
        }
        Ok(())
    }

    /// Get a checker that only checks every `check_interval` ticks.
    pub(crate) fn checker(&self) -> RowChecker<'_> {
        RowChecker {
            ctx: self,
            count: 0,
        }
    }
}

/// Amortizes context checks over many rows.
#[derive(Debug)]
pub(crate) struct RowChecker<'a> {
    ctx: &'a ExecContext,
    count: usize,
}

impl RowChecker<'_> {
    /// Note one unit of work, checking the context if enough have passed.
    pub fn tick(&mut self) -> Result<()> {
        self.count += 1;
        if self.count >= self.ctx.check_interval {
            self.count = 0;
            self.ctx.check()?;
        }
        Ok(())
    }
}
