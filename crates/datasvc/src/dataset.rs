//! A single registered dataset.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{DatasvcError, Result};
use crate::query::{Dialect, QueryEngine, Relation};
use crate::scalar::Scalar;
use crate::storage::persist::DatasetStorage;
use crate::table::TabularTable;

/// Type tag for datasets produced by materializing a query.
pub const DERIVED_TYPE: &str = "derived";

/// Type tag for datasets created from rows supplied directly.
pub const INLINE_TYPE: &str = "inline";

/// Max length in bytes of a dataset id.
const MAX_ID_LENGTH: usize = 255;

/// Descriptive information about a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub id: String,
    pub name: String,
    /// Source format tag, e.g. `csv` or `derived`.
    #[serde(rename = "type")]
    pub dataset_type: String,
    #[serde(default)]
    pub description: String,
}

/// Full contents of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetPayload {
    pub name: String,
    pub id: String,
    pub cols: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

/// Validate a dataset id.
///
/// Ids are used as path components in storage, but object store paths handle
/// encoding, so only a small set of ids are rejected.
pub fn validate_id(id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        "must not be empty"
    } else if id.len() > MAX_ID_LENGTH {
        "must be at most 255 bytes"
    } else if id.chars().any(char::is_control) {
        "must not contain control characters"
    } else if id == "." || id == ".." {
        "must not be a relative path component"
    } else {
        return Ok(());
    };

    Err(DatasvcError::InvalidId {
        id: id.to_string(),
        reason,
    })
}

#[derive(Debug)]
enum TableState {
    /// Registered but the table hasn't been read from storage yet.
    Unloaded,
    Loaded(Arc<TabularTable>),
    /// Dataset has been deleted.
    Gone,
}

/// Options for a single query against a dataset.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Overrides the engine's default timeout.
    pub timeout: Option<Duration>,
    /// Caller token for cancelling the query.
    pub cancel: Option<CancellationToken>,
}

/// A dataset handle.
///
/// Queries take a snapshot of the table and never block each other. Deleting
/// the dataset fires its tombstone, failing queries still running against it.
#[derive(Debug)]
pub struct Dataset {
    id: String,
    created_at: DateTime<Utc>,
    meta: parking_lot::RwLock<DatasetMetadata>,
    state: RwLock<TableState>,
    tombstone: CancellationToken,
    storage: Arc<DatasetStorage>,
}

impl Dataset {
    /// Create a handle for a dataset whose table is already in memory.
    pub(crate) fn loaded(
        meta: DatasetMetadata,
        created_at: DateTime<Utc>,
        table: Arc<TabularTable>,
        storage: Arc<DatasetStorage>,
    ) -> Dataset {
        Self::with_state(meta, created_at, TableState::Loaded(table), storage)
    }

    /// Create a handle for a persisted dataset, reading the table on first
    /// access.
    pub(crate) fn unloaded(
        meta: DatasetMetadata,
        created_at: DateTime<Utc>,
        storage: Arc<DatasetStorage>,
    ) -> Dataset {
        Self::with_state(meta, created_at, TableState::Unloaded, storage)
    }

    fn with_state(
        meta: DatasetMetadata,
        created_at: DateTime<Utc>,
        state: TableState,
        storage: Arc<DatasetStorage>,
    ) -> Dataset {
        Dataset {
            id: meta.id.clone(),
            created_at,
            meta: parking_lot::RwLock::new(meta),
            state: RwLock::new(state),
            tombstone: CancellationToken::new(),
            storage,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> DatasetMetadata {
        self.meta.read().clone()
    }

    pub(crate) fn set_metadata(&self, meta: DatasetMetadata) {
        *self.meta.write() = meta;
    }

    /// Check if the dataset has been deleted.
    pub fn is_gone(&self) -> bool {
        self.tombstone.is_cancelled()
    }

    /// Get a snapshot of the table, loading it from storage if needed.
    pub async fn table(&self) -> Result<Arc<TabularTable>> {
        {
            let state = self.state.read().await;
            match &*state {
                TableState::Loaded(table) => return Ok(table.clone()),
                TableState::Gone => return Err(self.gone()),
                TableState::Unloaded => (),
            }
        }

        let mut state = self.state.write().await;
        // Another task may have loaded (or deleted) while waiting on the lock.
        match &*state {
            TableState::Loaded(table) => Ok(table.clone()),
            TableState::Gone => Err(self.gone()),
            TableState::Unloaded => {
                let persisted = self.storage.load(&self.id).await?;
                debug!(id = %self.id, rows = persisted.table.num_rows(), "loaded dataset table");
                let table = Arc::new(persisted.table);
                *state = TableState::Loaded(table.clone());
                Ok(table)
            }
        }
    }

    /// Get the metadata together with the full table.
    pub async fn payload(&self) -> Result<DatasetPayload> {
        let table = self.table().await?;
        let meta = self.metadata();
        Ok(DatasetPayload {
            name: meta.name,
            id: meta.id,
            cols: table.columns().to_vec(),
            rows: table.rows().to_vec(),
        })
    }

    /// Run a query against a snapshot of the table.
    pub async fn query(
        &self,
        engine: &QueryEngine,
        query: &str,
        dialect: Dialect,
        opts: QueryOptions,
    ) -> Result<TabularTable> {
        let table = self.table().await?;

        let mut ctx = engine
            .context(opts.timeout)
            .with_tombstone(self.id.clone(), self.tombstone.clone());
        if let Some(cancel) = &opts.cancel {
            ctx = ctx.with_cancellation(cancel);
        }

        let relation = Relation::new(self.id.clone(), self.meta.read().name.clone());
        engine
            .execute_blocking(relation, table, query.to_string(), dialect, ctx)
            .await
    }

    /// Mark the dataset as deleted.
    ///
    /// Waits for any in-progress table load, drops the cached table, and
    /// fires the tombstone.
    pub(crate) async fn mark_gone(&self) {
        let mut state = self.state.write().await;
        *state = TableState::Gone;
        self.tombstone.cancel();
    }

    fn gone(&self) -> DatasvcError {
        DatasvcError::DatasetGone {
            id: self.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> DatasetMetadata {
        DatasetMetadata {
            id: id.to_string(),
            name: "Sales".to_string(),
            dataset_type: "csv".to_string(),
            description: String::new(),
        }
    }

    fn table() -> TabularTable {
        TabularTable::try_new(
            vec!["a".to_string()],
            vec![vec![Scalar::Int(1)], vec![Scalar::Int(2)]],
        )
        .unwrap()
    }

    #[test]
    fn id_validation() {
        validate_id("sales").unwrap();
        validate_id("sales 2024/q1").unwrap();
        let long = "x".repeat(256);
        for id in ["", "..", "a\nb", long.as_str()] {
            let err = validate_id(id).unwrap_err();
            assert!(matches!(err, DatasvcError::InvalidId { .. }), "{id:?}");
        }
    }

    #[test]
    fn metadata_serializes_type() {
        let json = serde_json::to_value(meta("d1")).unwrap();
        assert_eq!("csv", json["type"]);

        let parsed: DatasetMetadata =
            serde_json::from_str(r#"{"id":"d1","name":"n","type":"json"}"#).unwrap();
        assert_eq!("", parsed.description);
    }

    #[tokio::test]
    async fn lazy_load() {
        let storage = Arc::new(DatasetStorage::in_memory());
        storage.persist(&meta("d1"), Utc::now(), &table()).await.unwrap();

        let dataset = Dataset::unloaded(meta("d1"), Utc::now(), storage);
        let first = dataset.table().await.unwrap();
        let second = dataset.table().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table(), *first);
    }

    #[tokio::test]
    async fn payload() {
        let storage = Arc::new(DatasetStorage::in_memory());
        let dataset = Dataset::loaded(meta("d1"), Utc::now(), Arc::new(table()), storage);
        let payload = dataset.payload().await.unwrap();
        assert_eq!("Sales", payload.name);
        assert_eq!(vec!["a".to_string()], payload.cols);
        assert_eq!(2, payload.rows.len());
    }

    #[tokio::test]
    async fn query_by_name() {
        let storage = Arc::new(DatasetStorage::in_memory());
        let dataset = Dataset::loaded(meta("d1"), Utc::now(), Arc::new(table()), storage);
        let out = dataset
            .query(
                &QueryEngine::default(),
                "SELECT a * 10 AS b FROM sales WHERE a > 1",
                Dialect::Sql,
                QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(&[vec![Scalar::Int(20)]], out.rows());
    }

    #[tokio::test]
    async fn gone_after_delete() {
        let storage = Arc::new(DatasetStorage::in_memory());
        let dataset = Dataset::loaded(meta("d1"), Utc::now(), Arc::new(table()), storage);
        dataset.mark_gone().await;

        assert!(dataset.is_gone());
        let err = dataset.table().await.unwrap_err();
        assert!(matches!(err, DatasvcError::DatasetGone { id } if id == "d1"));
    }
}
