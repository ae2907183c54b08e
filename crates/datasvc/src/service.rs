//! Typed entry points for whatever transport sits in front of the service.
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::DatasvcConfig;
use crate::dataset::{DatasetMetadata, DatasetPayload, INLINE_TYPE, QueryOptions};
use crate::errors::Result;
use crate::format::FileFormat;
use crate::materialize::{MaterializeRequest, Materializer};
use crate::query::{Dialect, QueryEngine};
use crate::registry::{DatasetRegistry, DatasetSource, MetadataUpdate};
use crate::scalar::Scalar;
use crate::storage::persist::DatasetStorage;
use crate::table::TabularTable;

/// Contents for a new dataset.
#[derive(Debug, Clone)]
pub enum DatasetContent {
    /// Raw bytes in a named format, e.g. `csv`.
    File { format: String, bytes: Bytes },
    /// Rows supplied directly.
    Inline {
        columns: Vec<String>,
        rows: Vec<Vec<Scalar>>,
    },
}

#[derive(Debug, Clone)]
pub struct CreateDatasetRequest {
    /// Id for the dataset. A random id is generated if not provided.
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub content: DatasetContent,
}

/// How query results are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultEncoding {
    /// Columns and rows.
    #[default]
    Table,
    /// A JSON array with one object per row, keys in column order.
    Json,
}

#[derive(Debug, Clone)]
pub struct QueryDatasetRequest {
    pub id: String,
    pub query: String,
    /// Dialect name, e.g. `sql` or `filter`.
    pub dialect: String,
    pub encoding: ResultEncoding,
    /// Overrides the configured query timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl QueryDatasetRequest {
    pub fn new(id: impl Into<String>, query: impl Into<String>, dialect: impl Into<String>) -> Self {
        QueryDatasetRequest {
            id: id.into(),
            query: query.into(),
            dialect: dialect.into(),
            encoding: ResultEncoding::default(),
            timeout: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadDatasetRequest {
    /// File name, the extension selects the format and the stem becomes the
    /// dataset id and name.
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct Query2DatasetRequest {
    pub source_dataset_id: String,
    pub query_type: String,
    pub query: String,
    pub dataset_id: String,
    pub dataset_name: String,
    pub dataset_description: String,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone)]
pub struct UpdateDatasetRequest {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Result of a query, encoded as requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Table {
        cols: Vec<String>,
        rows: Vec<Vec<Scalar>>,
    },
    Json(Value),
}

impl QueryOutput {
    fn encode(table: TabularTable, encoding: ResultEncoding) -> QueryOutput {
        match encoding {
            ResultEncoding::Table => {
                let (cols, rows) = table.into_parts();
                QueryOutput::Table { cols, rows }
            }
            ResultEncoding::Json => QueryOutput::Json(table_to_records(&table)),
        }
    }
}

fn table_to_records(table: &TabularTable) -> Value {
    let records = table
        .rows()
        .iter()
        .map(|row| {
            let record: Map<String, Value> = table
                .columns()
                .iter()
                .zip(row)
                .map(|(col, v)| (col.clone(), scalar_to_json(v)))
                .collect();
            Value::Object(record)
        })
        .collect();
    Value::Array(records)
}

fn scalar_to_json(v: &Scalar) -> Value {
    match v {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Int(i) => Value::from(*i),
        Scalar::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Scalar::Text(s) => Value::String(s.clone()),
    }
}

/// The dataset service.
///
/// Cheap to clone, clones share the same registry.
#[derive(Debug, Clone)]
pub struct DatasetService {
    registry: Arc<DatasetRegistry>,
    engine: QueryEngine,
}

impl DatasetService {
    pub fn new(registry: Arc<DatasetRegistry>, engine: QueryEngine) -> Self {
        DatasetService { registry, engine }
    }

    /// Service with in-memory storage and default settings.
    pub fn in_memory() -> Self {
        let storage = Arc::new(DatasetStorage::in_memory());
        Self::new(
            Arc::new(DatasetRegistry::new(storage)),
            QueryEngine::default(),
        )
    }

    /// Open the service, restoring datasets from the configured storage.
    pub async fn from_config(config: &DatasvcConfig) -> Result<Self> {
        let storage = Arc::new(DatasetStorage::from_config(&config.storage)?);
        let registry = DatasetRegistry::open(storage).await?;
        Ok(Self::new(
            Arc::new(registry),
            QueryEngine::from_config(config),
        ))
    }

    pub fn registry(&self) -> &Arc<DatasetRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub async fn list_datasets(&self) -> Vec<DatasetMetadata> {
        self.registry.list().await
    }

    pub async fn create_dataset(&self, req: CreateDatasetRequest) -> Result<DatasetMetadata> {
        let id = req
            .id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let (dataset_type, source) = match req.content {
            DatasetContent::File { format, bytes } => {
                // Normalize the tag, e.g. `CSV` and `ndjson`.
                let format = format.parse::<FileFormat>()?;
                (
                    format.as_str().to_string(),
                    DatasetSource::Upload { bytes },
                )
            }
            DatasetContent::Inline { columns, rows } => (
                INLINE_TYPE.to_string(),
                DatasetSource::Table(TabularTable::try_new(columns, rows)?),
            ),
        };

        let meta = DatasetMetadata {
            id,
            name: req.name,
            dataset_type,
            description: req.description,
        };
        let dataset = self.registry.create(meta, source).await?;
        Ok(dataset.metadata())
    }

    pub async fn get_dataset(&self, id: &str) -> Result<DatasetPayload> {
        self.registry.get(id).await?.payload().await
    }

    pub async fn delete_dataset(&self, id: &str) -> Result<()> {
        self.registry.delete(id).await
    }

    pub async fn query_dataset(&self, req: QueryDatasetRequest) -> Result<QueryOutput> {
        let dialect = req.dialect.parse::<Dialect>()?;
        let dataset = self.registry.get(&req.id).await?;
        debug!(id = %req.id, %dialect, encoding = ?req.encoding, "querying dataset");

        let table = dataset
            .query(
                &self.engine,
                &req.query,
                dialect,
                QueryOptions {
                    timeout: req.timeout,
                    cancel: req.cancel,
                },
            )
            .await?;

        Ok(QueryOutput::encode(table, req.encoding))
    }

    pub async fn upload_dataset(&self, req: UploadDatasetRequest) -> Result<DatasetMetadata> {
        let (stem, format) = FileFormat::from_filename(&req.filename)?;
        let meta = DatasetMetadata {
            id: stem.to_string(),
            name: stem.to_string(),
            dataset_type: format.as_str().to_string(),
            description: String::new(),
        };
        let dataset = self
            .registry
            .create(meta, DatasetSource::Upload { bytes: req.bytes })
            .await?;
        Ok(dataset.metadata())
    }

    pub async fn query_to_dataset(&self, req: Query2DatasetRequest) -> Result<DatasetMetadata> {
        let dialect = req.query_type.parse::<Dialect>()?;
        let dataset = Materializer::new(&self.registry, &self.engine)
            .run(MaterializeRequest {
                source_id: req.source_dataset_id,
                dialect,
                query: req.query,
                dataset_id: req.dataset_id,
                dataset_name: req.dataset_name,
                dataset_description: req.dataset_description,
                timeout: req.timeout,
                cancel: req.cancel,
            })
            .await?;
        Ok(dataset.metadata())
    }

    pub async fn update_dataset(&self, req: UpdateDatasetRequest) -> Result<DatasetMetadata> {
        self.registry
            .update_metadata(
                &req.id,
                MetadataUpdate {
                    name: req.name,
                    description: req.description,
                },
            )
            .await
    }
}
