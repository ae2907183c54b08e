//! Dataset catalog and query service.
//!
//! Datasets are registered from uploaded files or inline rows, persisted to
//! an object store, and queried with SQL or filter expressions. Query results
//! can be materialized as new datasets.
pub mod config;
pub mod dataset;
pub mod errors;
pub mod format;
pub mod materialize;
pub mod query;
pub mod registry;
pub mod scalar;
pub mod service;
pub mod storage;
pub mod table;

pub use dataset::{Dataset, DatasetMetadata, DatasetPayload};
pub use errors::{DatasvcError, ErrorKind, Result};
pub use query::{Dialect, QueryEngine};
pub use registry::DatasetRegistry;
pub use scalar::Scalar;
pub use service::DatasetService;
pub use table::TabularTable;
