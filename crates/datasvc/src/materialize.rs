//! Materializing a query result as a new dataset.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dataset::{DERIVED_TYPE, Dataset, DatasetMetadata, QueryOptions, validate_id};
use crate::errors::Result;
use crate::query::{Dialect, QueryEngine};
use crate::registry::{DatasetRegistry, DatasetSource};
use crate::table::TabularTable;

/// Steps of a materialization run.
///
/// A run moves through the steps in order. `Failed` can be reached from any
/// step, and a failed run leaves the registry unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterializeStep {
    ResolveSource,
    ExecuteQuery,
    BuildMetadata,
    Register,
    Done,
    Failed,
}

impl MaterializeStep {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MaterializeStep::ResolveSource => "resolve_source",
            MaterializeStep::ExecuteQuery => "execute_query",
            MaterializeStep::BuildMetadata => "build_metadata",
            MaterializeStep::Register => "register",
            MaterializeStep::Done => "done",
            MaterializeStep::Failed => "failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, MaterializeStep::Done | MaterializeStep::Failed)
    }
}

impl fmt::Display for MaterializeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run a query against one dataset and register the result as another.
#[derive(Debug, Clone)]
pub struct MaterializeRequest {
    pub source_id: String,
    pub dialect: Dialect,
    pub query: String,
    pub dataset_id: String,
    pub dataset_name: String,
    pub dataset_description: String,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

/// Intermediate values carried between steps.
enum Stage {
    ResolveSource,
    ExecuteQuery(Arc<Dataset>),
    BuildMetadata(TabularTable),
    Register(DatasetMetadata, TabularTable),
    Done(Arc<Dataset>),
}

impl Stage {
    fn step(&self) -> MaterializeStep {
        match self {
            Stage::ResolveSource => MaterializeStep::ResolveSource,
            Stage::ExecuteQuery(_) => MaterializeStep::ExecuteQuery,
            Stage::BuildMetadata(_) => MaterializeStep::BuildMetadata,
            Stage::Register(..) => MaterializeStep::Register,
            Stage::Done(_) => MaterializeStep::Done,
        }
    }
}

#[derive(Debug)]
pub struct Materializer<'a> {
    registry: &'a DatasetRegistry,
    engine: &'a QueryEngine,
}

impl<'a> Materializer<'a> {
    pub fn new(registry: &'a DatasetRegistry, engine: &'a QueryEngine) -> Self {
        Materializer { registry, engine }
    }

    /// Run the pipeline to completion, returning the new dataset.
    pub async fn run(&self, req: MaterializeRequest) -> Result<Arc<Dataset>> {
        let mut stage = Stage::ResolveSource;
        loop {
            let step = stage.step();
            if let Stage::Done(dataset) = stage {
                debug!(source = %req.source_id, target = %req.dataset_id, %step, "materialization finished");
                return Ok(dataset);
            }

            stage = match self.advance(stage, &req).await {
                Ok(next) => next,
                Err(e) => {
                    warn!(
                        source = %req.source_id,
                        target = %req.dataset_id,
                        %step,
                        next = %MaterializeStep::Failed,
                        %e,
                        "materialization failed"
                    );
                    return Err(e);
                }
            };
            debug!(
                source = %req.source_id,
                target = %req.dataset_id,
                from = %step,
                to = %stage.step(),
                "materialization step"
            );
        }
    }

    async fn advance(&self, stage: Stage, req: &MaterializeRequest) -> Result<Stage> {
        Ok(match stage {
            Stage::ResolveSource => {
                let source = self.registry.get(&req.source_id).await?;
                // Reject a taken id before doing any work. Registration
                // checks again atomically.
                validate_id(&req.dataset_id)?;
                self.registry.ensure_available(&req.dataset_id).await?;
                Stage::ExecuteQuery(source)
            }
            Stage::ExecuteQuery(source) => {
                let opts = QueryOptions {
                    timeout: req.timeout,
                    cancel: req.cancel.clone(),
                };
                let table = source
                    .query(self.engine, &req.query, req.dialect, opts)
                    .await?;
                Stage::BuildMetadata(table)
            }
            Stage::BuildMetadata(table) => {
                let meta = DatasetMetadata {
                    id: req.dataset_id.clone(),
                    name: req.dataset_name.clone(),
                    dataset_type: DERIVED_TYPE.to_string(),
                    description: req.dataset_description.clone(),
                };
                Stage::Register(meta, table)
            }
            Stage::Register(meta, table) => {
                let dataset = self
                    .registry
                    .create(meta, DatasetSource::Table(table))
                    .await?;
                Stage::Done(dataset)
            }
            Stage::Done(dataset) => Stage::Done(dataset),
        })
    }
}
