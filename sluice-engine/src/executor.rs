//! Step execution and dataset collaborators
//!
//! The engine never runs a SQL statement, a script, or an HTTP import
//! itself. It hands the step's opaque payload to a [`StepExecutor`]
//! and touches destination tables only through a [`DatasetCatalog`].

use async_trait::async_trait;
use uuid::Uuid;

use sluice_core::domain::pipeline::ScriptType;

/// Runs one step's payload.
///
/// Returns the step's log text on success; any error's message is
/// recorded verbatim on the failed StepExecution row.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        script_type: ScriptType,
        payload: &serde_json::Value,
    ) -> anyhow::Result<String>;
}

/// Resolves dataset ids to physical tables and performs the few table
/// operations the runner and the dataset poller need.
#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    /// Physical table identifier for a dataset, or `None` if the
    /// dataset no longer exists.
    async fn resolve_table(&self, dataset_id: Uuid) -> anyhow::Result<Option<String>>;
    async fn truncate(&self, table: &str) -> anyhow::Result<()>;
    /// Exact row count, used for a completed step's output_rows.
    async fn count_rows(&self, table: &str) -> anyhow::Result<i64>;
    /// Cheap approximate row count, used by the dataset-change poller.
    async fn estimate_rows(&self, table: &str) -> anyhow::Result<i64>;
}
