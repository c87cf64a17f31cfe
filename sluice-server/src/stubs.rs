//! Development collaborators
//!
//! In-process stand-ins for the warehouse-facing traits. The real
//! deployments wire SQL/script runners and a warehouse catalog here;
//! for local development the engine runs against these logging stubs.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use sluice_core::domain::pipeline::ScriptType;
use sluice_engine::executor::{DatasetCatalog, StepExecutor};

/// Executor that logs the payload and reports success.
pub struct LoggingExecutor;

#[async_trait]
impl StepExecutor for LoggingExecutor {
    async fn execute(&self, script_type: ScriptType, payload: &Value) -> anyhow::Result<String> {
        info!("Executing {:?} step: {}", script_type, payload);
        Ok("ok".to_string())
    }
}

/// Catalog that maps every dataset id to a synthetic table name and
/// reports zero rows everywhere.
pub struct NullCatalog;

#[async_trait]
impl DatasetCatalog for NullCatalog {
    async fn resolve_table(&self, dataset_id: Uuid) -> anyhow::Result<Option<String>> {
        Ok(Some(format!("dataset_{}", dataset_id.simple())))
    }

    async fn truncate(&self, table: &str) -> anyhow::Result<()> {
        info!("Truncating table {}", table);
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
        info!("Counting rows in table {}", table);
        Ok(0)
    }

    async fn estimate_rows(&self, table: &str) -> anyhow::Result<i64> {
        info!("Estimating rows in table {}", table);
        Ok(0)
    }
}
