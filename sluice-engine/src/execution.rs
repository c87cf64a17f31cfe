//! Execution runner
//!
//! Drives one asynchronous pipeline run: creates the bookkeeping rows,
//! walks the steps strictly sequentially in topological order, derives
//! each step's eligibility from its direct dependencies' recorded
//! status, and publishes a completion event whether the run succeeded,
//! failed, or crashed in its own bookkeeping.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use sluice_core::domain::event::PipelineCompleted;
use sluice_core::domain::execution::{
    Execution, ExecutionStatus, RunOrigin, StepExecution, StepStatus,
};
use sluice_core::domain::pipeline::{LoadStrategy, Step};

use crate::dag::topo_order;
use crate::error::{EngineError, Result};
use crate::events::CompletionBus;
use crate::executor::{DatasetCatalog, StepExecutor};
use crate::store::Store;

/// One-way entry point the trigger engine uses to start runs. Keeps
/// the trigger -> orchestrator direction a plain interface call so the
/// two services need no constructor cycle.
#[async_trait]
pub trait PipelineLauncher: Send + Sync {
    async fn launch(
        &self,
        pipeline_id: Uuid,
        origin: RunOrigin,
        trigger_id: Option<Uuid>,
    ) -> Result<Uuid>;
}

#[derive(Clone)]
pub struct ExecutionRunner {
    store: Arc<dyn Store>,
    executor: Arc<dyn StepExecutor>,
    catalog: Arc<dyn DatasetCatalog>,
    completions: CompletionBus,
}

impl ExecutionRunner {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn StepExecutor>,
        catalog: Arc<dyn DatasetCatalog>,
        completions: CompletionBus,
    ) -> Self {
        Self {
            store,
            executor,
            catalog,
            completions,
        }
    }

    /// Starts a run and returns its execution id immediately.
    ///
    /// The Execution row and one Pending StepExecution row per step
    /// are persisted before this returns; the walk itself happens on a
    /// spawned task.
    pub async fn start(
        &self,
        pipeline_id: Uuid,
        requested_by: Option<String>,
        origin: RunOrigin,
        trigger_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let _pipeline = self
            .store
            .find_pipeline(pipeline_id)
            .await?
            .ok_or(EngineError::PipelineNotFound(pipeline_id))?;

        let steps = self.store.steps_for_pipeline(pipeline_id).await?;

        let execution = Execution {
            id: Uuid::new_v4(),
            pipeline_id,
            status: ExecutionStatus::Pending,
            triggered_by: origin,
            trigger_id,
            requested_by,
            requested_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.store.insert_execution(execution.clone()).await?;

        let mut rows: HashMap<Uuid, StepExecution> = HashMap::new();
        for step in &steps {
            let row = StepExecution::pending(execution.id, step.id);
            self.store.insert_step_execution(row.clone()).await?;
            rows.insert(step.id, row);
        }

        tracing::info!(
            "Execution {} created for pipeline {} ({} steps, origin {:?})",
            execution.id,
            pipeline_id,
            steps.len(),
            origin
        );

        let runner = self.clone();
        let id = execution.id;
        tokio::spawn(async move {
            runner.run(execution, steps, rows).await;
        });

        Ok(id)
    }

    async fn run(
        &self,
        mut execution: Execution,
        steps: Vec<Step>,
        mut rows: HashMap<Uuid, StepExecution>,
    ) {
        let execution_id = execution.id;
        let pipeline_id = execution.pipeline_id;

        let status = match self.run_inner(&mut execution, &steps, &mut rows).await {
            Ok(status) => status,
            Err(e) => {
                // Bookkeeping failed mid-run; the run itself is lost,
                // so record the whole execution as failed.
                error!("Execution {} aborted: {}", execution_id, e);
                ExecutionStatus::Failed
            }
        };

        execution.status = status;
        execution.completed_at = Some(chrono::Utc::now());
        if let Err(e) = self.store.update_execution(execution).await {
            error!(
                "Failed to persist final status for execution {}: {}",
                execution_id, e
            );
        }

        tracing::info!("Execution {} finished with status {:?}", execution_id, status);

        self.completions.publish(PipelineCompleted {
            pipeline_id,
            execution_id,
            status,
        });
    }

    /// The sequential walk. Only persistence failures surface from
    /// here; step failures are recorded and absorbed.
    async fn run_inner(
        &self,
        execution: &mut Execution,
        steps: &[Step],
        rows: &mut HashMap<Uuid, StepExecution>,
    ) -> Result<ExecutionStatus> {
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(chrono::Utc::now());
        self.store.update_execution(execution.clone()).await?;

        let ids: Vec<Uuid> = steps.iter().map(|s| s.id).collect();
        let deps: HashMap<Uuid, Vec<Uuid>> = steps
            .iter()
            .map(|s| (s.id, s.depends_on.clone()))
            .collect();
        let order = topo_order(&ids, &deps)?;
        let by_id: HashMap<Uuid, &Step> = steps.iter().map(|s| (s.id, s)).collect();

        // step id -> recorded status; every step re-derives its own
        // eligibility from this, so a skip propagates level by level.
        let mut statuses: HashMap<Uuid, StepStatus> = HashMap::new();

        for step_id in order {
            let step = by_id[&step_id];
            let Some(row) = rows.get_mut(&step_id) else {
                continue;
            };

            let deps_completed = step
                .depends_on
                .iter()
                .all(|dep| statuses.get(dep) == Some(&StepStatus::Completed));

            let status = if deps_completed {
                self.execute_step(step, row).await?
            } else {
                row.status = StepStatus::Skipped;
                row.error_message = Some("dependency failed or skipped".to_string());
                row.completed_at = Some(chrono::Utc::now());
                self.store.update_step_execution(row.clone()).await?;
                StepStatus::Skipped
            };

            statuses.insert(step_id, status);
        }

        let any_failed = statuses.values().any(|s| *s == StepStatus::Failed);
        Ok(if any_failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        })
    }

    /// Runs one step. Execution failures are written to the row and
    /// swallowed; the caller reads the returned status instead.
    async fn execute_step(&self, step: &Step, row: &mut StepExecution) -> Result<StepStatus> {
        row.status = StepStatus::Running;
        row.started_at = Some(chrono::Utc::now());
        self.store.update_step_execution(row.clone()).await?;

        match self.try_execute(step).await {
            Ok((output_rows, log)) => {
                row.status = StepStatus::Completed;
                row.output_rows = output_rows;
                row.log = Some(log);
            }
            Err(e) => {
                warn!("Step '{}' ({}) failed: {:#}", step.name, step.id, e);
                row.status = StepStatus::Failed;
                row.error_message = Some(format!("{:#}", e));
            }
        }

        row.completed_at = Some(chrono::Utc::now());
        self.store.update_step_execution(row.clone()).await?;
        Ok(row.status)
    }

    async fn try_execute(&self, step: &Step) -> anyhow::Result<(Option<i64>, String)> {
        // A step need not write to a dataset.
        let table = match step.output_dataset_id {
            Some(dataset_id) => self.catalog.resolve_table(dataset_id).await?,
            None => None,
        };

        let strategy = LoadStrategy::parse(&step.load_strategy).unwrap_or_else(|| {
            warn!(
                "Unknown load strategy '{}' on step '{}'; falling back to REPLACE",
                step.load_strategy, step.name
            );
            LoadStrategy::Replace
        });

        // The destination is prepared before the executor runs.
        if strategy == LoadStrategy::Replace {
            if let Some(table) = &table {
                self.catalog.truncate(table).await?;
            }
        }

        let log = self.executor.execute(step.script_type, &step.payload).await?;

        let output_rows = match &table {
            Some(table) => Some(self.catalog.count_rows(table).await?),
            None => None,
        };

        Ok((output_rows, log))
    }
}

#[async_trait]
impl PipelineLauncher for ExecutionRunner {
    async fn launch(
        &self,
        pipeline_id: Uuid,
        origin: RunOrigin,
        trigger_id: Option<Uuid>,
    ) -> Result<Uuid> {
        self.start(pipeline_id, None, origin, trigger_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use sluice_core::domain::pipeline::{Pipeline, ScriptType};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails any step whose payload contains `"fail": true`.
    struct FakeExecutor;

    #[async_trait]
    impl StepExecutor for FakeExecutor {
        async fn execute(
            &self,
            _script_type: ScriptType,
            payload: &serde_json::Value,
        ) -> anyhow::Result<String> {
            if payload.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
                anyhow::bail!("boom");
            }
            Ok("ok".to_string())
        }
    }

    #[derive(Default)]
    struct FakeCatalog {
        truncated: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DatasetCatalog for FakeCatalog {
        async fn resolve_table(&self, dataset_id: Uuid) -> anyhow::Result<Option<String>> {
            Ok(Some(format!("ds_{}", dataset_id.simple())))
        }

        async fn truncate(&self, table: &str) -> anyhow::Result<()> {
            self.truncated.lock().unwrap().push(table.to_string());
            Ok(())
        }

        async fn count_rows(&self, _table: &str) -> anyhow::Result<i64> {
            Ok(5)
        }

        async fn estimate_rows(&self, _table: &str) -> anyhow::Result<i64> {
            Ok(5)
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        catalog: Arc<FakeCatalog>,
        runner: ExecutionRunner,
        bus: CompletionBus,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(FakeCatalog::default());
        let bus = CompletionBus::default();
        let runner = ExecutionRunner::new(
            store.clone(),
            Arc::new(FakeExecutor),
            catalog.clone(),
            bus.clone(),
        );
        Harness {
            store,
            catalog,
            runner,
            bus,
        }
    }

    async fn seed_pipeline(store: &MemoryStore, steps: Vec<Step>) -> Uuid {
        let id = steps
            .first()
            .map(|s| s.pipeline_id)
            .unwrap_or_else(Uuid::new_v4);
        let now = chrono::Utc::now();
        store
            .insert_pipeline(Pipeline {
                id,
                name: "test".to_string(),
                description: None,
                is_active: true,
                created_by: "tester".to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        store.replace_steps(id, steps).await.unwrap();
        id
    }

    fn make_step(pipeline_id: Uuid, name: &str, deps: Vec<Uuid>, fail: bool) -> Step {
        Step {
            id: Uuid::new_v4(),
            pipeline_id,
            name: name.to_string(),
            script_type: ScriptType::Script,
            payload: serde_json::json!({ "fail": fail }),
            output_dataset_id: None,
            load_strategy: "APPEND".to_string(),
            depends_on: deps,
        }
    }

    async fn await_completion(
        mut rx: tokio::sync::broadcast::Receiver<PipelineCompleted>,
    ) -> PipelineCompleted {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("run did not complete in time")
            .expect("bus closed")
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_and_fails_run() {
        let h = harness();
        let pipeline_id = Uuid::new_v4();
        let a = make_step(pipeline_id, "a", vec![], true);
        let b = make_step(pipeline_id, "b", vec![a.id], false);
        let (a_id, b_id) = (a.id, b.id);
        seed_pipeline(&h.store, vec![a, b]).await;

        let rx = h.bus.subscribe();
        let execution_id = h
            .runner
            .start(pipeline_id, None, RunOrigin::Manual, None)
            .await
            .unwrap();

        let completed = await_completion(rx).await;
        assert_eq!(completed.execution_id, execution_id);
        assert_eq!(completed.status, ExecutionStatus::Failed);

        let rows = h.store.step_executions_for(execution_id).await.unwrap();
        let by_step = |id: Uuid| rows.iter().find(|r| r.step_id == id).unwrap().clone();
        assert_eq!(by_step(a_id).status, StepStatus::Failed);
        assert_eq!(by_step(a_id).error_message.as_deref(), Some("boom"));
        assert_eq!(by_step(b_id).status, StepStatus::Skipped);
        assert_eq!(
            by_step(b_id).error_message.as_deref(),
            Some("dependency failed or skipped")
        );
    }

    #[tokio::test]
    async fn test_skip_propagates_transitively() {
        let h = harness();
        let pipeline_id = Uuid::new_v4();
        let a = make_step(pipeline_id, "a", vec![], false);
        let b = make_step(pipeline_id, "b", vec![a.id], true);
        let c = make_step(pipeline_id, "c", vec![b.id], false);
        let d = make_step(pipeline_id, "d", vec![c.id], false);
        let (c_id, d_id) = (c.id, d.id);
        seed_pipeline(&h.store, vec![a, b, c, d]).await;

        let rx = h.bus.subscribe();
        let execution_id = h
            .runner
            .start(pipeline_id, None, RunOrigin::Manual, None)
            .await
            .unwrap();
        await_completion(rx).await;

        let rows = h.store.step_executions_for(execution_id).await.unwrap();
        let by_step = |id: Uuid| rows.iter().find(|r| r.step_id == id).unwrap().clone();
        assert_eq!(by_step(c_id).status, StepStatus::Skipped);
        assert_eq!(by_step(d_id).status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_independent_successes_complete_with_one_event() {
        let h = harness();
        let pipeline_id = Uuid::new_v4();
        let steps = vec![
            make_step(pipeline_id, "a", vec![], false),
            make_step(pipeline_id, "b", vec![], false),
            make_step(pipeline_id, "c", vec![], false),
        ];
        seed_pipeline(&h.store, steps).await;

        let mut rx = h.bus.subscribe();
        let execution_id = h
            .runner
            .start(pipeline_id, None, RunOrigin::Manual, None)
            .await
            .unwrap();

        let completed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.status, ExecutionStatus::Completed);

        // Exactly one event for the run.
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));

        let execution = h.store.find_execution(execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.started_at.is_some());
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_replace_truncates_and_append_does_not() {
        let h = harness();
        let pipeline_id = Uuid::new_v4();
        let dataset = Uuid::new_v4();

        let mut replace = make_step(pipeline_id, "replace", vec![], false);
        replace.output_dataset_id = Some(dataset);
        replace.load_strategy = "REPLACE".to_string();

        let mut append = make_step(pipeline_id, "append", vec![replace.id], false);
        append.output_dataset_id = Some(dataset);
        append.load_strategy = "APPEND".to_string();

        let replace_id = replace.id;
        seed_pipeline(&h.store, vec![replace, append]).await;

        let rx = h.bus.subscribe();
        let execution_id = h
            .runner
            .start(pipeline_id, None, RunOrigin::Manual, None)
            .await
            .unwrap();
        await_completion(rx).await;

        assert_eq!(h.catalog.truncated.lock().unwrap().len(), 1);

        let rows = h.store.step_executions_for(execution_id).await.unwrap();
        let replaced = rows.iter().find(|r| r.step_id == replace_id).unwrap();
        assert_eq!(replaced.output_rows, Some(5));
    }

    #[tokio::test]
    async fn test_unknown_strategy_falls_back_to_replace() {
        let h = harness();
        let pipeline_id = Uuid::new_v4();
        let dataset = Uuid::new_v4();

        let mut step = make_step(pipeline_id, "odd", vec![], false);
        step.output_dataset_id = Some(dataset);
        step.load_strategy = "UPSERT".to_string();
        seed_pipeline(&h.store, vec![step]).await;

        let rx = h.bus.subscribe();
        h.runner
            .start(pipeline_id, None, RunOrigin::Manual, None)
            .await
            .unwrap();
        await_completion(rx).await;

        assert_eq!(h.catalog.truncated.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_pipeline() {
        let h = harness();
        let result = h
            .runner
            .start(Uuid::new_v4(), None, RunOrigin::Manual, None)
            .await;
        assert!(matches!(result, Err(EngineError::PipelineNotFound(_))));
    }
}
