//! Dataset-change poller
//!
//! Polls approximate row counts for the datasets each DATASET_CHANGE
//! trigger watches and fires when an estimate moved. Everything it
//! remembers between ticks lives on the trigger row (`last_snapshot`,
//! `last_checked_at`, `last_fired_at`), so a restart neither replays
//! nor loses anything beyond the tick in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sluice_core::domain::trigger::{TriggerConfig, TriggerType};

use crate::executor::DatasetCatalog;
use crate::store::{Store, StoreError};
use crate::trigger::TriggerFirer;

pub struct DatasetPoller {
    store: Arc<dyn Store>,
    catalog: Arc<dyn DatasetCatalog>,
    firer: Arc<dyn TriggerFirer>,
    interval: Duration,
}

impl DatasetPoller {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn DatasetCatalog>,
        firer: Arc<dyn TriggerFirer>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            firer,
            interval,
        }
    }

    /// Runs the polling loop forever.
    pub async fn run(&self) {
        info!("Starting dataset poller (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);
        loop {
            interval.tick().await;

            match self.poll_once().await {
                Ok(fired) => {
                    if fired > 0 {
                        info!("Dataset poller fired {} trigger(s) this cycle", fired);
                    }
                }
                Err(e) => error!("Dataset poll cycle failed: {}", e),
            }
        }
    }

    /// One polling cycle over every enabled DATASET_CHANGE trigger.
    /// Returns how many triggers fired.
    pub async fn poll_once(&self) -> Result<usize, StoreError> {
        let triggers = self
            .store
            .enabled_triggers_by_type(TriggerType::DatasetChange)
            .await?;

        let mut fired = 0;
        for trigger in triggers {
            let TriggerConfig::DatasetChange {
                dataset_ids,
                polling_interval_seconds,
                debounce_seconds,
            } = &trigger.config
            else {
                continue;
            };

            let now = chrono::Utc::now();
            // Saturating: an absurdly large interval gates forever
            // instead of wrapping negative.
            let interval = i64::try_from(*polling_interval_seconds).unwrap_or(i64::MAX);
            if let Some(last) = trigger.state.last_checked_at {
                if (now - last).num_seconds() < interval {
                    continue;
                }
            }

            let (snapshot, alive) = self.take_snapshot(dataset_ids, &trigger.state.last_snapshot).await;

            if alive == 0 {
                warn!(
                    "Every dataset watched by trigger {} is gone; disabling it",
                    trigger.id
                );
                self.store.set_trigger_enabled(trigger.id, false).await?;
                continue;
            }

            // The very first cycle only records a baseline.
            let baselined = !trigger.state.last_snapshot.is_empty();
            let changed_ids: Vec<Uuid> = if baselined {
                dataset_ids
                    .iter()
                    .filter(|d| snapshot.get(d) != trigger.state.last_snapshot.get(d))
                    .copied()
                    .collect()
            } else {
                Vec::new()
            };

            let mut state = trigger.state.clone();
            if !changed_ids.is_empty() {
                let debounce = i64::try_from(*debounce_seconds).unwrap_or(i64::MAX);
                let debounced = match state.last_fired_at {
                    Some(last_fired) => (now - last_fired).num_seconds() < debounce,
                    None => false,
                };

                if debounced {
                    debug!(
                        "Trigger {} saw changes but is inside its debounce window",
                        trigger.id
                    );
                } else {
                    self.firer
                        .fire_trigger(
                            trigger.id,
                            serde_json::json!({ "changed_dataset_ids": changed_ids }),
                        )
                        .await;
                    state.last_fired_at = Some(now);
                    fired += 1;
                }
            }

            // Snapshot and check time are persisted whether or not a
            // fire happened.
            state.last_snapshot = snapshot;
            state.last_checked_at = Some(now);
            self.store.update_trigger_state(trigger.id, state).await?;
        }

        Ok(fired)
    }

    /// Estimates row counts for the watched datasets. A dataset whose
    /// estimate cannot be read keeps its previous value so a transient
    /// failure never looks like a change; a dataset that resolves to
    /// no table contributes nothing and does not count as alive.
    async fn take_snapshot(
        &self,
        dataset_ids: &[Uuid],
        previous: &HashMap<Uuid, i64>,
    ) -> (HashMap<Uuid, i64>, usize) {
        let mut snapshot = HashMap::new();
        let mut alive = 0;

        for dataset_id in dataset_ids {
            match self.catalog.resolve_table(*dataset_id).await {
                Ok(Some(table)) => {
                    alive += 1;
                    match self.catalog.estimate_rows(&table).await {
                        Ok(estimate) => {
                            snapshot.insert(*dataset_id, estimate);
                        }
                        Err(e) => {
                            warn!("Failed to estimate rows of {}: {:#}", table, e);
                            if let Some(prev) = previous.get(dataset_id) {
                                snapshot.insert(*dataset_id, *prev);
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to resolve dataset {}: {:#}", dataset_id, e);
                    if let Some(prev) = previous.get(dataset_id) {
                        snapshot.insert(*dataset_id, *prev);
                        alive += 1;
                    }
                }
            }
        }

        (snapshot, alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::Value;
    use sluice_core::domain::trigger::{Trigger, TriggerState};
    use std::sync::Mutex;

    struct RecordingFirer {
        fired: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl TriggerFirer for RecordingFirer {
        async fn fire_trigger(&self, trigger_id: Uuid, _params: Value) {
            self.fired.lock().unwrap().push(trigger_id);
        }
    }

    /// Catalog whose estimates the test mutates; `None` = dataset gone.
    struct ScriptedCatalog {
        estimates: Mutex<HashMap<Uuid, Option<i64>>>,
    }

    impl ScriptedCatalog {
        fn set(&self, dataset_id: Uuid, estimate: Option<i64>) {
            self.estimates.lock().unwrap().insert(dataset_id, estimate);
        }
    }

    #[async_trait]
    impl DatasetCatalog for ScriptedCatalog {
        async fn resolve_table(&self, dataset_id: Uuid) -> anyhow::Result<Option<String>> {
            Ok(self
                .estimates
                .lock()
                .unwrap()
                .get(&dataset_id)
                .and_then(|e| e.map(|_| dataset_id.to_string())))
        }

        async fn truncate(&self, _table: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
            self.estimate_rows(table).await
        }

        async fn estimate_rows(&self, table: &str) -> anyhow::Result<i64> {
            let dataset_id: Uuid = table.parse()?;
            self.estimates
                .lock()
                .unwrap()
                .get(&dataset_id)
                .copied()
                .flatten()
                .ok_or_else(|| anyhow::anyhow!("gone"))
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        catalog: Arc<ScriptedCatalog>,
        firer: Arc<RecordingFirer>,
        poller: DatasetPoller,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(ScriptedCatalog {
            estimates: Mutex::new(HashMap::new()),
        });
        let firer = Arc::new(RecordingFirer {
            fired: Mutex::new(Vec::new()),
        });
        let poller = DatasetPoller::new(
            store.clone(),
            catalog.clone(),
            firer.clone(),
            Duration::from_secs(60),
        );
        Harness {
            store,
            catalog,
            firer,
            poller,
        }
    }

    async fn seed_trigger(
        store: &MemoryStore,
        dataset_ids: Vec<Uuid>,
        polling_interval_seconds: u64,
        debounce_seconds: u64,
    ) -> Uuid {
        let trigger = Trigger {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            is_enabled: true,
            config: TriggerConfig::DatasetChange {
                dataset_ids,
                polling_interval_seconds,
                debounce_seconds,
            },
            state: TriggerState::default(),
            created_by: "tester".to_string(),
            created_at: chrono::Utc::now(),
        };
        let id = trigger.id;
        store.insert_trigger(trigger).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_first_cycle_baselines_then_change_fires() {
        let h = harness();
        let dataset = Uuid::new_v4();
        h.catalog.set(dataset, Some(100));
        let trigger_id = seed_trigger(&h.store, vec![dataset], 0, 0).await;

        // Baseline cycle: no fire, snapshot persisted.
        assert_eq!(h.poller.poll_once().await.unwrap(), 0);
        let state = h.store.find_trigger(trigger_id).await.unwrap().unwrap().state;
        assert_eq!(state.last_snapshot.get(&dataset), Some(&100));
        assert!(state.last_checked_at.is_some());

        // Unchanged estimate: still no fire.
        assert_eq!(h.poller.poll_once().await.unwrap(), 0);

        // Estimate moved: fire.
        h.catalog.set(dataset, Some(150));
        assert_eq!(h.poller.poll_once().await.unwrap(), 1);
        assert_eq!(h.firer.fired.lock().unwrap().as_slice(), &[trigger_id]);

        let state = h.store.find_trigger(trigger_id).await.unwrap().unwrap().state;
        assert_eq!(state.last_snapshot.get(&dataset), Some(&150));
        assert!(state.last_fired_at.is_some());
    }

    #[tokio::test]
    async fn test_debounce_suppresses_rapid_fires() {
        let h = harness();
        let dataset = Uuid::new_v4();
        h.catalog.set(dataset, Some(1));
        let trigger_id = seed_trigger(&h.store, vec![dataset], 0, 3600).await;

        h.poller.poll_once().await.unwrap();
        h.catalog.set(dataset, Some(2));
        assert_eq!(h.poller.poll_once().await.unwrap(), 1);

        // Another change immediately afterwards is inside the window.
        h.catalog.set(dataset, Some(3));
        assert_eq!(h.poller.poll_once().await.unwrap(), 0);
        assert_eq!(h.firer.fired.lock().unwrap().len(), 1);

        // The new snapshot was still persisted.
        let state = h.store.find_trigger(trigger_id).await.unwrap().unwrap().state;
        assert_eq!(state.last_snapshot.get(&dataset), Some(&3));
    }

    #[tokio::test]
    async fn test_per_trigger_interval_gates_checks() {
        let h = harness();
        let dataset = Uuid::new_v4();
        h.catalog.set(dataset, Some(1));
        let trigger_id = seed_trigger(&h.store, vec![dataset], 3600, 0).await;

        h.poller.poll_once().await.unwrap();
        let first_checked = h
            .store
            .find_trigger(trigger_id)
            .await
            .unwrap()
            .unwrap()
            .state
            .last_checked_at;

        // Well inside the trigger's own interval: skipped entirely.
        h.catalog.set(dataset, Some(2));
        assert_eq!(h.poller.poll_once().await.unwrap(), 0);
        let state = h.store.find_trigger(trigger_id).await.unwrap().unwrap().state;
        assert_eq!(state.last_checked_at, first_checked);
        assert_eq!(state.last_snapshot.get(&dataset), Some(&1));
    }

    #[tokio::test]
    async fn test_oversized_windows_saturate_instead_of_wrapping() {
        let h = harness();
        let dataset = Uuid::new_v4();
        h.catalog.set(dataset, Some(1));
        let trigger_id = seed_trigger(&h.store, vec![dataset], u64::MAX, 0).await;

        h.poller.poll_once().await.unwrap();

        // An interval beyond i64::MAX seconds must gate every later
        // check, not wrap negative and let them all through.
        h.catalog.set(dataset, Some(2));
        assert_eq!(h.poller.poll_once().await.unwrap(), 0);
        let state = h.store.find_trigger(trigger_id).await.unwrap().unwrap().state;
        assert_eq!(state.last_snapshot.get(&dataset), Some(&1));

        // Same for the debounce window.
        let debounced = Uuid::new_v4();
        h.catalog.set(debounced, Some(1));
        let debounced_id = seed_trigger(&h.store, vec![debounced], 0, u64::MAX).await;

        h.poller.poll_once().await.unwrap();
        h.catalog.set(debounced, Some(2));
        assert_eq!(h.poller.poll_once().await.unwrap(), 1);

        h.catalog.set(debounced, Some(3));
        assert_eq!(h.poller.poll_once().await.unwrap(), 0);
        assert_eq!(h.firer.fired.lock().unwrap().as_slice(), &[debounced_id]);
    }

    #[tokio::test]
    async fn test_all_datasets_gone_disables_trigger() {
        let h = harness();
        let dataset = Uuid::new_v4();
        h.catalog.set(dataset, Some(10));
        let trigger_id = seed_trigger(&h.store, vec![dataset], 0, 0).await;

        h.poller.poll_once().await.unwrap();

        h.catalog.set(dataset, None);
        h.poller.poll_once().await.unwrap();

        let trigger = h.store.find_trigger(trigger_id).await.unwrap().unwrap();
        assert!(!trigger.is_enabled);
        assert!(h.firer.fired.lock().unwrap().is_empty());
    }
}
