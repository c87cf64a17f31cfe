//! Cron driver
//!
//! Keeps one live tokio task per enabled SCHEDULE trigger, keyed by
//! trigger id in a mutex-guarded table with replace-or-insert
//! semantics. Each task computes the next occurrence under the
//! trigger's timezone, persists it for missed-fire detection, sleeps,
//! and then dispatches `fire_trigger` through a small worker pool so a
//! slow pipeline never delays the following tick.

use chrono_tz::Tz;
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sluice_core::domain::event::{TriggerEvent, TriggerEventType};
use sluice_core::domain::trigger::{Trigger, TriggerConfig, TriggerType};

use crate::error::{EngineError, Result};
use crate::store::Store;
use crate::trigger::TriggerFirer;

/// Worker-pool bound for dispatched fire callbacks. A tick that cannot
/// get a permit queues; fires are delayed, never dropped.
const DISPATCH_PERMITS: usize = 4;

/// Parses a cron expression, accepting the common 5-field form by
/// prepending a seconds field.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let expression = expression.trim();
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| {
        EngineError::InvalidConfig(format!("invalid cron expression '{}': {}", expression, e))
    })
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| EngineError::InvalidConfig(format!("unknown timezone '{}'", name)))
}

pub struct CronDriver {
    store: Arc<dyn Store>,
    firer: Arc<dyn TriggerFirer>,
    permits: Arc<Semaphore>,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl CronDriver {
    pub fn new(store: Arc<dyn Store>, firer: Arc<dyn TriggerFirer>) -> Self {
        Self {
            store,
            firer,
            permits: Arc::new(Semaphore::new(DISPATCH_PERMITS)),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Installs the live schedule for a trigger, atomically replacing
    /// any existing one: the new handle goes into the table and the
    /// old one is cancelled under a single lock acquisition, so two
    /// concurrent registrations cannot leak a duplicate task.
    pub fn register(&self, trigger: &Trigger) -> Result<()> {
        let TriggerConfig::Schedule { cron, timezone, .. } = &trigger.config else {
            return Err(EngineError::InvalidConfig(format!(
                "trigger {} is not a SCHEDULE trigger",
                trigger.id
            )));
        };

        let schedule = parse_schedule(cron)?;
        let tz = parse_timezone(timezone)?;

        let handle = self.spawn_schedule_loop(trigger.id, schedule, tz);
        let previous = self.tasks.lock().unwrap().insert(trigger.id, handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        info!("Registered schedule for trigger {} ({})", trigger.id, cron);
        Ok(())
    }

    /// Loads the trigger row and registers it. Used by post-commit
    /// flushing, where only the id is carried.
    pub async fn register_by_id(&self, trigger_id: Uuid) -> Result<()> {
        let trigger = self
            .store
            .find_trigger(trigger_id)
            .await?
            .ok_or(EngineError::TriggerNotFound(trigger_id))?;

        // The row may have been toggled since the action was queued.
        if !trigger.is_enabled {
            debug!("Trigger {} is disabled; not registering", trigger_id);
            return Ok(());
        }
        self.register(&trigger)
    }

    /// Cancels pending future firings for a trigger. A fire already
    /// dispatched runs to completion. No-op when nothing is registered.
    pub fn unregister(&self, trigger_id: Uuid) -> bool {
        let removed = self.tasks.lock().unwrap().remove(&trigger_id);
        match removed {
            Some(handle) => {
                handle.abort();
                info!("Unregistered schedule for trigger {}", trigger_id);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, trigger_id: Uuid) -> bool {
        self.tasks.lock().unwrap().contains_key(&trigger_id)
    }

    pub fn registered_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Startup reconciliation: registers every enabled SCHEDULE
    /// trigger, compensating first for fires whose persisted
    /// `next_fire_time` passed while the process was down.
    pub async fn restore(&self) -> Result<()> {
        let triggers = self
            .store
            .enabled_triggers_by_type(TriggerType::Schedule)
            .await?;
        info!("Restoring {} scheduled trigger(s)", triggers.len());

        for trigger in triggers {
            if let Some(next) = trigger.state.next_fire_time {
                if next < chrono::Utc::now() {
                    self.compensate_missed_fire(&trigger, next).await;
                }
            }

            if let Err(e) = self.register(&trigger) {
                error!("Failed to restore schedule for trigger {}: {}", trigger.id, e);
            }
        }

        Ok(())
    }

    async fn compensate_missed_fire(
        &self,
        trigger: &Trigger,
        missed_at: chrono::DateTime<chrono::Utc>,
    ) {
        warn!(
            "Trigger {} missed its fire at {}; firing now",
            trigger.id, missed_at
        );

        let event = TriggerEvent::new(
            trigger.id,
            trigger.pipeline_id,
            None,
            TriggerEventType::Missed,
            format!("scheduled fire at {} was missed", missed_at.to_rfc3339()),
        );
        if let Err(e) = self.store.record_event(event).await {
            error!("Failed to record missed-fire event: {}", e);
        }

        self.firer
            .fire_trigger(
                trigger.id,
                serde_json::json!({ "missed_fire_time": missed_at.to_rfc3339() }),
            )
            .await;

        // The fire above persisted state of its own (last_fired_at), so
        // clear next_fire_time on a fresh read, not the copy from before
        // the fire.
        match self.store.find_trigger(trigger.id).await {
            Ok(Some(current)) => {
                let mut state = current.state;
                state.next_fire_time = None;
                if let Err(e) = self.store.update_trigger_state(trigger.id, state).await {
                    error!(
                        "Failed to clear next_fire_time for trigger {}: {}",
                        trigger.id, e
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    "Failed to reload trigger {} after missed fire: {}",
                    trigger.id, e
                );
            }
        }
    }

    fn spawn_schedule_loop(&self, trigger_id: Uuid, schedule: Schedule, tz: Tz) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let firer = Arc::clone(&self.firer);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            loop {
                let now = chrono::Utc::now().with_timezone(&tz);
                let Some(next) = schedule.after(&now).next() else {
                    debug!("Schedule for trigger {} has no further occurrences", trigger_id);
                    break;
                };
                let next_utc = next.with_timezone(&chrono::Utc);

                // Persist the upcoming occurrence so a restart can tell
                // whether it was missed.
                match store.find_trigger(trigger_id).await {
                    Ok(Some(trigger)) => {
                        let mut state = trigger.state;
                        state.next_fire_time = Some(next_utc);
                        if let Err(e) = store.update_trigger_state(trigger_id, state).await {
                            warn!(
                                "Failed to persist next fire time for trigger {}: {}",
                                trigger_id, e
                            );
                        }
                    }
                    Ok(None) => {
                        debug!("Trigger {} no longer exists; stopping its schedule", trigger_id);
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to load trigger {}: {}", trigger_id, e);
                    }
                }

                let wait = (next_utc - chrono::Utc::now())
                    .to_std()
                    .unwrap_or_default();
                tokio::time::sleep(wait).await;

                // Dispatch, never run inline: the tick only hands the
                // fire to the worker pool and moves on.
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let firer = Arc::clone(&firer);
                tokio::spawn(async move {
                    firer.fire_trigger(trigger_id, serde_json::json!({})).await;
                    drop(permit);
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PipelineLauncher;
    use crate::secrets::SecretCipher;
    use crate::store::MemoryStore;
    use crate::trigger::TriggerService;
    use async_trait::async_trait;
    use serde_json::Value;
    use sluice_core::domain::execution::RunOrigin;
    use sluice_core::domain::pipeline::Pipeline;
    use sluice_core::domain::trigger::{ConcurrencyPolicy, TriggerState};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingFirer {
        fired: StdMutex<Vec<Uuid>>,
    }

    impl RecordingFirer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fired: StdMutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.fired.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TriggerFirer for RecordingFirer {
        async fn fire_trigger(&self, trigger_id: Uuid, _params: Value) {
            self.fired.lock().unwrap().push(trigger_id);
        }
    }

    fn schedule_trigger(cron: &str, state: TriggerState) -> Trigger {
        Trigger {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            is_enabled: true,
            config: TriggerConfig::Schedule {
                cron: cron.to_string(),
                timezone: "Asia/Seoul".to_string(),
                concurrency_policy: ConcurrencyPolicy::Skip,
            },
            state,
            created_by: "tester".to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_parse_schedule_accepts_five_and_six_fields() {
        assert!(parse_schedule("0 6 * * *").is_ok());
        assert!(parse_schedule("0 0 6 * * *").is_ok());
        assert!(parse_schedule("not a cron").is_err());
        assert!(parse_schedule("").is_err());
    }

    #[test]
    fn test_parse_timezone() {
        assert!(parse_timezone("Asia/Seoul").is_ok());
        assert!(parse_timezone("UTC").is_ok());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[tokio::test]
    async fn test_register_replaces_and_unregister_removes() {
        let store = Arc::new(MemoryStore::new());
        let firer = RecordingFirer::new();
        let driver = CronDriver::new(store.clone(), firer);

        // A schedule far in the future, so nothing actually fires.
        let trigger = schedule_trigger("0 0 0 1 1 *", TriggerState::default());
        store.insert_trigger(trigger.clone()).await.unwrap();

        driver.register(&trigger).unwrap();
        assert!(driver.is_registered(trigger.id));
        assert_eq!(driver.registered_count(), 1);

        // Re-registering replaces instead of leaking a second task.
        driver.register(&trigger).unwrap();
        assert_eq!(driver.registered_count(), 1);

        assert!(driver.unregister(trigger.id));
        assert!(!driver.is_registered(trigger.id));
        assert!(!driver.unregister(trigger.id));
    }

    #[tokio::test]
    async fn test_register_rejects_non_schedule_trigger() {
        let store = Arc::new(MemoryStore::new());
        let driver = CronDriver::new(store, RecordingFirer::new());

        let trigger = Trigger {
            config: TriggerConfig::Api {
                token_hash: "abc".to_string(),
            },
            ..schedule_trigger("0 0 0 1 1 *", TriggerState::default())
        };
        assert!(matches!(
            driver.register(&trigger),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_compensates_missed_fire() {
        let store = Arc::new(MemoryStore::new());
        let firer = RecordingFirer::new();
        let driver = CronDriver::new(store.clone(), firer.clone());

        let missed_at = chrono::Utc::now() - chrono::Duration::hours(2);
        let trigger = schedule_trigger(
            "0 0 0 1 1 *",
            TriggerState {
                next_fire_time: Some(missed_at),
                ..TriggerState::default()
            },
        );
        store.insert_trigger(trigger.clone()).await.unwrap();

        driver.restore().await.unwrap();

        assert_eq!(firer.count(), 1);
        let events = store.events_for_trigger(trigger.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, TriggerEventType::Missed);
        assert!(driver.is_registered(trigger.id));
    }

    struct StubLauncher;

    #[async_trait]
    impl PipelineLauncher for StubLauncher {
        async fn launch(
            &self,
            _pipeline_id: Uuid,
            _origin: RunOrigin,
            _trigger_id: Option<Uuid>,
        ) -> crate::error::Result<Uuid> {
            Ok(Uuid::new_v4())
        }
    }

    #[tokio::test]
    async fn test_missed_fire_keeps_last_fired_at() {
        let store = Arc::new(MemoryStore::new());
        let pipeline_id = Uuid::new_v4();
        let now = chrono::Utc::now();
        store
            .insert_pipeline(Pipeline {
                id: pipeline_id,
                name: "nightly".to_string(),
                description: None,
                is_active: true,
                created_by: "tester".to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        // The real firing engine, so the fire persists last_fired_at.
        let triggers = Arc::new(TriggerService::new(
            store.clone(),
            Arc::new(StubLauncher),
            SecretCipher::new([1u8; 32]),
        ));
        let driver = CronDriver::new(store.clone(), triggers);

        let trigger = Trigger {
            pipeline_id,
            state: TriggerState {
                next_fire_time: Some(chrono::Utc::now() - chrono::Duration::hours(2)),
                ..TriggerState::default()
            },
            ..schedule_trigger("0 0 0 1 1 *", TriggerState::default())
        };
        store.insert_trigger(trigger.clone()).await.unwrap();

        driver.restore().await.unwrap();
        driver.unregister(trigger.id);

        // Clearing next_fire_time must not wipe the state the fire
        // itself wrote.
        let stored = store.find_trigger(trigger.id).await.unwrap().unwrap();
        assert!(stored.state.last_fired_at.is_some());

        let events = store.events_for_trigger(trigger.id).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&TriggerEventType::Missed));
        assert!(types.contains(&TriggerEventType::Fired));
    }

    #[tokio::test]
    async fn test_restore_leaves_future_fire_alone() {
        let store = Arc::new(MemoryStore::new());
        let firer = RecordingFirer::new();
        let driver = CronDriver::new(store.clone(), firer.clone());

        let trigger = schedule_trigger(
            "0 0 0 1 1 *",
            TriggerState {
                next_fire_time: Some(chrono::Utc::now() + chrono::Duration::hours(2)),
                ..TriggerState::default()
            },
        );
        store.insert_trigger(trigger.clone()).await.unwrap();

        driver.restore().await.unwrap();

        assert_eq!(firer.count(), 0);
        assert!(store.events_for_trigger(trigger.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_every_second_schedule_dispatches() {
        let store = Arc::new(MemoryStore::new());
        let firer = RecordingFirer::new();
        let driver = CronDriver::new(store.clone(), firer.clone());

        let trigger = schedule_trigger("* * * * * *", TriggerState::default());
        store.insert_trigger(trigger.clone()).await.unwrap();
        driver.register(&trigger).unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        driver.unregister(trigger.id);

        assert!(firer.count() >= 1, "expected at least one dispatched fire");

        // The loop persisted the upcoming occurrence along the way.
        let stored = store.find_trigger(trigger.id).await.unwrap().unwrap();
        assert!(stored.state.next_fire_time.is_some());
    }
}
