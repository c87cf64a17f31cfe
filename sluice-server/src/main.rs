use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice_engine::events::CompletionBus;
use sluice_engine::execution::ExecutionRunner;
use sluice_engine::pipeline::PipelineService;
use sluice_engine::scheduler::CronDriver;
use sluice_engine::secrets::SecretCipher;
use sluice_engine::store::{MemoryStore, Store};
use sluice_engine::trigger::{ChainListener, DatasetPoller, TriggerService};

pub mod api;
pub mod config;
pub mod stubs;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_server=debug,sluice_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sluice...");

    let config = config::Config::from_env();
    config.validate().expect("Invalid configuration");

    // Core collaborators. The store is in-memory; the executor and
    // catalog are logging stubs until a warehouse backend is wired in.
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let executor = Arc::new(stubs::LoggingExecutor);
    let catalog = Arc::new(stubs::NullCatalog);
    let completions = CompletionBus::default();

    let runner = ExecutionRunner::new(
        store.clone(),
        executor,
        catalog.clone(),
        completions.clone(),
    );
    let pipelines = Arc::new(PipelineService::new(store.clone()));
    let triggers = Arc::new(TriggerService::new(
        store.clone(),
        Arc::new(runner.clone()),
        SecretCipher::from_env(),
    ));
    let cron = Arc::new(CronDriver::new(store.clone(), triggers.clone()));

    // Reconcile persisted schedules before accepting traffic.
    cron.restore().await.expect("Failed to restore schedules");

    // Background integrators.
    let chain = Arc::new(ChainListener::new(store.clone(), triggers.clone()));
    chain.spawn(completions.subscribe());

    let poller = DatasetPoller::new(
        store.clone(),
        catalog,
        triggers.clone(),
        config.dataset_poll_interval,
    );
    tokio::spawn(async move { poller.run().await });

    let app = api::create_router(api::AppState {
        store,
        pipelines,
        triggers,
        runner,
        cron,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
