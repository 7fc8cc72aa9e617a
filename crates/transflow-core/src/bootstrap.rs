//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::control;
use crate::error::TransflowResult;
use crate::events::{EventBus, NoopEventBus, Publisher, RedisEventBus};
use crate::orchestrator::Orchestrator;
use crate::recognizer::RecognizerFactory;
use crate::runtime::TokioSpawner;
use crate::state::{EnabledSet, TransflowConfig};

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap. It's
/// consumed by `transflow-server`'s `main` to drive the background workers
/// and to orchestrate shutdown.
pub struct BootstrappedServices {
    /// Process-wide admission set, written by the Control Plane Watcher.
    pub enabled_set: EnabledSet,
    /// Control-plane database pool.
    pub control_pool: sqlx::MySqlPool,
    /// Reconciliation loop owning all tailer workers.
    pub orchestrator: Arc<Orchestrator<TokioSpawner>>,
    /// Task spawner handed to every background worker.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    config: TransflowConfig,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown of all services.
    ///
    /// No internal error is fatal; shutdown here is about cleanly
    /// cancelling background workers on explicit external termination
    /// (Ctrl+C/SIGTERM), handled in `transflow-server::main`.
    pub async fn shutdown(&self) {
        log::info!("beginning graceful shutdown");
        self.cancel_token.cancel();
        self.orchestrator.shutdown();
        self.control_pool.close().await;
        log::info!("shutdown complete");
    }

    /// Runs the Orchestrator's reconciliation loop until cancelled.
    pub async fn run_orchestrator_loop(&self) {
        let interval = std::time::Duration::from_millis(self.config.scan_interval_ms);
        loop {
            if let Err(err) = self.orchestrator.tick().await {
                tracing::warn!(error = %err, "orchestrator tick failed, retrying next interval");
            }
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    tracing::info!("orchestrator loop shutting down");
                    return;
                }
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Spawns the Control Plane Watcher as a background task.
    pub fn spawn_control_plane_watcher(&self) {
        let pool = self.control_pool.clone();
        let enabled = self.enabled_set.clone();
        let interval = std::time::Duration::from_millis(self.config.control_interval_ms);
        let cancel = self.cancel_token.clone();
        self.spawner
            .spawn(control::run(pool, enabled, interval, cancel));
    }
}

/// Builds the [`EventBus`] named by `config.bus_url`.
///
/// Falls back to a no-op bus for a `noop://` URL, used in local development
/// without a live Redis instance.
fn build_event_bus(config: &TransflowConfig) -> TransflowResult<Arc<dyn EventBus>> {
    if config.bus_url.starts_with("noop://") {
        return Ok(Arc::new(NoopEventBus));
    }
    Ok(Arc::new(RedisEventBus::new(&config.bus_url)?))
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together:
///
/// 1. Task spawner from the current runtime.
/// 2. Control-plane database pool.
/// 3. Event bus + publisher (bounded retry, drop counter).
/// 4. Shared `EnabledSet` and cancellation token.
/// 5. Orchestrator, wired with the injected recognizer factory.
///
/// # Errors
///
/// Returns an error if the control-plane pool or event bus fail to connect.
pub async fn bootstrap_services(
    config: TransflowConfig,
    recognizer_factory: Arc<dyn RecognizerFactory>,
    database_url: &str,
) -> TransflowResult<BootstrappedServices> {
    let spawner = TokioSpawner::current();
    let cancel_token = CancellationToken::new();
    let enabled_set = EnabledSet::new();

    let control_pool = control::connect(database_url).await?;

    let bus = build_event_bus(&config)?;
    let publisher = Arc::new(Publisher::new(bus, config.channel_name.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        enabled_set.clone(),
        recognizer_factory,
        publisher,
        spawner.clone(),
    ));

    Ok(BootstrappedServices {
        enabled_set,
        control_pool,
        orchestrator,
        spawner,
        cancel_token,
        config,
    })
}
