//! # apparatusd: apparatus daemon
//!
//! Composition root that builds the apparatus from configuration and runs it
//! until asked to stop.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Build the simulated bench and one driver per configured thing (adapters)
//! - Construct the hub, attaching every thing with its inputs
//! - Restore the saved state, start the workers, sync the hardware
//! - Handle graceful shutdown: stop workers, disconnect, save
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer, no domain logic belongs here.

pub mod config;

use std::future::Future;

use apparatus_adapter_storage_json::JsonFileStore;
use apparatus_adapter_virtual::VirtualBench;
use apparatus_app::error::{PersistenceError, StructureError};
use apparatus_app::hub::{Hub, ThingOptions};

use crate::config::Config;

/// Failures that end the daemon.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to build the apparatus")]
    Structure(#[from] StructureError),
    #[error("failed to persist the apparatus state")]
    Persistence(#[from] PersistenceError),
}

/// Build the hub and attach every configured thing. Workers are not started.
///
/// # Errors
///
/// Returns [`StructureError`] when a thing or input cannot be attached.
pub fn build_hub(config: &Config) -> Result<Hub, StructureError> {
    let hub = Hub::new(config.hub.name.clone(), config.hub_config())?;
    let bench = VirtualBench::new(config.bench.clone());
    for thing in &config.things.0 {
        let driver = bench.driver(&thing.name, thing.driver, &thing.options);
        let options = ThingOptions {
            isolation: thing.isolation,
            poll_interval: thing.poll_interval(),
            inputs: thing.input_specs(),
        };
        let name = hub.attach_thing(&thing.name, driver, options)?;
        if name != thing.name {
            tracing::warn!(requested = %thing.name, attached = %name, "thing name already taken");
        }
    }
    Ok(hub)
}

/// The JSON store configured for the hub.
#[must_use]
pub fn state_store(config: &Config) -> JsonFileStore {
    JsonFileStore::new(config.hub.state_path.clone())
}

/// Run the apparatus until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`RunError`] when the apparatus cannot be built, or when the state
/// file cannot be read at startup or written at shutdown.
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> Result<(), RunError> {
    let hub = build_hub(&config)?;
    let store = state_store(&config);

    let report = hub.load(&store).await?;
    if !report.skipped.is_empty() {
        tracing::warn!(skipped = ?report.skipped, "saved state mentions unknown inputs");
    }
    hub.start_all().await?;
    if config.hub.sync_on_start {
        for (path, result) in hub.sync_to_hardware().await {
            if let Err(err) = result {
                tracing::warn!(path = %path, error = %err, "could not restore hardware state");
            }
        }
    }
    tracing::info!(hub = %hub.name(), things = ?hub.things(), "apparatus running");

    shutdown.await;
    tracing::info!("shutdown requested");

    for (worker, outcome) in hub.shutdown().await {
        tracing::debug!(worker = %worker, ?outcome, "worker joined");
    }
    if config.hub.save_on_shutdown {
        hub.save(&store).await?;
    }
    Ok(())
}
