//! Streaming engine.
//!
//! Executes a topology against a broker on its own task. The engine keeps its committed offsets
//! and join state in a local state store, living in a directory derived from the engine's
//! application ID, and reports its lifecycle through a state machine with an optional listener.
//!
//! ## State Transitions
//! ```text
//! CREATED     -> REBALANCING | ERROR | NOT_RUNNING
//! REBALANCING -> RUNNING | PAUSED | ERROR | NOT_RUNNING
//! RUNNING     -> REBALANCING | PAUSED | ERROR | NOT_RUNNING
//! PAUSED      -> RUNNING | REBALANCING | ERROR | NOT_RUNNING
//! ERROR       -> NOT_RUNNING
//! ```

mod state;
mod store;
#[cfg(test)]
mod store_test;
mod task;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::broker::BrokerRef;
use crate::config::Config;
use crate::database;
use crate::error::AppError;
use crate::topology::Topology;

pub use state::{EngineState, StateListener};

pub(self) const METRIC_RECORDS_CONSUMED: &str = "chainer_records_consumed";
pub(self) const METRIC_RECORDS_FILTERED: &str = "chainer_records_filtered";
pub(self) const METRIC_RECORDS_DROPPED_EMPTY: &str = "chainer_records_dropped_empty";
pub(self) const METRIC_RECORDS_DROPPED_MALFORMED: &str = "chainer_records_dropped_malformed";
pub(self) const METRIC_RECORDS_PUBLISHED: &str = "chainer_records_published";
pub(self) const METRIC_JOIN_PENDING: &str = "chainer_join_pending";
pub(self) const METRIC_JOIN_EXPIRED: &str = "chainer_join_expired";

/// A streaming engine executing a single topology.
pub struct StreamEngine {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The ID of this engine, naming its local state directory.
    application_id: String,
    topology: Arc<Topology>,
    broker: BrokerRef,
    state: Arc<state::StateCell>,

    /// A channel used for requesting the engine to pause or resume.
    pause_tx: watch::Sender<bool>,
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A handle to the engine's processing task, once started.
    handle: Option<JoinHandle<()>>,
}

impl StreamEngine {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, application_id: String, topology: Topology, broker: BrokerRef) -> Self {
        metrics::register_counter!(METRIC_RECORDS_CONSUMED, metrics::Unit::Count, "records consumed from source topics");
        metrics::register_counter!(METRIC_RECORDS_FILTERED, metrics::Unit::Count, "records dropped as belonging to another pipeline");
        metrics::register_counter!(METRIC_RECORDS_DROPPED_EMPTY, metrics::Unit::Count, "records dropped as holding no selected tensor");
        metrics::register_counter!(METRIC_RECORDS_DROPPED_MALFORMED, metrics::Unit::Count, "records dropped as undecodable");
        metrics::register_counter!(METRIC_RECORDS_PUBLISHED, metrics::Unit::Count, "records published to output topics");
        metrics::register_gauge!(METRIC_JOIN_PENDING, metrics::Unit::Count, "records held back by a closed trigger join");
        metrics::register_counter!(METRIC_JOIN_EXPIRED, metrics::Unit::Count, "held records dropped by a trigger join");

        let (pause_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            application_id,
            topology: Arc::new(topology),
            broker,
            state: Arc::new(state::StateCell::new()),
            pause_tx,
            shutdown_tx,
            handle: None,
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// The directory of this engine's local state.
    pub fn state_dir(&self) -> PathBuf {
        self.config.engine_state_dir(&self.application_id)
    }

    /// The current state of this engine.
    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// A signal of this engine's state, updated on every transition.
    pub fn state_signal(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Register the listener of this engine's state transitions.
    ///
    /// Only permitted while the engine is CREATED.
    pub fn set_state_listener(&self, listener: Arc<dyn StateListener>) -> Result<()> {
        self.state.set_listener(listener)
    }

    /// Start processing.
    ///
    /// Only permitted while the engine is CREATED. This call does not wait for the engine to run.
    #[tracing::instrument(level = "trace", skip(self), fields(application_id = %self.application_id))]
    pub fn start(&mut self) -> Result<()> {
        let state = self.state();
        if state != EngineState::Created || self.handle.is_some() {
            bail!(AppError::IllegalState(format!("engine may only be started while CREATED, engine is {}", state)));
        }
        self.state.transition(EngineState::Rebalancing);
        let task = task::EngineTask::new(
            self.config.clone(),
            self.topology.clone(),
            self.broker.clone(),
            self.state.clone(),
            self.state_dir(),
            self.pause_tx.subscribe(),
            &self.shutdown_tx,
        );
        self.handle = Some(task.spawn());
        Ok(())
    }

    /// Request the engine to stop fetching records.
    pub fn pause(&self) -> Result<()> {
        self.request_pause(true)
    }

    /// Request a paused engine to resume fetching records.
    pub fn resume(&self) -> Result<()> {
        self.request_pause(false)
    }

    fn request_pause(&self, paused: bool) -> Result<()> {
        let state = self.state();
        if !state.is_active() {
            bail!(AppError::IllegalState(format!("engine may only be paused or resumed while running, engine is {}", state)));
        }
        let _ = self.pause_tx.send(paused);
        Ok(())
    }

    /// Shut the engine down, waiting for its processing task to finish.
    ///
    /// This is idempotent, and an engine which was never started goes straight to NOT_RUNNING.
    #[tracing::instrument(level = "trace", skip(self), fields(application_id = %self.application_id))]
    pub async fn close(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = ?err, "error joining streaming engine task");
            }
        }
        self.state.transition(EngineState::NotRunning);
        Ok(())
    }

    /// Delete this engine's local state directory.
    ///
    /// Rejected while the engine is live. A missing directory is not an error.
    #[tracing::instrument(level = "trace", skip(self), fields(application_id = %self.application_id))]
    pub async fn clean_up(&self) -> Result<()> {
        let state = self.state();
        if state.is_active() {
            bail!(AppError::IllegalState(format!("engine state may not be cleaned up while {}", state)));
        }
        database::purge(&self.state_dir()).await?;
        tracing::debug!(state_dir = ?self.state_dir(), "engine state purged");
        Ok(())
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
