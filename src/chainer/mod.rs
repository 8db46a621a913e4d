//! Chainer lifecycle controller.
//!
//! A chainer wires one pipeline step onto the broker. It owns exactly one streaming engine for
//! its whole lifetime, built lazily together with the step's topology the first time the chainer
//! is started or stopped.


use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use tokio::sync::{oneshot, watch};

use crate::broker::BrokerRef;
use crate::config::Config;
use crate::engine::{EngineState, StateListener, StreamEngine};
use crate::error::AppError;
use crate::models::step::{PipelineStepSpec, TopicName};
use crate::topology::Topology;

/// The controller of a single pipeline step.
pub struct Chainer {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The step served by this chainer.
    spec: Arc<PipelineStepSpec>,
    broker: BrokerRef,
    /// The streaming engine of this chainer, built on first use.
    engine: Option<StreamEngine>,
}

impl Chainer {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, spec: PipelineStepSpec, broker: BrokerRef) -> Self {
        Self { config, spec: Arc::new(spec), broker, engine: None }
    }

    /// The step served by this chainer.
    pub fn spec(&self) -> &PipelineStepSpec {
        &self.spec
    }

    /// The streaming engine of this chainer, if built.
    pub fn engine(&self) -> Option<&StreamEngine> {
        self.engine.as_ref()
    }

    /// A signal of the state of this chainer's streaming engine.
    pub fn state_signal(&mut self) -> watch::Receiver<EngineState> {
        self.streams().state_signal()
    }

    /// Get the streaming engine of this chainer, building it along with its topology on first use.
    fn streams(&mut self) -> &mut StreamEngine {
        let (config, spec, broker) = (&self.config, &self.spec, &self.broker);
        self.engine.get_or_insert_with(|| {
            let topology = Topology::build(spec);
            tracing::info!(input_topic = spec.input_topic(), output_topic = spec.output_topic(), "built topology\n{}", topology.describe());
            StreamEngine::new(config.clone(), spec.application_id(&config.client_id), topology, broker.clone())
        })
    }

    /// Start the chainer, returning once its streaming engine is running.
    ///
    /// Without a configured start timeout this waits indefinitely.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        let (config, spec) = (self.config.clone(), self.spec.clone());
        let engine = self.streams();
        if config.use_clean_state {
            engine.clean_up().await?;
        }
        tracing::info!(
            input_topic = spec.input_topic(),
            output_topic = spec.output_topic(),
            trigger_topics = ?spec.trigger_topics(),
            trigger_tensors = ?spec.trigger_tensors(),
            join_type = %spec.join_type(),
            "starting chainer",
        );

        let (gate_tx, gate_rx) = oneshot::channel();
        engine.set_state_listener(Arc::new(ChainerStateListener {
            input_topic: spec.input_topic().to_string(),
            output_topic: spec.output_topic().to_string(),
            gate: Mutex::new(Some(gate_tx)),
        }))?;
        engine.start()?;

        let res = match config.start_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, gate_rx).await.map_err(|_| AppError::StartTimeout(timeout))?,
            None => gate_rx.await,
        };
        if res.is_err() {
            bail!(AppError::IllegalState("streaming engine was dropped before reaching a running state".into()));
        }
        Ok(())
    }

    /// Stop the chainer, closing its streaming engine and purging its local state.
    ///
    /// This may be called without a prior start, and may be called repeatedly.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!(input_topic = self.spec.input_topic(), output_topic = self.spec.output_topic(), "stopping chainer");
        let engine = self.streams();
        engine.close().await?;
        engine.clean_up().await?;
        Ok(())
    }
}

/// The state listener of a chainer, releasing the start gate on the first RUNNING state.
struct ChainerStateListener {
    input_topic: TopicName,
    output_topic: TopicName,
    /// The one-shot start gate, taken when released.
    gate: Mutex<Option<oneshot::Sender<()>>>,
}

impl StateListener for ChainerStateListener {
    fn on_change(&self, new_state: EngineState, old_state: EngineState) {
        tracing::info!(
            input_topic = %self.input_topic,
            output_topic = %self.output_topic,
            %new_state,
            %old_state,
            "chainer state change"
        );
        if new_state != EngineState::Running {
            return;
        }
        let gate = match self.gate.lock() {
            Ok(mut gate) => gate.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(gate) = gate {
            let _ = gate.send(());
        }
    }
}
