use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::StreamMap;

use crate::broker::BrokerRef;
use crate::config::{Config, OffsetReset};
use crate::engine::state::{EngineState, StateCell};
use crate::engine::store::StateStore;
use crate::engine::{
    METRIC_JOIN_EXPIRED, METRIC_JOIN_PENDING, METRIC_RECORDS_CONSUMED, METRIC_RECORDS_DROPPED_EMPTY, METRIC_RECORDS_DROPPED_MALFORMED, METRIC_RECORDS_FILTERED,
    METRIC_RECORDS_PUBLISHED,
};
use crate::join::{JoinChange, TriggerJoin};
use crate::models::record::InferenceRecord;
use crate::models::step::TopicName;
use crate::topology::{ProcessOutcome, Topology};

/// The processing task of a streaming engine.
pub(super) struct EngineTask {
    /// The application's runtime config.
    config: Arc<Config>,
    topology: Arc<Topology>,
    broker: BrokerRef,
    state: Arc<StateCell>,
    /// The directory of the engine's local state.
    state_dir: PathBuf,

    /// The evaluation of the topology's trigger join.
    join: TriggerJoin,
    /// The next offset to consume per source topic.
    offsets: HashMap<TopicName, u64>,
    /// A bool indicating if the engine is paused.
    paused: bool,

    /// A signal of the requested pause state.
    pause_rx: WatchStream<bool>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
}

impl EngineTask {
    /// Create a new instance.
    pub fn new(
        config: Arc<Config>, topology: Arc<Topology>, broker: BrokerRef, state: Arc<StateCell>, state_dir: PathBuf, pause_rx: watch::Receiver<bool>,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Self {
        let join = TriggerJoin::new(topology.join().clone(), config.join_window_ms, config.join_max_pending);
        Self {
            config,
            topology,
            broker,
            state,
            state_dir,
            join,
            offsets: HashMap::new(),
            paused: false,
            pause_rx: WatchStream::new(pause_rx),
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::debug!(input_topic = self.topology.input_topic(), output_topic = self.topology.output_topic(), "streaming engine has started");
        match self.try_run().await {
            Ok(()) => {
                self.state.transition(EngineState::NotRunning);
            }
            Err(err) => {
                tracing::error!(error = ?err, input_topic = self.topology.input_topic(), "fatal error in streaming engine");
                self.state.transition(EngineState::Error);
            }
        }
        tracing::debug!(input_topic = self.topology.input_topic(), output_topic = self.topology.output_topic(), "streaming engine has shutdown");
    }

    async fn try_run(&mut self) -> Result<()> {
        // Restore local state & assign source topics.
        let store = StateStore::open(&self.state_dir).await?;
        let recovered = store.recover().await?;
        tracing::debug!(
            offsets = ?recovered.offsets,
            observed = ?recovered.observed,
            pending = recovered.pending.len(),
            "recovered engine state"
        );
        self.join.restore(recovered.observed, recovered.pending, recovered.stream_time);
        metrics::gauge!(METRIC_JOIN_PENDING, self.join.pending_len() as f64);

        // Topic assignment waits on the broker, so it must yield to a shutdown request.
        let assignment = Self::assign_topics(self.config.clone(), self.topology.clone(), self.broker.clone(), recovered.offsets);
        let mut signals = tokio::select! {
            res = assignment => {
                let (offsets, signals) = res?;
                self.offsets = offsets;
                signals
            }
            _ = self.shutdown_rx.next() => {
                store.flush().await?;
                return Ok(());
            }
        };
        self.state.transition(EngineState::Running);

        let res = self.process(&store, &mut signals).await;
        if let Err(err) = store.flush().await {
            tracing::error!(error = ?err, "error flushing engine state store");
        }
        res
    }

    /// Resolve the starting offset of every source topic, subscribing to their offset signals.
    async fn assign_topics(
        config: Arc<Config>, topology: Arc<Topology>, broker: BrokerRef, committed: HashMap<TopicName, u64>,
    ) -> Result<(HashMap<TopicName, u64>, StreamMap<TopicName, WatchStream<u64>>)> {
        let (mut offsets, mut signals) = (HashMap::new(), StreamMap::new());
        for topic in topology.source_topics() {
            let offset = match committed.get(&topic) {
                Some(offset) => *offset,
                None => match config.auto_offset_reset {
                    OffsetReset::Earliest => 0,
                    OffsetReset::Latest => broker.end_offset(&topic).await?,
                },
            };
            tracing::debug!(%topic, offset, "assigned source topic");
            signals.insert(topic.clone(), WatchStream::new(broker.offset_signal(&topic).await?));
            offsets.insert(topic, offset);
        }
        Ok((offsets, signals))
    }

    async fn process(&mut self, store: &StateStore, signals: &mut StreamMap<TopicName, WatchStream<u64>>) -> Result<()> {
        loop {
            tokio::select! {
                Some((topic, _offset)) = signals.next() => {
                    if !self.paused {
                        self.drain_topic(store, &topic).await?;
                    }
                }
                Some(paused) = self.pause_rx.next() => self.handle_pause(store, paused).await?,
                _ = self.shutdown_rx.next() => break,
            }
        }
        Ok(())
    }

    /// Handle a change to the requested pause state.
    #[tracing::instrument(level = "trace", skip(self, store))]
    async fn handle_pause(&mut self, store: &StateStore, paused: bool) -> Result<()> {
        self.paused = paused;
        if paused {
            self.state.transition(EngineState::Paused);
            return Ok(());
        }
        self.state.transition(EngineState::Running);
        for topic in self.topology.source_topics() {
            self.drain_topic(store, &topic).await?;
        }
        Ok(())
    }

    /// Process all available records of the given topic, batch by batch.
    #[tracing::instrument(level = "trace", skip(self, store))]
    async fn drain_topic(&mut self, store: &StateStore, topic: &str) -> Result<()> {
        let max_batch_size = self.config.max_batch_size.max(1);
        loop {
            let offset = self.offsets.get(topic).copied().unwrap_or(0);
            let batch = self
                .broker
                .fetch(topic, offset, max_batch_size)
                .await
                .with_context(|| format!("error fetching records from topic {}", topic))?;
            if batch.is_empty() {
                return Ok(());
            }
            let batch_len = batch.len();
            let mut next_offset = offset;
            let mut outputs = vec![];
            for (offset, record) in batch {
                next_offset = offset + 1;
                metrics::increment_counter!(METRIC_RECORDS_CONSUMED);
                outputs.extend(self.process_record(topic, offset, record));
            }

            for record in outputs {
                self.broker
                    .publish(self.topology.output_topic(), record)
                    .await
                    .with_context(|| format!("error publishing record to topic {}", self.topology.output_topic()))?;
                metrics::increment_counter!(METRIC_RECORDS_PUBLISHED);
            }

            let changes = self.join.take_changes();
            let expired = changes.iter().filter(|change| matches!(change, JoinChange::Expired(_))).count();
            if expired > 0 {
                metrics::counter!(METRIC_JOIN_EXPIRED, expired as u64);
            }
            store.commit(topic, next_offset, changes, self.join.stream_time()).await?;
            self.offsets.insert(topic.to_string(), next_offset);
            metrics::gauge!(METRIC_JOIN_PENDING, self.join.pending_len() as f64);

            if batch_len < max_batch_size as usize {
                return Ok(());
            }
        }
    }

    /// Process a single record of a source topic, returning the records to publish.
    fn process_record(&mut self, topic: &str, offset: u64, record: InferenceRecord) -> Vec<InferenceRecord> {
        let mut outputs = vec![];
        if self.topology.trigger_qualifies(topic, &record) {
            outputs.extend(self.join.on_trigger(topic, offset, &record.key, record.timestamp));
        }
        if topic != self.topology.input_topic() {
            return outputs;
        }
        match self.topology.process_main(record) {
            ProcessOutcome::Forward(record) => outputs.extend(self.join.on_main(offset, record)),
            ProcessOutcome::Filtered => metrics::increment_counter!(METRIC_RECORDS_FILTERED),
            ProcessOutcome::DroppedEmpty => {
                tracing::debug!(offset, "dropping record without any selected tensor");
                metrics::increment_counter!(METRIC_RECORDS_DROPPED_EMPTY);
            }
            ProcessOutcome::Malformed(err) => {
                tracing::warn!(error = ?err, offset, topic, "dropping malformed record");
                metrics::increment_counter!(METRIC_RECORDS_DROPPED_MALFORMED);
            }
        }
        outputs
    }
}
