use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, Stream, StreamExt};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::broker::LocalBroker;
use crate::chainer::Chainer;
use crate::config::Config;
use crate::models::step::PipelineStepSpec;
use crate::server::spawn_server;

/// The application object for when the chainer is running as a process.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,
    /// The broker of this process.
    broker: LocalBroker,
    /// The chainer of the step served by this process.
    chainer: Chainer,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the metrics & health server.
    server: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>, spec: PipelineStepSpec) -> Result<Self> {
        // App shutdown channel.
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);

        let broker = LocalBroker::open(config.broker_data_path()).await.context("error opening broker")?;
        let mut chainer = Chainer::new(config.clone(), spec, Arc::new(broker.clone()));
        let server = spawn_server(&config, chainer.state_signal(), shutdown_tx.subscribe());

        Ok(Self {
            _config: config,
            broker,
            chainer,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            server,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));
        let signals = signals.map(|(name, _)| tracing::debug!(signal = name, "signal received, beginning graceful shutdown"));
        let mut stop = stream::select(signals, (&mut self.shutdown_rx).map(|_| ()));

        let res = Self::drive(&mut self.chainer, &mut stop).await;

        // Begin shutdown routine.
        tracing::debug!("chainer is shutting down");
        if let Err(err) = self.chainer.stop().await {
            tracing::error!(error = ?err, "error stopping chainer");
        }
        let _ = self.shutdown_tx.send(());
        if let Err(err) = self.server.await.context("error joining server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down server");
        }
        if let Err(err) = self.broker.flush().await {
            tracing::error!(error = ?err, "error flushing broker");
        }

        tracing::debug!("chainer shutdown complete");
        res
    }

    /// Start the chainer and keep it running until a stop request arrives.
    ///
    /// A stop request also interrupts a start which is still waiting on the engine. A failed start
    /// is returned as an error.
    pub(crate) async fn drive<S: Stream<Item = ()> + Unpin>(chainer: &mut Chainer, stop: &mut S) -> Result<()> {
        tokio::select! {
            res = chainer.start() => res.context("error starting chainer")?,
            _ = stop.next() => {
                tracing::debug!("stop requested while starting chainer");
                return Ok(());
            }
        }
        tracing::info!("chainer started");
        let _ = stop.next().await;
        Ok(())
    }
}
