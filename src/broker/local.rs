use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sled::Tree;
use tokio::sync::{watch, Mutex};

use crate::broker::Broker;
use crate::database::Database;
use crate::error::{ShutdownError, ERR_ITER_FAILURE};
use crate::models::proto::record::StoredRecord;
use crate::models::record::InferenceRecord;
use crate::models::step::TopicName;
use crate::utils;

/// The key prefix used for storing topic records.
///
/// NOTE: in order to preserve lexicographical ordering of keys, it is important to always use
/// the `utils::encode_byte_prefix*` methods.
pub const PREFIX_RECORD: &[u8; 1] = b"r";
/// The key used to store the next offset of a topic.
pub const KEY_NEXT_OFFSET: &[u8; 1] = b"n";

const METRIC_PUBLISHED: &str = "chainer_broker_records_published";

/// A broker backed by a local sled database, holding one append-only log per topic.
#[derive(Clone)]
pub struct LocalBroker {
    /// The broker's database.
    db: Database,
    /// All topics opened so far.
    topics: Arc<Mutex<HashMap<TopicName, Arc<TopicLog>>>>,
}

/// The log of a single topic.
struct TopicLog {
    /// The topic's database tree.
    tree: Tree,
    /// The offset which the next record written to this topic will receive.
    next_offset: std::sync::Mutex<u64>,
    /// A channel used for communicating the topic's next offset.
    signal: watch::Sender<u64>,
    /// Held so that the signal stays open while no consumer is subscribed.
    signal_rx: watch::Receiver<u64>,
}

impl LocalBroker {
    /// Open the broker whose data lives at the given path.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let db = Database::open(path).await.context("error opening broker database")?;
        metrics::register_counter!(METRIC_PUBLISHED, metrics::Unit::Count, "the number of records published to the local broker");
        Ok(Self { db, topics: Default::default() })
    }

    /// Flush all written records to disk.
    pub async fn flush(&self) -> Result<()> {
        self.db.flush().await?;
        Ok(())
    }

    /// Get a handle to the log of the given topic, recovering it from disk as needed.
    #[tracing::instrument(level = "trace", skip(self))]
    async fn topic(&self, topic: &str) -> Result<Arc<TopicLog>> {
        let mut topics = self.topics.lock().await;
        if let Some(log) = topics.get(topic) {
            return Ok(log.clone());
        }

        let tree = self.db.get_topic_tree(topic).await?;
        let next_offset = recover_next_offset(tree.clone()).await?;
        let (signal, signal_rx) = watch::channel(next_offset);
        let log = Arc::new(TopicLog {
            tree,
            next_offset: std::sync::Mutex::new(next_offset),
            signal,
            signal_rx,
        });
        topics.insert(topic.to_string(), log.clone());
        tracing::debug!(topic, next_offset, "opened broker topic");
        Ok(log)
    }
}

#[async_trait::async_trait]
impl Broker for LocalBroker {
    #[tracing::instrument(level = "trace", skip(self, record))]
    async fn publish(&self, topic: &str, mut record: InferenceRecord) -> Result<u64> {
        let log = self.topic(topic).await?;
        if record.timestamp <= 0 {
            record.timestamp = utils::now_millis();
        }
        let entry = utils::encode_model(&StoredRecord::from(record)).context("error encoding record for storage")?;

        let offset = {
            let mut next_offset = log
                .next_offset
                .lock()
                .map_err(|_| ShutdownError(anyhow::anyhow!("topic {} offset lock poisoned", topic)))?;
            let offset = *next_offset;
            let mut batch = sled::Batch::default();
            batch.insert(&utils::encode_byte_prefix(PREFIX_RECORD, offset), entry.as_slice());
            batch.insert(KEY_NEXT_OFFSET, &utils::encode_u64(offset + 1));
            log.tree
                .apply_batch(batch)
                .context("error applying write batch")
                .map_err(ShutdownError::from)?;
            *next_offset = offset + 1;
            offset
        };

        let _ = log.signal.send(offset + 1);
        metrics::increment_counter!(METRIC_PUBLISHED);
        tracing::trace!(topic, offset, "record published");
        Ok(offset)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn fetch(&self, topic: &str, offset: u64, max: u32) -> Result<Vec<(u64, InferenceRecord)>> {
        let log = self.topic(topic).await?;
        let tree = log.tree.clone();
        Database::spawn_blocking(move || -> Result<Vec<(u64, InferenceRecord)>> {
            let start = utils::encode_byte_prefix(PREFIX_RECORD, offset);
            let stop = utils::encode_byte_prefix(PREFIX_RECORD, offset.saturating_add(max as u64));
            let mut data = Vec::with_capacity(max as usize);
            for iter_res in tree.range(start..stop) {
                let (key, val) = iter_res.context(ERR_ITER_FAILURE).map_err(ShutdownError::from)?;
                let offset = utils::decode_u64(&key[1..])?;
                let record: StoredRecord = utils::decode_model(val.as_ref()).context("error decoding record from storage")?;
                data.push((offset, record.into()));
            }
            Ok(data)
        })
        .await?
    }

    async fn end_offset(&self, topic: &str) -> Result<u64> {
        let log = self.topic(topic).await?;
        let next_offset = *log.signal_rx.borrow();
        Ok(next_offset)
    }

    async fn offset_signal(&self, topic: &str) -> Result<watch::Receiver<u64>> {
        let log = self.topic(topic).await?;
        Ok(log.signal_rx.clone())
    }
}

/// Recover the next offset of a topic from its tree.
async fn recover_next_offset(tree: Tree) -> Result<u64> {
    Database::spawn_blocking(move || -> Result<u64> {
        let offset_opt = tree.get(KEY_NEXT_OFFSET).context("error fetching next offset key during recovery")?;
        let next_offset = offset_opt
            .map(|val| utils::decode_u64(&val).context("error decoding offset value from storage"))
            .transpose()?
            .unwrap_or(0);
        Ok(next_offset)
    })
    .await?
}
