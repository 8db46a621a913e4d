use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use sled::Tree;

use crate::database::Database;
use crate::error::{ShutdownError, ShutdownResult, ERR_DB_FLUSH, ERR_ITER_FAILURE};
use crate::join::{JoinChange, ObservedTriggers, PendingRecord, TriggerObservation};
use crate::models::proto::record::StoredRecord;
use crate::models::step::TopicName;
use crate::utils;

/// The key prefix used for storing the next offset to consume per source topic.
///
/// Keys are of the form `o{topic}`.
pub(super) const PREFIX_OFFSET: &[u8; 1] = b"o";
/// The key prefix used for storing remembered trigger records.
///
/// Keys are of the form `t{key_len}{key}{topic}`, `key_len` being the big-endian u32 length of the
/// record key. Values hold the big-endian offset & timestamp of the trigger record.
pub(super) const PREFIX_TRIGGER: &[u8; 1] = b"t";
/// The key prefix used for storing held main records.
///
/// NOTE: in order to preserve lexicographical ordering of keys, it is important to always use
/// the `utils::encode_byte_prefix*` methods.
pub(super) const PREFIX_PENDING: &[u8; 1] = b"p";
/// The key used to store the join's stream time.
pub(super) const KEY_STREAM_TIME: &[u8; 1] = b"s";

/// The local state store of a streaming engine.
pub(super) struct StateStore {
    db: Database,
    tree: Tree,
}

/// The state recovered from a state store.
#[derive(Debug, Default)]
pub(super) struct RecoveredState {
    pub offsets: HashMap<TopicName, u64>,
    pub observed: ObservedTriggers,
    pub pending: Vec<PendingRecord>,
    pub stream_time: i64,
}

impl StateStore {
    /// Open the state store living in the given directory.
    pub async fn open(path: &Path) -> Result<Self> {
        let db = Database::open(path).await.context("error opening engine state store")?;
        let tree = db.get_engine_state_tree().await?;
        Ok(Self { db, tree })
    }

    /// Recover all state held by this store.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn recover(&self) -> Result<RecoveredState> {
        let tree = self.tree.clone();
        Database::spawn_blocking(move || -> Result<RecoveredState> {
            let mut state = RecoveredState::default();

            for entry_res in tree.scan_prefix(PREFIX_OFFSET) {
                let (key, val) = entry_res.context(ERR_ITER_FAILURE)?;
                let topic = utils::decode_byte_prefix_str(&key)?;
                let offset = utils::decode_u64(&val).context("error decoding topic offset from storage")?;
                state.offsets.insert(topic, offset);
            }

            for entry_res in tree.scan_prefix(PREFIX_TRIGGER) {
                let (key, val) = entry_res.context(ERR_ITER_FAILURE)?;
                let (record_key, topic) = decode_trigger_key(&key)?;
                let observation = decode_trigger_observation(&val)?;
                state.observed.entry(record_key).or_default().insert(topic, observation);
            }

            for entry_res in tree.scan_prefix(PREFIX_PENDING) {
                let (key, val) = entry_res.context(ERR_ITER_FAILURE)?;
                let offset = utils::decode_u64(&key[1..])?;
                let record: StoredRecord = utils::decode_model(&val).context("error decoding pending record from storage")?;
                state.pending.push(PendingRecord { offset, record: record.into() });
            }

            state.stream_time = tree
                .get(KEY_STREAM_TIME)
                .context("error fetching stream time during recovery")?
                .map(|val| utils::decode_i64(&val).context("error decoding stream time, data corrupted"))
                .transpose()?
                .unwrap_or(0);
            Ok(state)
        })
        .await?
    }

    /// Atomically commit the next offset of a topic along with the given join changes.
    #[tracing::instrument(level = "trace", skip(self, changes))]
    pub async fn commit(&self, topic: &str, next_offset: u64, changes: Vec<JoinChange>, stream_time: i64) -> ShutdownResult<()> {
        let mut batch = sled::Batch::default();
        batch.insert(utils::encode_byte_prefix_str(PREFIX_OFFSET, topic), &utils::encode_u64(next_offset));
        batch.insert(KEY_STREAM_TIME, &utils::encode_i64(stream_time));
        for change in changes {
            match change {
                JoinChange::Observed { key, topic, observation } => {
                    batch.insert(encode_trigger_key(&key, &topic), encode_trigger_observation(observation));
                }
                JoinChange::Forgotten { key, topic } => {
                    batch.remove(encode_trigger_key(&key, &topic));
                }
                JoinChange::Pending(pending) => {
                    let entry = utils::encode_model(&StoredRecord::from(pending.record)).context("error encoding pending record for storage")?;
                    batch.insert(&utils::encode_byte_prefix(PREFIX_PENDING, pending.offset), entry.as_slice());
                }
                JoinChange::Released(offset) | JoinChange::Expired(offset) => {
                    batch.remove(&utils::encode_byte_prefix(PREFIX_PENDING, offset));
                }
            }
        }

        let tree = self.tree.clone();
        Database::spawn_blocking(move || -> Result<()> {
            tree.apply_batch(batch).context("error applying engine state batch")?;
            Ok(())
        })
        .await
        .and_then(|res| res.map_err(ShutdownError::from))
    }

    /// Flush all dirty state to disk.
    pub async fn flush(&self) -> Result<()> {
        self.db.flush().await.context(ERR_DB_FLUSH)?;
        Ok(())
    }
}

/// Encode the storage key of a remembered trigger record.
fn encode_trigger_key(key: &str, topic: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 4 + key.len() + topic.len());
    buf.extend_from_slice(PREFIX_TRIGGER);
    buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(topic.as_bytes());
    buf
}

/// Decode the record key & trigger topic of a remembered trigger record's storage key.
fn decode_trigger_key(data: &[u8]) -> Result<(String, TopicName)> {
    let len_bytes: [u8; 4] = data
        .get(1..5)
        .and_then(|bytes| bytes.try_into().ok())
        .context("error decoding trigger key, data corrupted")?;
    let key_end = 5 + u32::from_be_bytes(len_bytes) as usize;
    let key = data.get(5..key_end).context("error decoding trigger key, data corrupted")?;
    let key = std::str::from_utf8(key).context("error decoding trigger record key")?;
    let topic = std::str::from_utf8(&data[key_end..]).context("error decoding trigger topic")?;
    Ok((key.to_string(), topic.to_string()))
}

fn encode_trigger_observation(observation: TriggerObservation) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&utils::encode_u64(observation.offset));
    buf.extend_from_slice(&utils::encode_i64(observation.timestamp));
    buf
}

fn decode_trigger_observation(data: &[u8]) -> Result<TriggerObservation> {
    if data.len() != 16 {
        bail!("error decoding trigger observation, expected 16 bytes, got {}", data.len());
    }
    Ok(TriggerObservation {
        offset: utils::decode_u64(&data[..8]).context("error decoding trigger offset from storage")?,
        timestamp: utils::decode_i64(&data[8..]).context("error decoding trigger timestamp from storage")?,
    })
}
