//! Trigger-join composer.
//!
//! Gates the main stream of a step on its trigger topics. The join is keyed: a main record is only
//! matched against trigger records sharing its key, which is the ID of the inference request. A
//! qualifying trigger record is remembered per key and trigger topic. Main records arriving while
//! the join condition of their key does not hold are held back in arrival order, and are released
//! the moment it holds. Both remembered triggers and held records expire once stream time, the
//! greatest record timestamp seen so far, moves past them by more than the join window.
//!
//! The composer never merges trigger payloads into the main stream.

#[cfg(test)]
mod mod_test;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::models::record::InferenceRecord;
use crate::models::step::{JoinType, PipelineStepSpec, TensorName, TopicName};

/// The trigger configuration of a step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JoinSpec {
    /// The topics gating the main stream.
    pub trigger_topics: BTreeSet<TopicName>,
    /// The tensors of which a trigger record must carry at least one, per trigger topic.
    pub trigger_tensors: BTreeMap<TopicName, BTreeSet<TensorName>>,
    /// The policy used to combine trigger observations.
    pub join_type: JoinType,
}

impl JoinSpec {
    /// Create a new instance configured by the given step.
    pub fn from_spec(spec: &PipelineStepSpec) -> Self {
        Self {
            trigger_topics: spec.trigger_topics().clone(),
            trigger_tensors: spec.trigger_tensors().cloned().unwrap_or_default(),
            join_type: spec.join_type(),
        }
    }

    /// Check if this join gates anything at all.
    pub fn is_noop(&self) -> bool {
        self.trigger_topics.is_empty()
    }
}

/// A main record held back by a closed join.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingRecord {
    /// The offset of the record in the main topic.
    pub offset: u64,
    pub record: InferenceRecord,
}

/// A qualifying trigger record remembered by the join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerObservation {
    /// The offset of the record in its trigger topic.
    pub offset: u64,
    pub timestamp: i64,
}

/// Remembered trigger records, per record key and then per trigger topic.
pub type ObservedTriggers = BTreeMap<String, BTreeMap<TopicName, TriggerObservation>>;

/// A change to the join state which must be persisted.
#[derive(Clone, Debug, PartialEq)]
pub enum JoinChange {
    /// A trigger record of the given key was remembered.
    Observed { key: String, topic: TopicName, observation: TriggerObservation },
    /// The remembered trigger record of the given key expired.
    Forgotten { key: String, topic: TopicName },
    /// A main record was held back.
    Pending(PendingRecord),
    /// The held record with the given main offset was released.
    Released(u64),
    /// The held record with the given main offset was dropped.
    Expired(u64),
}

/// The stateful evaluation of a step's trigger join.
#[derive(Debug)]
pub struct TriggerJoin {
    spec: JoinSpec,
    /// How far stream time may move past a held record or remembered trigger before it expires, in ms.
    window_ms: u64,
    /// The maximum number of held records.
    max_pending: usize,
    /// Remembered trigger records.
    observed: ObservedTriggers,
    /// Held main records, in arrival order.
    pending: VecDeque<PendingRecord>,
    /// The greatest record timestamp seen so far.
    stream_time: i64,
    /// Changes not yet taken for persistence.
    changes: Vec<JoinChange>,
}

impl TriggerJoin {
    /// Create a new instance.
    pub fn new(spec: JoinSpec, window_ms: u64, max_pending: usize) -> Self {
        Self {
            spec,
            window_ms,
            max_pending,
            observed: BTreeMap::new(),
            pending: VecDeque::new(),
            stream_time: 0,
            changes: Vec::new(),
        }
    }

    /// Restore previously persisted join state.
    pub fn restore(&mut self, observed: ObservedTriggers, mut pending: Vec<PendingRecord>, stream_time: i64) {
        pending.sort_by_key(|pending| pending.offset);
        let trigger_topics = &self.spec.trigger_topics;
        self.observed = observed
            .into_iter()
            .map(|(key, topics)| (key, topics.into_iter().filter(|(topic, _)| trigger_topics.contains(topic)).collect::<BTreeMap<_, _>>()))
            .filter(|(_, topics)| !topics.is_empty())
            .collect();
        self.pending = pending.into();
        self.stream_time = stream_time;
    }

    /// Check if the join condition currently holds for the given record key.
    pub fn is_open(&self, key: &str) -> bool {
        if self.spec.is_noop() {
            return true;
        }
        let observed = match self.observed.get(key) {
            Some(observed) => observed,
            None => return false,
        };
        match self.spec.join_type {
            JoinType::All => self.spec.trigger_topics.iter().all(|topic| observed.contains_key(topic)),
            JoinType::Any => self.spec.trigger_topics.iter().any(|topic| observed.contains_key(topic)),
        }
    }

    /// Handle a record of the main stream, returning the records to emit.
    pub fn on_main(&mut self, offset: u64, record: InferenceRecord) -> Vec<InferenceRecord> {
        self.advance_stream_time(record.timestamp);
        self.expire();
        if self.is_open(&record.key) {
            return vec![record];
        }
        if self.window_ms == 0 {
            tracing::debug!(offset, key = %record.key, "join closed and window is zero, dropping record");
            return vec![];
        }

        let pending = PendingRecord { offset, record };
        self.changes.push(JoinChange::Pending(pending.clone()));
        self.pending.push_back(pending);
        while self.pending.len() > self.max_pending {
            if let Some(dropped) = self.pending.pop_front() {
                tracing::warn!(offset = dropped.offset, max_pending = self.max_pending, "join pending buffer full, dropping oldest record");
                self.changes.push(JoinChange::Expired(dropped.offset));
            }
        }
        vec![]
    }

    /// Handle a qualifying record of a trigger topic, returning the records to emit.
    pub fn on_trigger(&mut self, topic: &str, offset: u64, key: &str, timestamp: i64) -> Vec<InferenceRecord> {
        if !self.spec.trigger_topics.contains(topic) {
            return vec![];
        }
        self.advance_stream_time(timestamp);
        self.expire();
        if self.is_stale(timestamp) {
            tracing::debug!(topic, offset, key, "trigger record is past the join window, ignoring");
            return vec![];
        }
        let observation = TriggerObservation { offset, timestamp };
        let observed = self.observed.entry(key.to_string()).or_default();
        let is_newer = observed.get(topic).map(|prev| prev.timestamp <= timestamp).unwrap_or(true);
        if is_newer {
            tracing::debug!(topic, offset, key, "trigger observed");
            observed.insert(topic.to_string(), observation);
            self.changes.push(JoinChange::Observed { key: key.to_string(), topic: topic.to_string(), observation });
        }
        if !self.is_open(key) {
            return vec![];
        }

        let (released, held): (VecDeque<_>, VecDeque<_>) = self.pending.drain(..).partition(|pending| pending.record.key == key);
        self.pending = held;
        released
            .into_iter()
            .map(|pending| {
                self.changes.push(JoinChange::Released(pending.offset));
                pending.record
            })
            .collect()
    }

    /// Take all changes made since the last call.
    pub fn take_changes(&mut self) -> Vec<JoinChange> {
        std::mem::take(&mut self.changes)
    }

    /// The number of held records.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The greatest record timestamp seen so far.
    pub fn stream_time(&self) -> i64 {
        self.stream_time
    }

    /// The remembered trigger records.
    pub fn observed(&self) -> &ObservedTriggers {
        &self.observed
    }

    fn advance_stream_time(&mut self, timestamp: i64) {
        self.stream_time = self.stream_time.max(timestamp);
    }

    /// Check if stream time has moved past the given timestamp by more than the window.
    fn is_stale(&self, timestamp: i64) -> bool {
        let window = i64::try_from(self.window_ms).unwrap_or(i64::MAX);
        self.stream_time.saturating_sub(timestamp) > window
    }

    /// Drop every held record and remembered trigger which is past the window.
    fn expire(&mut self) {
        let (stream_time, window) = (self.stream_time, i64::try_from(self.window_ms).unwrap_or(i64::MAX));
        let changes = &mut self.changes;
        self.pending.retain(|pending| {
            let live = stream_time.saturating_sub(pending.record.timestamp) <= window;
            if !live {
                tracing::debug!(offset = pending.offset, "join window elapsed, dropping record");
                changes.push(JoinChange::Expired(pending.offset));
            }
            live
        });
        self.observed.retain(|key, topics| {
            topics.retain(|topic, observation| {
                let live = stream_time.saturating_sub(observation.timestamp) <= window;
                if !live {
                    tracing::debug!(%topic, %key, "join window elapsed, forgetting trigger");
                    changes.push(JoinChange::Forgotten { key: key.clone(), topic: topic.clone() });
                }
                live
            });
            !topics.is_empty()
        });
    }
}
