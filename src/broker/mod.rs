//! Broker topic logs.
//!
//! The chainer only ever talks to a broker through the `Broker` trait: records are appended to
//! a topic, receiving a monotonically increasing offset starting at `0`, and are read back in
//! offset order. Each topic exposes a watch signal carrying the offset which the next record
//! written to the topic will receive, which consumers use to wake up when new data lands.

mod local;
#[cfg(test)]
mod local_test;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use crate::models::record::InferenceRecord;

pub use local::LocalBroker;

/// A shared handle to a broker.
pub type BrokerRef = Arc<dyn Broker>;

/// The interface to the topic logs of a message broker.
#[async_trait::async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Append the given record to a topic, returning the offset assigned to it.
    async fn publish(&self, topic: &str, record: InferenceRecord) -> Result<u64>;

    /// Fetch up to `max` records of a topic, starting at the given offset.
    async fn fetch(&self, topic: &str, offset: u64, max: u32) -> Result<Vec<(u64, InferenceRecord)>>;

    /// The offset which the next record written to the given topic will receive.
    async fn end_offset(&self, topic: &str) -> Result<u64>;

    /// A signal carrying the end offset of the given topic, updated on every write.
    async fn offset_signal(&self, topic: &str) -> Result<watch::Receiver<u64>>;
}
