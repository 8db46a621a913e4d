use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::prelude::*;
use tokio::sync::watch;

use crate::broker::Broker;
use crate::engine::{EngineState, StateListener};
use crate::models::proto::inference::{model_infer_request, model_infer_response, InferTensorContents, ModelInferRequest, ModelInferResponse};
use crate::models::record::InferenceRecord;
use crate::utils;

/// The default amount of time tests wait for asynchronous outcomes.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a record of the given pipeline with a random key and the current time.
pub fn record(pipeline: &str, payload: Vec<u8>) -> InferenceRecord {
    let key = format!("req-{}", rand::thread_rng().gen_range(0..u32::MAX));
    InferenceRecord::new(key, pipeline, payload, utils::now_millis())
}

/// Build a record of the given pipeline with the given timestamp.
pub fn record_at(pipeline: &str, payload: Vec<u8>, timestamp: i64) -> InferenceRecord {
    let mut record = record(pipeline, payload);
    record.timestamp = timestamp;
    record
}

/// Build a record of the given request key & pipeline with the given timestamp.
pub fn keyed_record(key: &str, pipeline: &str, payload: Vec<u8>, timestamp: i64) -> InferenceRecord {
    InferenceRecord::new(key, pipeline, payload, timestamp)
}

/// Build a model response holding one FP32 output tensor per given name.
pub fn response(id: &str, tensors: &[&str]) -> ModelInferResponse {
    ModelInferResponse {
        model_name: "m1".into(),
        id: id.into(),
        outputs: tensors
            .iter()
            .map(|name| model_infer_response::InferOutputTensor {
                name: name.to_string(),
                datatype: "FP32".into(),
                shape: vec![1, 2],
                contents: Some(InferTensorContents { fp32_contents: vec![1.0, 2.0], ..Default::default() }),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// Build a model request holding one FP32 input tensor per given name.
pub fn request(id: &str, tensors: &[&str]) -> ModelInferRequest {
    ModelInferRequest {
        model_name: "m2".into(),
        id: id.into(),
        inputs: tensors
            .iter()
            .map(|name| model_infer_request::InferInputTensor {
                name: name.to_string(),
                datatype: "FP32".into(),
                shape: vec![1, 2],
                contents: Some(InferTensorContents { fp32_contents: vec![1.0, 2.0], ..Default::default() }),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// Encode a model response holding the given output tensors.
pub fn response_payload(id: &str, tensors: &[&str]) -> Result<Vec<u8>> {
    utils::encode_model(&response(id, tensors))
}

/// Encode a model request holding the given input tensors.
pub fn request_payload(id: &str, tensors: &[&str]) -> Result<Vec<u8>> {
    utils::encode_model(&request(id, tensors))
}

/// Publish a random number of records of the given pipeline to a topic, returning them.
pub async fn setup_topic_data(broker: &dyn Broker, topic: &str, pipeline: &str) -> Result<Vec<InferenceRecord>> {
    let count = rand::thread_rng().gen_range(20..50);
    let mut records = Vec::with_capacity(count);
    for idx in 0..count {
        let record = record(pipeline, format!("payload-{}", idx).into_bytes());
        broker.publish(topic, record.clone()).await?;
        records.push(record);
    }
    Ok(records)
}

/// Wait until the given topic holds at least `count` records from the given offset, returning them.
pub async fn wait_for_records(broker: &dyn Broker, topic: &str, offset: u64, count: usize) -> Result<Vec<(u64, InferenceRecord)>> {
    let mut signal = broker.offset_signal(topic).await?;
    tokio::time::timeout(TEST_TIMEOUT, async move {
        loop {
            let records = broker.fetch(topic, offset, count as u32).await?;
            if records.len() >= count {
                return Ok::<_, anyhow::Error>(records);
            }
            signal.changed().await.context("topic signal closed")?;
        }
    })
    .await
    .with_context(|| format!("timeout waiting for {} records on topic {}", count, topic))?
}

/// Assert that no records land on the given topic from the given offset for a short while.
pub async fn assert_no_records(broker: &dyn Broker, topic: &str, offset: u64) -> Result<()> {
    tokio::time::sleep(Duration::from_millis(300)).await;
    let records = broker.fetch(topic, offset, 10).await?;
    assert!(records.is_empty(), "expected no records on topic {} from offset {}, got {}", topic, offset, records.len());
    Ok(())
}

/// Wait until the given engine state signal reports the expected state.
pub async fn wait_for_state(signal: &mut watch::Receiver<EngineState>, expected: EngineState) -> Result<()> {
    tokio::time::timeout(TEST_TIMEOUT, async move {
        loop {
            if *signal.borrow() == expected {
                return Ok::<_, anyhow::Error>(());
            }
            signal.changed().await.context("engine state signal closed")?;
        }
    })
    .await
    .with_context(|| format!("timeout waiting for engine state {}", expected))?
}

/// A state listener recording every transition it observes.
#[derive(Default)]
pub struct RecordingListener {
    transitions: Mutex<Vec<(EngineState, EngineState)>>,
}

impl RecordingListener {
    /// All transitions observed so far, as `(new, old)` pairs.
    pub fn transitions(&self) -> Vec<(EngineState, EngineState)> {
        self.transitions.lock().map(|transitions| transitions.clone()).unwrap_or_default()
    }
}

impl StateListener for RecordingListener {
    fn on_change(&self, new_state: EngineState, old_state: EngineState) {
        if let Ok(mut transitions) = self.transitions.lock() {
            transitions.push((new_state, old_state));
        }
    }
}

/// A broker which fails every request.
pub struct UnreachableBroker;

#[async_trait::async_trait]
impl Broker for UnreachableBroker {
    async fn publish(&self, _topic: &str, _record: InferenceRecord) -> Result<u64> {
        bail!("broker unreachable")
    }

    async fn fetch(&self, _topic: &str, _offset: u64, _max: u32) -> Result<Vec<(u64, InferenceRecord)>> {
        bail!("broker unreachable")
    }

    async fn end_offset(&self, _topic: &str) -> Result<u64> {
        bail!("broker unreachable")
    }

    async fn offset_signal(&self, _topic: &str) -> Result<watch::Receiver<u64>> {
        bail!("broker unreachable")
    }
}
