//! Topology builder.
//!
//! A topology is built exactly once per chainer from its step, and describes how each record of
//! the step's source topics is processed: records of the input topic are filtered to the step's
//! pipeline, converted when the step bridges model outputs to model inputs, gated by the trigger
//! join, and published to the output topic. Building a topology performs no broker I/O.


use std::fmt;

use anyhow::Error;

use crate::codec::{self, CodecAdapter};
use crate::join::JoinSpec;
use crate::models::record::InferenceRecord;
use crate::models::step::{PipelineStepSpec, TopicName};

/// The payload handling of a topology.
#[derive(Clone, Debug, PartialEq)]
pub enum TopologyVariant {
    /// Model responses are converted into requests for the next model.
    CodecBridging(CodecAdapter),
    /// Payloads are forwarded untouched.
    PassThrough,
}

/// The outcome of processing a record of the input topic.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The record belongs to another pipeline.
    Filtered,
    /// No tensor survived the conversion.
    DroppedEmpty,
    /// The payload could not be converted.
    Malformed(Error),
    /// The record is to be handed to the join.
    Forward(InferenceRecord),
}

/// The assembled processing topology of a step.
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    pipeline_name: String,
    input_topic: TopicName,
    output_topic: TopicName,
    variant: TopologyVariant,
    join: JoinSpec,
}

impl Topology {
    /// Build the topology of the given step.
    pub fn build(spec: &PipelineStepSpec) -> Self {
        let variant = if spec.bridges_model_output_to_input() {
            TopologyVariant::CodecBridging(CodecAdapter::from_spec(spec))
        } else {
            TopologyVariant::PassThrough
        };
        Self {
            pipeline_name: spec.pipeline_name().to_string(),
            input_topic: spec.input_topic().to_string(),
            output_topic: spec.output_topic().to_string(),
            variant,
            join: JoinSpec::from_spec(spec),
        }
    }

    pub fn input_topic(&self) -> &str {
        &self.input_topic
    }

    pub fn output_topic(&self) -> &str {
        &self.output_topic
    }

    pub fn variant(&self) -> &TopologyVariant {
        &self.variant
    }

    pub fn join(&self) -> &JoinSpec {
        &self.join
    }

    /// All topics consumed by this topology, the input topic first.
    pub fn source_topics(&self) -> Vec<TopicName> {
        std::iter::once(self.input_topic.clone())
            .chain(self.join.trigger_topics.iter().filter(|topic| **topic != self.input_topic).cloned())
            .collect()
    }

    /// Check if the given record belongs to this topology's pipeline.
    pub fn filter_for_pipeline(&self, record: &InferenceRecord) -> bool {
        record.pipeline() == Some(self.pipeline_name.as_str())
    }

    /// Process a record of the input topic up to the join.
    pub fn process_main(&self, record: InferenceRecord) -> ProcessOutcome {
        if !self.filter_for_pipeline(&record) {
            tracing::debug!(key = %record.key, pipeline = ?record.pipeline(), "dropping record of another pipeline");
            return ProcessOutcome::Filtered;
        }
        match &self.variant {
            TopologyVariant::PassThrough => ProcessOutcome::Forward(record),
            TopologyVariant::CodecBridging(adapter) => match adapter.apply(&record) {
                Ok(Some(converted)) => ProcessOutcome::Forward(converted),
                Ok(None) => ProcessOutcome::DroppedEmpty,
                Err(err) => ProcessOutcome::Malformed(err),
            },
        }
    }

    /// Check if the given record of a trigger topic qualifies as a trigger observation.
    pub fn trigger_qualifies(&self, topic: &str, record: &InferenceRecord) -> bool {
        if !self.join.trigger_topics.contains(topic) || !self.filter_for_pipeline(record) {
            return false;
        }
        let tensors = match self.join.trigger_tensors.get(topic) {
            Some(tensors) if !tensors.is_empty() => tensors,
            _ => return true,
        };
        match codec::tensor_names(topic, &record.payload) {
            Ok(names) => names.iter().any(|name| tensors.contains(name)),
            Err(err) => {
                tracing::warn!(error = ?err, topic, key = %record.key, "undecodable trigger record does not qualify");
                false
            }
        }
    }

    /// Render a human readable description of this topology.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Topology: pipeline={}", self.pipeline_name)?;
        writeln!(f, "  Source: {}", self.input_topic)?;
        writeln!(f, "  Filter: header pipeline == {}", self.pipeline_name)?;
        match &self.variant {
            TopologyVariant::CodecBridging(_) => writeln!(f, "  Codec: model response -> model request")?,
            TopologyVariant::PassThrough => writeln!(f, "  Codec: pass-through")?,
        }
        if self.join.is_noop() {
            writeln!(f, "  Join: none")?;
        } else {
            writeln!(f, "  Join: {} of", self.join.join_type)?;
            for topic in &self.join.trigger_topics {
                match self.join.trigger_tensors.get(topic) {
                    Some(tensors) => writeln!(f, "    Trigger: {} tensors={:?}", topic, tensors)?,
                    None => writeln!(f, "    Trigger: {}", topic)?,
                }
            }
        }
        write!(f, "  Sink: {}", self.output_topic)
    }
}
