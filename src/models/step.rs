//! The pipeline step data model.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::utils;

/// The name of a broker topic.
pub type TopicName = String;
/// The name of a tensor within an inference request or response.
pub type TensorName = String;

/// The suffix of topics carrying the raw outputs of a model.
pub const TOPIC_SUFFIX_OUTPUTS: &str = "outputs";
/// The suffix of topics carrying the raw inputs of a model.
pub const TOPIC_SUFFIX_INPUTS: &str = "inputs";

/// The policy used to combine the main stream of a step with its trigger streams.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum JoinType {
    /// Every trigger topic must have produced a qualifying record.
    #[serde(alias = "all", alias = "ALL", alias = "inner", alias = "INNER")]
    All,
    /// At least one trigger topic must have produced a qualifying record.
    #[serde(alias = "any", alias = "ANY", alias = "outer", alias = "OUTER")]
    Any,
}

impl Default for JoinType {
    fn default() -> Self {
        JoinType::All
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::All => f.write_str("all"),
            JoinType::Any => f.write_str("any"),
        }
    }
}

impl FromStr for JoinType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "inner" => Ok(JoinType::All),
            "any" | "outer" => Ok(JoinType::Any),
            _ => Err(AppError::InvalidInput(format!("unknown join type '{}', expected one of all, any", s))),
        }
    }
}

/// The kind of payload carried by a topic, according to the topic naming convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopicKind {
    /// A topic of model inference requests.
    ModelInputs,
    /// A topic of model inference responses.
    ModelOutputs,
    /// Any other topic.
    Other,
}

impl TopicKind {
    /// Classify the given topic by its suffix.
    pub fn of(topic: &str) -> Self {
        if topic.ends_with(TOPIC_SUFFIX_OUTPUTS) {
            TopicKind::ModelOutputs
        } else if topic.ends_with(TOPIC_SUFFIX_INPUTS) {
            TopicKind::ModelInputs
        } else {
            TopicKind::Other
        }
    }
}

/// The specification of a single pipeline step, wired by one chainer.
///
/// Instances are only created through `PipelineStepSpec::new` or the builder, both of which
/// validate the spec, and are never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineStepSpec {
    pipeline_name: String,
    input_topic: TopicName,
    output_topic: TopicName,
    tensors: Option<BTreeSet<TensorName>>,
    tensor_renaming: BTreeMap<TensorName, TensorName>,
    trigger_topics: BTreeSet<TopicName>,
    trigger_tensors: Option<BTreeMap<TopicName, BTreeSet<TensorName>>>,
    join_type: JoinType,
}

impl PipelineStepSpec {
    /// Create a new validated instance.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline_name: impl Into<String>, input_topic: impl Into<TopicName>, output_topic: impl Into<TopicName>, tensors: Option<BTreeSet<TensorName>>,
        tensor_renaming: BTreeMap<TensorName, TensorName>, trigger_topics: BTreeSet<TopicName>, trigger_tensors: Option<BTreeMap<TopicName, BTreeSet<TensorName>>>,
        join_type: JoinType,
    ) -> Result<Self> {
        let spec = Self {
            pipeline_name: pipeline_name.into(),
            input_topic: input_topic.into(),
            output_topic: output_topic.into(),
            tensors,
            tensor_renaming,
            trigger_topics,
            trigger_tensors,
            join_type,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Start building a new instance.
    pub fn builder(pipeline_name: impl Into<String>, input_topic: impl Into<TopicName>, output_topic: impl Into<TopicName>) -> PipelineStepSpecBuilder {
        PipelineStepSpecBuilder {
            pipeline_name: pipeline_name.into(),
            input_topic: input_topic.into(),
            output_topic: output_topic.into(),
            tensors: None,
            tensor_renaming: BTreeMap::new(),
            trigger_topics: BTreeSet::new(),
            trigger_tensors: None,
            join_type: JoinType::default(),
        }
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn input_topic(&self) -> &str {
        &self.input_topic
    }

    pub fn output_topic(&self) -> &str {
        &self.output_topic
    }

    /// The tensor allow-list of this step, `None` meaning all tensors.
    pub fn tensors(&self) -> Option<&BTreeSet<TensorName>> {
        self.tensors.as_ref()
    }

    pub fn tensor_renaming(&self) -> &BTreeMap<TensorName, TensorName> {
        &self.tensor_renaming
    }

    pub fn trigger_topics(&self) -> &BTreeSet<TopicName> {
        &self.trigger_topics
    }

    /// The per trigger topic tensor subsets of this step, if any.
    pub fn trigger_tensors(&self) -> Option<&BTreeMap<TopicName, BTreeSet<TensorName>>> {
        self.trigger_tensors.as_ref()
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    /// Check if this step bridges a model's raw outputs to another model's raw inputs.
    ///
    /// This is decided purely by topic naming: the input topic must end with `outputs` and the
    /// output topic must end with `inputs`.
    pub fn bridges_model_output_to_input(&self) -> bool {
        TopicKind::of(&self.input_topic) == TopicKind::ModelOutputs && self.output_topic.ends_with(TOPIC_SUFFIX_INPUTS)
    }

    /// The application ID of the streaming engine serving this step for the given client.
    ///
    /// The ID is used as the name of the engine's local state directory.
    pub fn application_id(&self, client_id: &str) -> String {
        utils::sanitize_path_segment(&format!("{}.{}.{}.{}", client_id, self.pipeline_name, self.input_topic, self.output_topic))
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline_name.is_empty() {
            bail!(AppError::InvalidInput("pipeline name may not be empty".into()));
        }
        if self.input_topic.is_empty() || self.output_topic.is_empty() {
            bail!(AppError::InvalidInput("input and output topics may not be empty".into()));
        }
        if self.input_topic == self.output_topic {
            bail!(AppError::InvalidInput(format!("input and output topics must differ, both are '{}'", self.input_topic)));
        }
        if let Some((from, to)) = self.tensor_renaming.iter().find(|(from, to)| from.is_empty() || to.is_empty()) {
            bail!(AppError::InvalidInput(format!("tensor renaming may not contain empty names, found '{}' -> '{}'", from, to)));
        }
        if let Some(topic) = self.trigger_topics.iter().find(|topic| topic.is_empty()) {
            bail!(AppError::InvalidInput(format!("trigger topics may not be empty, found '{}'", topic)));
        }
        if self.trigger_topics.contains(&self.output_topic) {
            bail!(AppError::InvalidInput(format!("output topic '{}' may not also be a trigger topic", self.output_topic)));
        }
        if let Some(trigger_tensors) = &self.trigger_tensors {
            if let Some(topic) = trigger_tensors.keys().find(|topic| !self.trigger_topics.contains(*topic)) {
                bail!(AppError::InvalidInput(format!("trigger tensors reference topic '{}' which is not a trigger topic", topic)));
            }
        }
        Ok(())
    }
}

/// A builder of validated `PipelineStepSpec` instances.
#[derive(Clone, Debug)]
pub struct PipelineStepSpecBuilder {
    pipeline_name: String,
    input_topic: TopicName,
    output_topic: TopicName,
    tensors: Option<BTreeSet<TensorName>>,
    tensor_renaming: BTreeMap<TensorName, TensorName>,
    trigger_topics: BTreeSet<TopicName>,
    trigger_tensors: Option<BTreeMap<TopicName, BTreeSet<TensorName>>>,
    join_type: JoinType,
}

impl PipelineStepSpecBuilder {
    /// Restrict the step to the given tensors.
    pub fn tensors<I: IntoIterator<Item = T>, T: Into<TensorName>>(mut self, tensors: I) -> Self {
        self.tensors = Some(tensors.into_iter().map(Into::into).collect());
        self
    }

    pub fn tensor_renaming(mut self, tensor_renaming: BTreeMap<TensorName, TensorName>) -> Self {
        self.tensor_renaming = tensor_renaming;
        self
    }

    /// Rename a single tensor.
    pub fn rename(mut self, from: impl Into<TensorName>, to: impl Into<TensorName>) -> Self {
        self.tensor_renaming.insert(from.into(), to.into());
        self
    }

    pub fn trigger_topics<I: IntoIterator<Item = T>, T: Into<TopicName>>(mut self, topics: I) -> Self {
        self.trigger_topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn trigger_tensors(mut self, trigger_tensors: BTreeMap<TopicName, BTreeSet<TensorName>>) -> Self {
        self.trigger_tensors = Some(trigger_tensors);
        self
    }

    /// Restrict the qualifying records of a single trigger topic to the given tensors.
    pub fn trigger_topic_tensors<I: IntoIterator<Item = T>, T: Into<TensorName>>(mut self, topic: impl Into<TopicName>, tensors: I) -> Self {
        self.trigger_tensors
            .get_or_insert_with(BTreeMap::new)
            .insert(topic.into(), tensors.into_iter().map(Into::into).collect());
        self
    }

    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    /// Validate and build the spec.
    pub fn build(self) -> Result<PipelineStepSpec> {
        PipelineStepSpec::new(
            self.pipeline_name,
            self.input_topic,
            self.output_topic,
            self.tensors,
            self.tensor_renaming,
            self.trigger_topics,
            self.trigger_tensors,
            self.join_type,
        )
    }
}
