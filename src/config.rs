//! Runtime configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::{DeserializeOwned, Error as DeError};
use serde::{Deserialize, Deserializer};

use crate::models::step::{JoinType, PipelineStepSpec, TensorName, TopicName};

/// The default join window, five minutes.
const DEFAULT_JOIN_WINDOW_MS: u64 = 5 * 60 * 1000;
const DEFAULT_JOIN_MAX_PENDING: usize = 10_000;
const DEFAULT_MAX_BATCH_SIZE: u32 = 500;
const DEFAULT_METRICS_PORT: u16 = 7002;
/// The environment variable prefix used for the step served by the chainer binary.
pub const STEP_ENV_PREFIX: &str = "STEP_";

/// Runtime configuration data, shared by all chainers of a process.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    #[serde(default = "Config::default_rust_log")]
    pub rust_log: String,
    /// The client ID of this process, used as the prefix of every streaming engine's application ID.
    ///
    /// The application ID also carries the step identity, so the default is a constant which keeps
    /// engine state directories stable across restarts.
    #[serde(default = "Config::default_client_id")]
    pub client_id: String,
    /// The directory under which each streaming engine keeps its local state.
    #[serde(default = "crate::database::default_state_dir")]
    pub state_dir: String,
    /// The path to the local broker's data on disk.
    #[serde(default = "crate::database::default_broker_data_path")]
    pub broker_data_path: String,
    /// Purge any local engine state before a chainer is first started.
    #[serde(default)]
    pub use_clean_state: bool,
    /// The maximum amount of time a chainer start will wait for its engine to run.
    ///
    /// When unset, starting a chainer waits indefinitely.
    #[serde(default)]
    pub start_timeout_ms: Option<u64>,
    /// How long a main record may wait for its trigger condition, in record time.
    #[serde(default = "Config::default_join_window_ms")]
    pub join_window_ms: u64,
    /// The maximum number of main records which may wait for their trigger condition.
    #[serde(default = "Config::default_join_max_pending")]
    pub join_max_pending: usize,
    /// The maximum number of records fetched from a topic per batch.
    #[serde(default = "Config::default_max_batch_size")]
    pub max_batch_size: u32,
    /// Where to begin consuming topics which have no committed offset.
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,
    /// The port on which the metrics server listens.
    #[serde(default = "Config::default_metrics_port")]
    pub metrics_port: u16,
}

/// The starting point used for topics without a committed offset.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from the first record of the topic.
    Earliest,
    /// Start from the next record written to the topic.
    Latest,
}

impl Default for OffsetReset {
    fn default() -> Self {
        OffsetReset::Latest
    }
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routine just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        Ok(config)
    }

    /// The start timeout, if one is configured.
    pub fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout_ms.map(Duration::from_millis)
    }

    /// The local state directory of the engine with the given application ID.
    pub fn engine_state_dir(&self, application_id: &str) -> PathBuf {
        PathBuf::from(&self.state_dir).join(application_id)
    }

    /// The path of the local broker's data.
    pub fn broker_data_path(&self) -> PathBuf {
        PathBuf::from(&self.broker_data_path)
    }

    fn default_rust_log() -> String {
        "info".into()
    }

    fn default_client_id() -> String {
        "chainer".into()
    }

    fn default_join_window_ms() -> u64 {
        DEFAULT_JOIN_WINDOW_MS
    }

    fn default_join_max_pending() -> usize {
        DEFAULT_JOIN_MAX_PENDING
    }

    fn default_max_batch_size() -> u32 {
        DEFAULT_MAX_BATCH_SIZE
    }

    fn default_metrics_port() -> u16 {
        DEFAULT_METRICS_PORT
    }

    /// Build a config for tests, rooted in a new temporary directory.
    #[cfg(test)]
    pub fn new_test() -> Result<(std::sync::Arc<Self>, tempfile::TempDir)> {
        let tmpdir = tempfile::tempdir_in("/tmp").context("error creating tmp dir in /tmp")?;
        let config = Self {
            rust_log: "".into(),
            client_id: "chainer-test".into(),
            state_dir: tmpdir.path().join("state").to_string_lossy().to_string(),
            broker_data_path: tmpdir.path().join("broker").to_string_lossy().to_string(),
            use_clean_state: false,
            start_timeout_ms: None,
            join_window_ms: DEFAULT_JOIN_WINDOW_MS,
            join_max_pending: DEFAULT_JOIN_MAX_PENDING,
            max_batch_size: 10,
            auto_offset_reset: OffsetReset::Earliest,
            metrics_port: DEFAULT_METRICS_PORT,
        };
        Ok((std::sync::Arc::new(config), tmpdir))
    }
}

/// The configuration of the single pipeline step served by the chainer binary.
///
/// All fields are read from the environment with the `STEP_` prefix.
#[derive(Clone, Debug, Deserialize)]
pub struct StepConfig {
    pub pipeline_name: String,
    pub input_topic: TopicName,
    pub output_topic: TopicName,
    /// A comma-separated tensor allow-list; absent means all tensors.
    #[serde(default)]
    pub tensors: Option<Vec<TensorName>>,
    /// A JSON object mapping tensor names to their new names.
    #[serde(default, deserialize_with = "parse_json")]
    pub tensor_renaming: BTreeMap<TensorName, TensorName>,
    /// A comma-separated list of trigger topics.
    #[serde(default)]
    pub trigger_topics: Vec<TopicName>,
    /// A JSON object mapping trigger topics to lists of tensor names.
    #[serde(default, deserialize_with = "parse_json")]
    pub trigger_tensors: Option<BTreeMap<TopicName, BTreeSet<TensorName>>>,
    #[serde(default)]
    pub join_type: JoinType,
}

impl StepConfig {
    /// Read the step config from the runtime environment.
    pub fn new() -> Result<Self> {
        envy::prefixed(STEP_ENV_PREFIX)
            .from_env()
            .context("error building step config from env")
    }

    /// Validate this config, building the step spec which it describes.
    pub fn into_spec(self) -> Result<PipelineStepSpec> {
        // An empty env var is parsed as a list holding one empty string.
        let non_empty = |items: Vec<String>| items.into_iter().filter(|item| !item.is_empty()).collect::<Vec<_>>();
        let mut builder = PipelineStepSpec::builder(self.pipeline_name, self.input_topic, self.output_topic)
            .tensor_renaming(self.tensor_renaming)
            .trigger_topics(non_empty(self.trigger_topics))
            .join_type(self.join_type);
        if let Some(tensors) = self.tensors.map(non_empty).filter(|tensors| !tensors.is_empty()) {
            builder = builder.tensors(tensors);
        }
        if let Some(trigger_tensors) = self.trigger_tensors {
            builder = builder.trigger_tensors(trigger_tensors);
        }
        builder.build()
    }
}

/// Parse a JSON encoded env var value.
fn parse_json<'de, D: Deserializer<'de>, T: DeserializeOwned>(val: D) -> Result<T, D::Error> {
    let raw: String = Deserialize::deserialize(val)?;
    serde_json::from_str(&raw).map_err(|err| DeError::custom(err.to_string()))
}
