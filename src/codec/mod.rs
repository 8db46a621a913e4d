//! Payload codec adapter.
//!
//! Bridges the raw outputs of one model to the raw inputs of another: the payload of a record
//! on a model outputs topic is a `ModelInferResponse`, which is converted into a
//! `ModelInferRequest` holding only the selected tensors under their new names.

#[cfg(test)]
mod mod_test;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Context, Result};

use crate::models::proto::inference::{model_infer_request::InferInputTensor, ModelInferRequest, ModelInferResponse};
use crate::models::record::InferenceRecord;
use crate::models::step::{PipelineStepSpec, TensorName, TopicKind};
use crate::utils;

/// A converter of model responses into model requests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodecAdapter {
    /// The tensors to retain, `None` meaning all tensors.
    tensors: Option<BTreeSet<TensorName>>,
    /// Renames applied to retained tensors.
    renaming: BTreeMap<TensorName, TensorName>,
}

impl CodecAdapter {
    /// Create a new instance.
    pub fn new(tensors: Option<BTreeSet<TensorName>>, renaming: BTreeMap<TensorName, TensorName>) -> Self {
        Self { tensors, renaming }
    }

    /// Create a new instance configured by the given step.
    pub fn from_spec(spec: &PipelineStepSpec) -> Self {
        Self::new(spec.tensors().cloned(), spec.tensor_renaming().clone())
    }

    /// Convert the payload of the given record.
    ///
    /// Returns `Ok(None)` when no tensor survives the selection, and an error when the payload
    /// can not be decoded as a model response or can not be converted.
    pub fn apply(&self, record: &InferenceRecord) -> Result<Option<InferenceRecord>> {
        let response: ModelInferResponse = utils::decode_model(&record.payload).context("error decoding model response payload")?;
        let request = self.convert(response)?;
        if request.inputs.is_empty() {
            return Ok(None);
        }
        let payload = utils::encode_model(&request).context("error encoding model request payload")?;
        Ok(Some(record.with_payload(payload)))
    }

    /// Convert the given response into a request holding the selected & renamed tensors.
    ///
    /// Raw contents are positional, so a response carrying raw contents must carry one entry per
    /// output tensor.
    pub fn convert(&self, response: ModelInferResponse) -> Result<ModelInferRequest> {
        let use_raw = !response.raw_output_contents.is_empty();
        if use_raw && response.raw_output_contents.len() != response.outputs.len() {
            bail!(
                "model response {} carries {} raw contents for {} outputs",
                response.id,
                response.raw_output_contents.len(),
                response.outputs.len()
            );
        }
        let mut raw_contents = response.raw_output_contents.into_iter();

        let mut inputs = Vec::with_capacity(response.outputs.len());
        let mut raw_input_contents = Vec::new();
        for output in response.outputs {
            let raw = if use_raw { raw_contents.next() } else { None };
            if !self.is_selected(&output.name) {
                continue;
            }
            inputs.push(InferInputTensor {
                name: self.rename(&output.name),
                datatype: output.datatype,
                shape: output.shape,
                parameters: output.parameters,
                contents: output.contents,
            });
            if let Some(raw) = raw {
                raw_input_contents.push(raw);
            }
        }

        Ok(ModelInferRequest {
            model_name: String::new(),
            model_version: String::new(),
            id: response.id,
            parameters: response.parameters,
            inputs,
            outputs: vec![],
            raw_input_contents,
        })
    }

    fn is_selected(&self, name: &str) -> bool {
        self.tensors.as_ref().map(|tensors| tensors.contains(name)).unwrap_or(true)
    }

    fn rename(&self, name: &str) -> TensorName {
        self.renaming.get(name).cloned().unwrap_or_else(|| name.to_string())
    }
}

/// Decode the names of the tensors carried by a record payload of the given topic.
///
/// Payloads of model inputs topics are decoded as requests, all others as responses.
pub fn tensor_names(topic: &str, payload: &[u8]) -> Result<Vec<TensorName>> {
    match TopicKind::of(topic) {
        TopicKind::ModelInputs => {
            let request: ModelInferRequest = utils::decode_model(payload).context("error decoding model request payload")?;
            Ok(request.inputs.into_iter().map(|input| input.name).collect())
        }
        TopicKind::ModelOutputs | TopicKind::Other => {
            let response: ModelInferResponse = utils::decode_model(payload).context("error decoding model response payload")?;
            Ok(response.outputs.into_iter().map(|output| output.name).collect())
        }
    }
}
