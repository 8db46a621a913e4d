use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};

use crate::codec::{self, CodecAdapter};
use crate::fixtures;
use crate::models::proto::inference::{infer_parameter::ParameterChoice, InferParameter, ModelInferRequest};
use crate::utils;

fn adapter(tensors: Option<&[&str]>, renames: &[(&str, &str)]) -> CodecAdapter {
    CodecAdapter::new(
        tensors.map(|names| names.iter().map(|name| name.to_string()).collect::<BTreeSet<_>>()),
        renames.iter().map(|(from, to)| (from.to_string(), to.to_string())).collect::<BTreeMap<_, _>>(),
    )
}

#[test]
fn apply_selects_and_renames_tensors() -> Result<()> {
    let adapter = adapter(Some(&["t1"]), &[("t1", "t1_renamed")]);
    let record = fixtures::record("p1", fixtures::response_payload("req-1", &["t1", "t2"])?);

    let output = adapter.apply(&record)?.context("expected a converted record")?;

    let request: ModelInferRequest = utils::decode_model(&output.payload)?;
    let names: Vec<_> = request.inputs.iter().map(|input| input.name.as_str()).collect();
    assert_eq!(names, vec!["t1_renamed"], "expected only the renamed tensor, got {:?}", names);
    assert_eq!(request.id, "req-1", "expected request id to be carried over, got {}", request.id);
    assert_eq!(request.inputs[0].shape, vec![1, 2], "expected shape to be copied, got {:?}", request.inputs[0].shape);
    assert_eq!(request.inputs[0].datatype, "FP32", "expected datatype to be copied, got {}", request.inputs[0].datatype);
    assert_eq!(output.key, record.key, "expected record key to be kept, got {}", output.key);
    assert_eq!(output.pipeline(), Some("p1"), "expected pipeline header to be kept, got {:?}", output.pipeline());
    Ok(())
}

#[test]
fn apply_without_allow_list_keeps_all_tensors() -> Result<()> {
    let adapter = adapter(None, &[("t2", "t2_renamed")]);
    let record = fixtures::record("p1", fixtures::response_payload("req-1", &["t1", "t2"])?);

    let output = adapter.apply(&record)?.context("expected a converted record")?;

    let request: ModelInferRequest = utils::decode_model(&output.payload)?;
    let names: Vec<_> = request.inputs.iter().map(|input| input.name.as_str()).collect();
    assert_eq!(names, vec!["t1", "t2_renamed"], "expected all tensors with renames applied, got {:?}", names);
    Ok(())
}

#[test]
fn apply_drops_records_without_selected_tensors() -> Result<()> {
    let adapter = adapter(Some(&["t3"]), &[]);
    let record = fixtures::record("p1", fixtures::response_payload("req-1", &["t1", "t2"])?);

    let output = adapter.apply(&record)?;

    assert!(output.is_none(), "expected record to be dropped, got {:?}", output);
    Ok(())
}

#[test]
fn apply_rejects_malformed_payloads() {
    let adapter = adapter(None, &[]);
    let record = fixtures::record("p1", vec![0xff; 11]);

    let res = adapter.apply(&record);

    assert!(res.is_err(), "expected malformed payload to be rejected, got {:?}", res);
}

#[test]
fn convert_carries_raw_contents_and_parameters() -> Result<()> {
    let adapter = adapter(Some(&["t2"]), &[]);
    let mut response = fixtures::response("req-1", &["t1", "t2", "t3"]);
    for output in response.outputs.iter_mut() {
        output.contents = None;
    }
    response.raw_output_contents = vec![b"raw-1".to_vec(), b"raw-2".to_vec(), b"raw-3".to_vec()];
    response.parameters.insert(
        "content_type".into(),
        InferParameter { parameter_choice: Some(ParameterChoice::StringParam("np".into())) },
    );

    let request = adapter.convert(response)?;

    assert_eq!(request.inputs.len(), 1, "expected 1 input, got {}", request.inputs.len());
    assert_eq!(request.raw_input_contents, vec![b"raw-2".to_vec()], "expected the raw contents of t2, got {:?}", request.raw_input_contents);
    assert!(request.parameters.contains_key("content_type"), "expected parameters to be copied, got {:?}", request.parameters);
    Ok(())
}

#[test]
fn apply_rejects_misaligned_raw_contents() -> Result<()> {
    let adapter = adapter(None, &[]);
    let mut response = fixtures::response("req-1", &["t1", "t2"]);
    response.raw_output_contents = vec![b"raw-1".to_vec()];
    let record = fixtures::record("p1", utils::encode_model(&response)?);

    let res = adapter.apply(&record);

    assert!(res.is_err(), "expected misaligned raw contents to be rejected, got {:?}", res);
    Ok(())
}

#[test]
fn tensor_names_decode_by_topic_kind() -> Result<()> {
    let names = codec::tensor_names("seldon.default.model.m1.outputs", &fixtures::response_payload("req-1", &["ready"])?)?;
    assert_eq!(names, vec!["ready"], "expected response tensor names, got {:?}", names);

    let names = codec::tensor_names("seldon.default.model.m2.inputs", &fixtures::request_payload("req-1", &["a", "b"])?)?;
    assert_eq!(names, vec!["a", "b"], "expected request tensor names, got {:?}", names);

    let res = codec::tensor_names("seldon.default.model.m1.outputs", &[0xff; 11]);
    assert!(res.is_err(), "expected undecodable payload to be rejected, got {:?}", res);
    Ok(())
}
