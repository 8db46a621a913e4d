use std::collections::HashMap;

use crate::models::proto::record::StoredRecord;

/// The record header carrying the identity of the pipeline a record belongs to.
pub const HEADER_PIPELINE: &str = "pipeline";

/// A record flowing through a broker topic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferenceRecord {
    /// The key of the record, typically the inference request ID.
    pub key: String,
    /// The string headers of the record.
    pub headers: HashMap<String, String>,
    /// The opaque payload of the record.
    pub payload: Vec<u8>,
    /// The timestamp of the record, in milliseconds since the unix epoch.
    pub timestamp: i64,
}

impl InferenceRecord {
    /// Create a new record tagged with the given pipeline identity.
    pub fn new(key: impl Into<String>, pipeline: impl Into<String>, payload: Vec<u8>, timestamp: i64) -> Self {
        let mut headers = HashMap::with_capacity(1);
        headers.insert(HEADER_PIPELINE.to_string(), pipeline.into());
        Self { key: key.into(), headers, payload, timestamp }
    }

    /// The pipeline identity of this record, if tagged.
    pub fn pipeline(&self) -> Option<&str> {
        self.headers.get(HEADER_PIPELINE).map(String::as_str)
    }

    /// Build a new record with the same key, headers & timestamp but a different payload.
    pub fn with_payload(&self, payload: Vec<u8>) -> Self {
        Self {
            key: self.key.clone(),
            headers: self.headers.clone(),
            payload,
            timestamp: self.timestamp,
        }
    }
}

impl From<StoredRecord> for InferenceRecord {
    fn from(record: StoredRecord) -> Self {
        Self {
            key: record.key,
            headers: record.headers,
            payload: record.payload,
            timestamp: record.timestamp,
        }
    }
}

impl From<InferenceRecord> for StoredRecord {
    fn from(record: InferenceRecord) -> Self {
        Self {
            key: record.key,
            headers: record.headers,
            payload: record.payload,
            timestamp: record.timestamp,
        }
    }
}
