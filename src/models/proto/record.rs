/// A record as stored in a broker topic log.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoredRecord {
    /// The key of the record.
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    /// The string headers of the record.
    #[prost(map = "string, string", tag = "2")]
    pub headers: ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
    /// The opaque payload of the record.
    #[prost(bytes = "vec", tag = "3")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    /// The timestamp of the record, in milliseconds since the unix epoch.
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
}
