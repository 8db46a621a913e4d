/// An inference parameter value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferParameter {
    /// The parameter value can be a string, an int64, a boolean or a message specific to a
    /// predefined parameter.
    #[prost(oneof = "infer_parameter::ParameterChoice", tags = "1, 2, 3")]
    pub parameter_choice: ::core::option::Option<infer_parameter::ParameterChoice>,
}
/// Nested message and enum types in `InferParameter`.
pub mod infer_parameter {
    /// The parameter value can be a string, an int64, a boolean or a message specific to a
    /// predefined parameter.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum ParameterChoice {
        /// A boolean parameter value.
        #[prost(bool, tag = "1")]
        BoolParam(bool),
        /// An int64 parameter value.
        #[prost(int64, tag = "2")]
        Int64Param(i64),
        /// A string parameter value.
        #[prost(string, tag = "3")]
        StringParam(::prost::alloc::string::String),
    }
}
/// The data contained in a tensor represented by the repeated type that matches the tensor's
/// data type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferTensorContents {
    /// Representation for BOOL data type.
    #[prost(bool, repeated, tag = "1")]
    pub bool_contents: ::prost::alloc::vec::Vec<bool>,
    /// Representation for INT8, INT16, and INT32 data types.
    #[prost(int32, repeated, tag = "2")]
    pub int_contents: ::prost::alloc::vec::Vec<i32>,
    /// Representation for INT64 data types.
    #[prost(int64, repeated, tag = "3")]
    pub int64_contents: ::prost::alloc::vec::Vec<i64>,
    /// Representation for UINT8, UINT16, and UINT32 data types.
    #[prost(uint32, repeated, tag = "4")]
    pub uint_contents: ::prost::alloc::vec::Vec<u32>,
    /// Representation for UINT64 data types.
    #[prost(uint64, repeated, tag = "5")]
    pub uint64_contents: ::prost::alloc::vec::Vec<u64>,
    /// Representation for FP32 data type.
    #[prost(float, repeated, tag = "6")]
    pub fp32_contents: ::prost::alloc::vec::Vec<f32>,
    /// Representation for FP64 data type.
    #[prost(double, repeated, tag = "7")]
    pub fp64_contents: ::prost::alloc::vec::Vec<f64>,
    /// Representation for BYTES data type.
    #[prost(bytes = "vec", repeated, tag = "8")]
    pub bytes_contents: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}
/// A request to run inference against a model.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelInferRequest {
    /// The name of the model to use for inferencing.
    #[prost(string, tag = "1")]
    pub model_name: ::prost::alloc::string::String,
    /// The version of the model to use for inference. If not given the server will choose a
    /// version based on the model and internal policy.
    #[prost(string, tag = "2")]
    pub model_version: ::prost::alloc::string::String,
    /// Optional identifier for the request. If specified will be returned in the response.
    #[prost(string, tag = "3")]
    pub id: ::prost::alloc::string::String,
    /// Optional inference parameters.
    #[prost(map = "string, message", tag = "4")]
    pub parameters: ::std::collections::HashMap<::prost::alloc::string::String, InferParameter>,
    /// The input tensors for the inference.
    #[prost(message, repeated, tag = "5")]
    pub inputs: ::prost::alloc::vec::Vec<model_infer_request::InferInputTensor>,
    /// The requested output tensors for the inference. Optional, if not specified all outputs
    /// produced by the model will be returned.
    #[prost(message, repeated, tag = "6")]
    pub outputs: ::prost::alloc::vec::Vec<model_infer_request::InferRequestedOutputTensor>,
    /// The data contained in an input tensor can be represented in "raw" bytes form or in the
    /// repeated type that matches the tensor's data type. When raw form is used, each entry
    /// holds the raw contents of the input tensor at the same index of `inputs`.
    #[prost(bytes = "vec", repeated, tag = "7")]
    pub raw_input_contents: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}
/// Nested message and enum types in `ModelInferRequest`.
pub mod model_infer_request {
    /// An input tensor for an inference request.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InferInputTensor {
        /// The tensor name.
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
        /// The tensor data type.
        #[prost(string, tag = "2")]
        pub datatype: ::prost::alloc::string::String,
        /// The tensor shape.
        #[prost(int64, repeated, tag = "3")]
        pub shape: ::prost::alloc::vec::Vec<i64>,
        /// Optional inference input tensor parameters.
        #[prost(map = "string, message", tag = "4")]
        pub parameters: ::std::collections::HashMap<::prost::alloc::string::String, super::InferParameter>,
        /// The tensor contents using a data-type format. This field must not be specified if
        /// "raw" tensor contents are being used for the inference request.
        #[prost(message, optional, tag = "5")]
        pub contents: ::core::option::Option<super::InferTensorContents>,
    }
    /// An output tensor requested for an inference request.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InferRequestedOutputTensor {
        /// The tensor name.
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
        /// Optional requested output tensor parameters.
        #[prost(map = "string, message", tag = "2")]
        pub parameters: ::std::collections::HashMap<::prost::alloc::string::String, super::InferParameter>,
    }
}
/// The response of a model inference.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelInferResponse {
    /// The name of the model used for inference.
    #[prost(string, tag = "1")]
    pub model_name: ::prost::alloc::string::String,
    /// The version of the model used for inference.
    #[prost(string, tag = "2")]
    pub model_version: ::prost::alloc::string::String,
    /// The id of the inference request if one was specified.
    #[prost(string, tag = "3")]
    pub id: ::prost::alloc::string::String,
    /// Optional inference response parameters.
    #[prost(map = "string, message", tag = "4")]
    pub parameters: ::std::collections::HashMap<::prost::alloc::string::String, InferParameter>,
    /// The output tensors holding inference results.
    #[prost(message, repeated, tag = "5")]
    pub outputs: ::prost::alloc::vec::Vec<model_infer_response::InferOutputTensor>,
    /// The data contained in an output tensor can be represented in "raw" bytes form or in the
    /// repeated type that matches the tensor's data type. When raw form is used, each entry
    /// holds the raw contents of the output tensor at the same index of `outputs`.
    #[prost(bytes = "vec", repeated, tag = "6")]
    pub raw_output_contents: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}
/// Nested message and enum types in `ModelInferResponse`.
pub mod model_infer_response {
    /// An output tensor returned for an inference request.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InferOutputTensor {
        /// The tensor name.
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
        /// The tensor data type.
        #[prost(string, tag = "2")]
        pub datatype: ::prost::alloc::string::String,
        /// The tensor shape.
        #[prost(int64, repeated, tag = "3")]
        pub shape: ::prost::alloc::vec::Vec<i64>,
        /// Optional output tensor parameters.
        #[prost(map = "string, message", tag = "4")]
        pub parameters: ::std::collections::HashMap<::prost::alloc::string::String, super::InferParameter>,
        /// The tensor contents using a data-type format. This field must not be specified if
        /// "raw" tensor contents are being used for the inference response.
        #[prost(message, optional, tag = "5")]
        pub contents: ::core::option::Option<super::InferTensorContents>,
    }
}
