//! KServe-v2 inference protocol types.
//!
//! Clients send these to the gateway and the remote executor sends them to
//! upstream inference servers, so both sides share one definition.
//!
//! ```json
//! POST /v2/models/{model}/infer
//! {"id": "42", "inputs": [{"name": "INPUT__0", "shape": [1, 1], "datatype": "FP32", "data": [3.5]}]}
//! ```

use serde::{Deserialize, Serialize};

use crate::Tensor;

/// Body of an inference call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferRequest {
    /// Optional caller-chosen id, echoed in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub inputs: Vec<Tensor>,
}

/// Successful inference result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferResponse {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub outputs: Vec<Tensor>,
}

/// Error body returned by KServe-v2 servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
