//! JSON-RPC envelopes and error mapping.

use koorde_common::DhtError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for JSON-RPC method failures. The DHT error taxonomy maps
/// onto a small closed set of codes so clients can categorize outcomes.
#[derive(Debug, thiserror::Error)]
pub enum RpcErr {
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    BadParams(String),
    #[error("Missing parameter: {0}")]
    MissingParam(String),
    #[error("Not found")]
    NotFound,
    #[error("Deadline exceeded")]
    Timeout,
    #[error("Peer unavailable: {0}")]
    Unavailable(String),
    #[error("Internal Error: {0}")]
    Internal(String),
}

impl From<DhtError> for RpcErr {
    fn from(err: DhtError) -> Self {
        match err {
            DhtError::InvalidArgument(msg) => RpcErr::BadParams(msg),
            DhtError::NotFound => RpcErr::NotFound,
            DhtError::Timeout | DhtError::Canceled => RpcErr::Timeout,
            DhtError::Unavailable(msg) | DhtError::NotInPool(msg) => RpcErr::Unavailable(msg),
            DhtError::Internal(msg) => RpcErr::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for RpcErr {
    fn from(error: serde_json::Error) -> Self {
        Self::BadParams(error.to_string())
    }
}

impl From<RpcErr> for RpcErrorMetadata {
    fn from(value: RpcErr) -> Self {
        match value {
            RpcErr::MethodNotFound(method) => RpcErrorMetadata {
                code: -32601,
                data: None,
                message: format!("Method not found: {method}"),
            },
            RpcErr::BadParams(context) => RpcErrorMetadata {
                code: -32602,
                data: None,
                message: format!("Invalid params: {context}"),
            },
            RpcErr::MissingParam(name) => RpcErrorMetadata {
                code: -32602,
                data: None,
                message: format!("Expected parameter: {name} is missing"),
            },
            RpcErr::NotFound => RpcErrorMetadata {
                code: -32001,
                data: None,
                message: "Not found".to_string(),
            },
            RpcErr::Timeout => RpcErrorMetadata {
                code: -32002,
                data: None,
                message: "Deadline exceeded".to_string(),
            },
            RpcErr::Unavailable(context) => RpcErrorMetadata {
                code: -32003,
                data: None,
                message: format!("Peer unavailable: {context}"),
            },
            RpcErr::Internal(context) => RpcErrorMetadata {
                code: -32603,
                data: None,
                message: format!("Internal Error: {context}"),
            },
        }
    }
}

/// JSON-RPC method namespace, resolved from the `<namespace>_<method>`
/// prefix.
pub enum RpcNamespace {
    Dht,
    Admin,
}

/// Per the JSON-RPC 2.0 spec, request ids are numbers or strings and are
/// echoed back in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcRequestId {
    Number(u64),
    String(String),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcRequest {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Vec<Value>>,
}

impl RpcRequest {
    pub fn namespace(&self) -> Result<RpcNamespace, RpcErr> {
        match self.method.split('_').next() {
            Some("dht") => Ok(RpcNamespace::Dht),
            Some("admin") => Ok(RpcNamespace::Admin),
            _ => Err(RpcErr::MethodNotFound(self.method.clone())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcErrorMetadata {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcSuccessResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub result: Value,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcErrorResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub error: RpcErrorMetadata,
}

/// Builds the JSON response for one request outcome.
pub fn rpc_response<E>(id: RpcRequestId, result: Result<Value, E>) -> Value
where
    E: Into<RpcErrorMetadata>,
{
    match result {
        Ok(result) => serde_json::json!(RpcSuccessResponse {
            id,
            jsonrpc: "2.0".to_string(),
            result,
        }),
        Err(error) => serde_json::json!(RpcErrorResponse {
            id,
            jsonrpc: "2.0".to_string(),
            error: error.into(),
        }),
    }
}
