use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> RpcNotification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reply to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcReply {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcReply {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(RpcErrorObject {
                code: METHOD_NOT_FOUND,
                message: format!("client does not implement method '{method}'"),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has neither a method nor a result/error")]
    Unclassifiable,
    #[error("response id must be an integer, got {0}")]
    UnsupportedId(Value),
}

/// A decoded line from the provider's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response {
        id: u64,
        outcome: Result<Value, RpcErrorObject>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
}

impl IncomingMessage {
    pub fn parse(line: &str) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_value(value)
    }

    pub fn from_value(mut value: Value) -> Result<Self, RpcError> {
        let object = value.as_object_mut().ok_or(RpcError::NotAnObject)?;
        let method = object
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let params = object.remove("params");
        let id = object.remove("id").filter(|id| !id.is_null());

        match (id, method) {
            (Some(id), Some(method)) => Ok(IncomingMessage::Request { id, method, params }),
            (None, Some(method)) => Ok(IncomingMessage::Notification { method, params }),
            (Some(id), None) => {
                let numeric = match &id {
                    Value::Number(number) => number.as_u64(),
                    Value::String(text) => text.parse::<u64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| RpcError::UnsupportedId(id.clone()))?;
                let outcome = if let Some(error) = object.remove("error") {
                    let error = serde_json::from_value::<RpcErrorObject>(error).unwrap_or_else(
                        |_| RpcErrorObject {
                            code: -32000,
                            message: "malformed error object".into(),
                            data: None,
                        },
                    );
                    Err(error)
                } else if let Some(result) = object.remove("result") {
                    Ok(result)
                } else {
                    return Err(RpcError::Unclassifiable);
                };
                Ok(IncomingMessage::Response {
                    id: numeric,
                    outcome,
                })
            }
            (None, None) => Err(RpcError::Unclassifiable),
        }
    }
}

/// Parameters for the `initialize` handshake.
pub fn initialize_params(protocol_version: &str, client_name: &str, client_version: &str) -> Value {
    json!({
        "protocolVersion": protocol_version,
        "capabilities": {},
        "clientInfo": {
            "name": client_name,
            "version": client_version,
        }
    })
}
