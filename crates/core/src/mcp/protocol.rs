//! JSON-RPC 2.0 framing and the MCP payloads used by the client.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::tool::ToolDescriptor;
use crate::transport::TransportError;

pub const JSONRPC_VERSION: &str = "2.0";
/// The MCP revision offered during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize)]
pub struct Request<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> Request<'a> {
    #[inline]
    pub fn new(id: i64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Notification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> Notification<'a> {
    #[inline]
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

pub const METHOD_NOT_FOUND: i64 = -32601;

/// Our answer to a request initiated by the server.
#[derive(Debug, Serialize)]
pub struct Response<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl<'a> Response<'a> {
    /// Answers `ping` with an empty result, and anything else with
    /// "method not found".
    pub fn to_server_request(id: &'a Value, method: &str) -> Self {
        let (result, error) = match method {
            "ping" => (Some(json!({})), None),
            _ => (
                None,
                Some(RpcError {
                    code: METHOD_NOT_FOUND,
                    message: format!("method not found: {method}"),
                }),
            ),
        };
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
            error,
        }
    }
}

/// Any message read from the server.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, PartialEq)]
pub enum Incoming {
    /// A response to one of our requests.
    Response {
        id: i64,
        payload: Result<Value, RpcError>,
    },
    /// A request (with an id) or notification initiated by the server.
    ServerMessage { id: Option<Value>, method: String },
}

impl Incoming {
    pub fn parse(line: &str) -> Result<Self, TransportError> {
        let raw: RawMessage = serde_json::from_str(line)?;
        if let Some(method) = raw.method {
            return Ok(Incoming::ServerMessage {
                id: raw.id,
                method,
            });
        }
        let id = raw.id.as_ref().and_then(Value::as_i64).ok_or_else(|| {
            TransportError::Malformed(format!(
                "response without a numeric id: {line}"
            ))
        })?;
        let payload = match (raw.result, raw.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            // A `null` result deserializes to `None`.
            (None, None) => Ok(Value::Null),
        };
        Ok(Incoming::Response { id, payload })
    }
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolEntry>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

impl From<ToolEntry> for ToolDescriptor {
    fn from(entry: ToolEntry) -> Self {
        ToolDescriptor {
            name: entry.name,
            description: entry.description.unwrap_or_default(),
            input_schema: entry
                .input_schema
                .unwrap_or_else(|| json!({ "type": "object" })),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Joins the text blocks of the content, used as the error detail of
    /// failed calls.
    pub fn text(&self) -> String {
        let Some(blocks) = self.content.as_array() else {
            return self.content.to_string();
        };
        let text = blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            "tool reported an error".to_owned()
        } else {
            text
        }
    }
}
