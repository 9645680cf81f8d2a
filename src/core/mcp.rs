//! Shared MCP protocol surface carried over the in-process transport.
//!
//! Messages are JSON-RPC 2.0 shaped so that a real wire transport could
//! serialize them unchanged; the in-process channel never does.

use serde::{Deserialize, Serialize};
use serde_json::Value as J;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
}

pub mod code {
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

pub type RequestId = u64;

/// One protocol frame. The transport never looks inside.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Message {
    Request(RpcReq),
    Response(RpcResp),
    Notification(RpcNote),
}

impl Message {
    pub fn request(id: RequestId, method: &str, params: J) -> Self {
        Message::Request(RpcReq {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_owned(),
            params,
        })
    }

    pub fn notification(method: &str, params: J) -> Self {
        Message::Notification(RpcNote {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_owned(),
            params,
        })
    }

    pub fn id(&self) -> Option<RequestId> {
        match self {
            Message::Request(r) => Some(r.id),
            Message::Response(r) => Some(r.id),
            Message::Notification(_) => None,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RpcReq {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: String,
    pub params: J,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RpcNote {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: J,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RpcResp {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<J>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErr>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RpcErr {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<J>,
}

impl From<rmcp::ErrorData> for RpcErr {
    fn from(e: rmcp::ErrorData) -> Self {
        RpcErr {
            code: e.code.0,
            message: e.message.to_string(),
            data: e.data,
        }
    }
}

pub fn ok(id: RequestId, result: J) -> Message {
    Message::Response(RpcResp { jsonrpc: JSONRPC_VERSION, id, result: Some(result), error: None })
}
pub fn err(id: RequestId, code: i32, msg: impl Into<String>, data: Option<J>) -> Message {
    Message::Response(RpcResp {
        jsonrpc: JSONRPC_VERSION,
        id,
        result: None,
        error: Some(RpcErr { code, message: msg.into(), data }),
    })
}

// --- Handshake payloads ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: J,
    pub client_info: ServerInfo,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    #[serde(default)]
    pub capabilities: J,
}
