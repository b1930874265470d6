// MCP protocol types and definitions (JSON-RPC 2.0 over stdio)

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use toolsuite_core::{ErrorKind, ToolFailure};

/// Protocol revision announced when the client does not ask for one
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Error code carried for each failure kind
pub fn error_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::ValidationError => -32602,
        ErrorKind::NotFound => -32004,
        ErrorKind::SandboxViolation => -32003,
        ErrorKind::AuthError => -32001,
        ErrorKind::RateLimited => -32029,
        ErrorKind::TransientNetworkError => -32002,
        ErrorKind::BackendError => -32000,
        ErrorKind::InternalError => -32603,
    }
}

impl JsonRpcError {
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: format!("Parse error: {}", detail.into()),
            data: Some(json!({ "kind": ErrorKind::InternalError })),
        }
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: format!("Invalid Request: {}", detail.into()),
            data: Some(json!({ "kind": ErrorKind::ValidationError })),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }

    /// Typed tool failure; `details` fields are merged next to `kind`
    pub fn from_failure(failure: &ToolFailure) -> Self {
        let mut data = serde_json::Map::new();
        data.insert("kind".to_string(), json!(failure.kind));
        match &failure.details {
            Some(Value::Object(details)) => {
                for (key, value) in details {
                    data.insert(key.clone(), value.clone());
                }
            }
            Some(other) => {
                data.insert("details".to_string(), other.clone());
            }
            None => {}
        }
        Self {
            code: error_code(failure.kind),
            message: failure.message.clone(),
            data: Some(Value::Object(data)),
        }
    }
}

// MCP-specific protocol messages

/// Tool definition for MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// List tools response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolSchema>,
}

/// Call tool request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Call tool response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "structuredContent")]
    pub structured_content: Value,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Payload as structured content, mirrored as pretty-printed text
    pub fn structured(payload: Value) -> Self {
        let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
        Self {
            content: vec![ToolContent::text(text)],
            structured_content: payload,
            is_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Initialize request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(rename = "clientInfo", default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Initialize response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl InitializeResult {
    pub fn for_client(params: Option<InitializeParams>) -> Self {
        let protocol_version = params
            .and_then(|p| p.protocol_version)
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string());
        Self {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: "toolsuite".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_data_merges_details() {
        let failure = ToolFailure::new(ErrorKind::SandboxViolation, "Path escapes the sandbox")
            .with_details(json!({"path": "/etc/passwd"}));
        let error = JsonRpcError::from_failure(&failure);

        assert_eq!(error.code, -32003);
        assert_eq!(
            error.data,
            Some(json!({"kind": "sandbox_violation", "path": "/etc/passwd"}))
        );
    }

    #[test]
    fn test_every_kind_has_distinct_code() {
        let kinds = [
            ErrorKind::NotFound,
            ErrorKind::ValidationError,
            ErrorKind::SandboxViolation,
            ErrorKind::AuthError,
            ErrorKind::RateLimited,
            ErrorKind::TransientNetworkError,
            ErrorKind::BackendError,
            ErrorKind::InternalError,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| error_code(*k)).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_call_tool_result_shape() {
        let result = CallToolResult::structured(json!({"answer": 42}));
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["structuredContent"]["answer"], 42);
        assert_eq!(wire["isError"], false);
        assert_eq!(wire["content"][0]["type"], "text");
        assert!(wire["content"][0]["text"].as_str().unwrap().contains("\"answer\": 42"));
    }

    #[test]
    fn test_initialize_echoes_client_version() {
        let params: InitializeParams = serde_json::from_value(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "1"}
        }))
        .unwrap();
        let result = InitializeResult::for_client(Some(params));
        assert_eq!(result.protocol_version, "2025-06-18");
        assert_eq!(result.server_info.name, "toolsuite");
    }
}
