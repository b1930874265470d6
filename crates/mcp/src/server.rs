// MCP server: newline-delimited JSON-RPC over stdio, one request at a time per stream

use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult,
};
use crate::tools::{RegisteredTool, ToolRegistry};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use toolsuite_core::{ErrorKind, PathSandbox, ToolFailure, ToolOutcome, ToolRequest, ToolResult, ValidatedArgs};
use tracing::{debug, error, info, warn};

/// Default hard deadline for a single tool call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest inbound line accepted before it is answered with a parse error
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Pre-serialized fallback for a response that could not be encoded
const ENCODE_FAILURE: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Failed to encode response","data":{"kind":"internal_error"}}}"#;

/// Aborts the wrapped task when dropped, so an abandoned call stops running
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// MCP server over any line-oriented byte stream.
///
/// The server value is cheap to clone and can serve several streams at once;
/// the registry and sandbox are shared read-only.
#[derive(Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    sandbox: PathSandbox,
    call_timeout: Duration,
    shutdown: CancellationToken,
}

impl McpServer {
    pub fn new(registry: Arc<ToolRegistry>, sandbox: PathSandbox) -> Self {
        Self {
            registry,
            sandbox,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Serve stdin/stdout until EOF or shutdown
    pub async fn start(&self) -> Result<()> {
        info!(tools = self.registry.len(), "MCP server listening on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one request stream until EOF or shutdown.
    ///
    /// Each request is answered before the next frame is read. EOF only ends
    /// the input: everything already received is answered first. Shutdown
    /// abandons an in-flight call without a response.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut inbound = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
        let mut outbound = FramedWrite::new(writer, LinesCodec::new());

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                frame = inbound.next() => frame,
            };

            let line = match frame {
                None => {
                    debug!("Input closed");
                    break;
                }
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(limit = MAX_FRAME_BYTES, "Discarding oversized message");
                    let response = JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error("message too large"));
                    write_response(&mut outbound, &response).await?;
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) => return Err(e).context("Failed to read from input"),
            };

            if line.trim().is_empty() {
                continue;
            }

            let response = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested while a request was in flight; abandoning it");
                    break;
                }
                response = self.handle_line(&line) => response,
            };
            if let Some(response) = response {
                write_response(&mut outbound, &response).await?;
            }
        }

        Ok(())
    }

    /// Decode one frame and produce its response; notifications produce none
    async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unparseable message");
                return Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error(e.to_string())));
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => return Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request(e.to_string()))),
        };
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request(format!("unsupported jsonrpc version {:?}", request.jsonrpc)),
            ));
        }

        let Some(id) = request.id else {
            debug!(method = %request.method, "Notification received");
            return None;
        };
        debug!(method = %request.method, id = %id, "Request received");

        let response = match request.method.as_str() {
            "initialize" => {
                let params = request
                    .params
                    .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok());
                if let Some(client) = params.as_ref().and_then(|p| p.client_info.as_ref()) {
                    info!(client = %client.name, version = %client.version, "Client connected");
                }
                to_response(id, &InitializeResult::for_client(params))
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => to_response(
                id,
                &ListToolsResult {
                    tools: self.registry.list_schemas(),
                },
            ),
            "tools/call" => self.handle_tool_call(id, request.params).await,
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };
        Some(response)
    }

    async fn handle_tool_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => {
                let failure = ToolFailure::new(ErrorKind::ValidationError, "tools/call requires params");
                return JsonRpcResponse::error(id, JsonRpcError::from_failure(&failure));
            }
            Err(e) => {
                let failure = ToolFailure::new(ErrorKind::ValidationError, format!("Malformed tools/call params: {}", e));
                return JsonRpcResponse::error(id, JsonRpcError::from_failure(&failure));
            }
        };

        let request = ToolRequest {
            id: id.clone(),
            tool_name: params.name,
            arguments: params.arguments,
        };
        match self.dispatch(request).await {
            ToolResult::Success { payload } => to_response(id, &CallToolResult::structured(payload)),
            ToolResult::Failure(failure) => JsonRpcResponse::error(id, JsonRpcError::from_failure(&failure)),
        }
    }

    /// Run one tool request to completion: look up, validate, sandbox, invoke
    pub async fn dispatch(&self, request: ToolRequest) -> ToolResult {
        let started = Instant::now();
        let outcome = self.dispatch_inner(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => info!(tool = %request.tool_name, id = %request.id, elapsed_ms, "Tool call succeeded"),
            Err(failure) => warn!(
                tool = %request.tool_name,
                id = %request.id,
                kind = %failure.kind,
                elapsed_ms,
                error = %failure.message,
                "Tool call failed"
            ),
        }
        ToolResult::from(outcome)
    }

    async fn dispatch_inner(&self, request: &ToolRequest) -> ToolOutcome {
        let tool = self.registry.lookup(&request.tool_name)?;
        let definition = tool.definition();
        let args = definition.input_schema.validate(&request.arguments)?;

        // Filesystem handlers re-resolve at point of access; this rejects escapes before any work starts
        if definition.is_filesystem_scoped() {
            for field in definition.input_schema.path_fields() {
                if let Some(raw) = args.str(field) {
                    self.sandbox.resolve(raw)?;
                }
            }
        }

        self.invoke(tool, args).await
    }

    /// Run the handler on its own task under the call deadline
    async fn invoke(&self, tool: &RegisteredTool, args: ValidatedArgs) -> ToolOutcome {
        let handler = tool.handler();
        let mut task = AbortOnDrop(tokio::spawn(async move { handler.call(args).await }));

        match tokio::time::timeout(self.call_timeout, &mut task.0).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) if join_error.is_panic() => {
                error!(tool = %tool.definition().name, "Tool handler panicked");
                Err(ToolFailure::internal("Tool handler panicked"))
            }
            Ok(Err(join_error)) => Err(ToolFailure::internal(format!("Tool task was cancelled: {}", join_error))),
            Err(_) => Err(ToolFailure::transient(format!(
                "Tool call exceeded the {}s deadline",
                self.call_timeout.as_secs_f64()
            ))),
        }
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("registry", &self.registry)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

fn to_response<T: serde::Serialize>(id: Value, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(
            id,
            JsonRpcError::from_failure(&ToolFailure::internal(format!("Failed to encode result: {}", e))),
        ),
    }
}

async fn write_response<W>(outbound: &mut FramedWrite<W, LinesCodec>, response: &JsonRpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = serde_json::to_string(response).unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode response");
        ENCODE_FAILURE.to_string()
    });
    outbound.send(line).await.context("Failed to write response")
}
