use crate::schema::InputSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Backend family a tool dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Error tracking (Sentry)
    Errors,
    /// Source code hosting (GitHub)
    SourceHosting,
    /// Local filesystem, confined to the sandbox roots
    Filesystem,
    /// Weather data provider
    Weather,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Errors => "errors",
            Self::SourceHosting => "source_hosting",
            Self::Filesystem => "filesystem",
            Self::Weather => "weather",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, schema-described operation exposed to the client
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub category: ToolCategory,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
        input_schema: InputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            category,
        }
    }

    /// Whether path arguments must pass through the sandbox before dispatch
    pub fn is_filesystem_scoped(&self) -> bool {
        self.category == ToolCategory::Filesystem
    }
}

/// One inbound tool invocation, alive for a single dispatch cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Correlation token echoed on the response
    pub id: Value,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Failure classification carried on every error response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    SandboxViolation,
    AuthError,
    RateLimited,
    TransientNetworkError,
    BackendError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ValidationError => "validation_error",
            Self::SandboxViolation => "sandbox_violation",
            Self::AuthError => "auth_error",
            Self::RateLimited => "rate_limited",
            Self::TransientNetworkError => "transient_network_error",
            Self::BackendError => "backend_error",
            Self::InternalError => "internal_error",
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientNetworkError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure produced by the core or re-tagged at an adapter boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Structured detail, e.g. the violation list or the rejected path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthError, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetworkError, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::not_found(format!("Unknown tool: {}", name))
    }
}

/// What a tool handler hands back to the dispatch loop
pub type ToolOutcome = Result<Value, ToolFailure>;

/// Result of one dispatch cycle, consumed once by serialization
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { payload: Value },
    Failure(ToolFailure),
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }
}

impl From<ToolOutcome> for ToolResult {
    fn from(outcome: ToolOutcome) -> Self {
        match outcome {
            Ok(payload) => Self::Success { payload },
            Err(failure) => Self::Failure(failure),
        }
    }
}
