// Core types and functionality for the Toolsuite tool-dispatch server

pub mod files;
pub mod sandbox;
pub mod schema;
pub mod types;

pub use files::{FsError, SandboxedFs};
pub use sandbox::{PathSandbox, ResolvedPath, SandboxConfig, SandboxConfigError, SandboxViolation};
pub use schema::{FieldSchema, FieldType, InputSchema, ValidatedArgs, ValidationError, Violation, ViolationReason};
pub use types::*;
