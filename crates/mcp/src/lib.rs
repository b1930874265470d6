// MCP (Model Context Protocol) server exposing the Toolsuite catalog
// Filesystem, GitHub, Sentry and weather tools behind one JSON-RPC stdio endpoint

pub mod config;
pub mod protocol;
pub mod server;
pub mod tools;

pub use config::{Args, ConfigError, FileConfig, Settings};
pub use server::McpServer;
pub use tools::{catalog, Backends, RegistryError, ToolRegistry};
