// Tool registry: the immutable name → {definition, handler} table

use crate::protocol::ToolSchema;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use toolsuite_core::{ToolDefinition, ToolFailure, ToolOutcome, ValidatedArgs};

/// Executes one tool against already-validated arguments
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ValidatedArgs) -> ToolOutcome;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Send + Sync + Fn(ValidatedArgs) -> Fut,
    Fut: Future<Output = ToolOutcome> + Send,
{
    async fn call(&self, args: ValidatedArgs) -> ToolOutcome {
        (self)(args).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),

    #[error("tool name cannot be empty")]
    EmptyName,
}

/// A definition paired with the handler that serves it
#[derive(Clone)]
pub struct RegisteredTool {
    definition: Arc<ToolDefinition>,
    handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.definition.name.clone(),
            description: self.definition.description.clone(),
            input_schema: self.definition.input_schema.to_json_schema(),
        }
    }
}

/// Collects tools before the server starts; `build` freezes them
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistryBuilder {
    pub fn register<H>(mut self, definition: ToolDefinition, handler: H) -> Result<Self, RegistryError>
    where
        H: ToolHandler + 'static,
    {
        if definition.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.index.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateTool(definition.name));
        }

        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            definition: Arc::new(definition),
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: self.tools,
            index: self.index,
        }
    }
}

/// Immutable tool catalog, shared read-only across streams
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.tools.iter().map(|t| t.definition.name.as_str()).collect();
        f.debug_struct("ToolRegistry").field("registered", &names).finish()
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Definitions in registration order
    pub fn list(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter().map(|t| t.definition())
    }

    /// Get a tool by name; an unknown name is a `not_found` failure
    pub fn lookup(&self, name: &str) -> Result<&RegisteredTool, ToolFailure> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolFailure::unknown_tool(name))
    }

    /// List all tool schemas
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(RegisteredTool::schema).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
