// Tool catalog: every tool the server exposes, grouped by backend

pub mod filesystem;
pub mod github;
mod registry;
pub mod sentry;
pub mod weather;

pub use registry::{RegisteredTool, RegistryError, ToolHandler, ToolRegistry, ToolRegistryBuilder};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use toolsuite_backends::{BackendResult, GitHubClient, SentryClient, WeatherClient};
use toolsuite_core::{FsError, SandboxedFs, ToolFailure, ValidatedArgs};

/// Backend handles the catalog closes over
#[derive(Debug, Clone)]
pub struct Backends {
    pub fs: SandboxedFs,
    pub github: GitHubClient,
    pub sentry: SentryClient,
    pub weather: WeatherClient,
}

/// Register every tool; fails only on a duplicate or empty name
pub fn catalog(backends: &Backends) -> Result<ToolRegistry, RegistryError> {
    let builder = ToolRegistry::builder();
    let builder = filesystem::register(builder, &backends.fs)?;
    let builder = github::register(builder, &backends.github)?;
    let builder = sentry::register(builder, &backends.sentry)?;
    let builder = weather::register(builder, &backends.weather)?;
    Ok(builder.build())
}

fn to_payload<T: Serialize>(output: T) -> Result<Value, ToolFailure> {
    serde_json::to_value(output).map_err(|e| ToolFailure::internal(format!("Failed to encode result: {}", e)))
}

/// Handler running a synchronous filesystem operation on the blocking pool
fn blocking<A, T, F>(fs: &SandboxedFs, op: F) -> impl ToolHandler
where
    A: DeserializeOwned + Send + 'static,
    T: Serialize + Send + 'static,
    F: Fn(&SandboxedFs, A) -> Result<T, FsError> + Copy + Send + Sync + 'static,
{
    let fs = fs.clone();
    move |args: ValidatedArgs| {
        let fs = fs.clone();
        async move {
            let parsed: A = args.parse()?;
            let output = tokio::task::spawn_blocking(move || op(&fs, parsed))
                .await
                .map_err(|e| ToolFailure::internal(format!("Filesystem task failed: {}", e)))??;
            to_payload(output)
        }
    }
}

/// Handler forwarding typed arguments to a remote client
fn remote<C, A, T, F, Fut>(client: &C, op: F) -> impl ToolHandler
where
    C: Clone + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    T: Serialize + Send + 'static,
    F: Fn(C, A) -> Fut + Copy + Send + Sync + 'static,
    Fut: Future<Output = BackendResult<T>> + Send + 'static,
{
    let client = client.clone();
    move |args: ValidatedArgs| {
        let client = client.clone();
        async move {
            let parsed: A = args.parse()?;
            let output = op(client, parsed).await?;
            to_payload(output)
        }
    }
}
