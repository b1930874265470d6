//! Remote service clients behind the Toolsuite tools.
//!
//! Every client shares [`HttpTransport`], which retries transient failures and
//! classifies the rest into [`BackendError`]. A `BackendError` converts into a
//! `ToolFailure` with the matching kind, so the dispatch loop never sees a raw
//! HTTP error.

pub mod config;
pub mod error;
pub mod github;
pub mod sentry;
pub mod transport;
pub mod weather;

pub use config::{EndpointConfig, RetryConfig, GITHUB_API_URL, OPENWEATHER_API_URL, SENTRY_API_URL};
pub use error::{BackendError, BackendResult};
pub use github::GitHubClient;
pub use sentry::SentryClient;
pub use transport::{AuthStyle, HttpTransport};
pub use weather::WeatherClient;
