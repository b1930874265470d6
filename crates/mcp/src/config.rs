use crate::tools::Backends;
use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use toolsuite_backends::{
    EndpointConfig, GitHubClient, RetryConfig, SentryClient, WeatherClient, GITHUB_API_URL, OPENWEATHER_API_URL,
    SENTRY_API_URL,
};
use toolsuite_core::{PathSandbox, SandboxConfig, SandboxConfigError, SandboxedFs};
use url::Url;

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Parser, Debug, Clone)]
#[command(name = "toolsuite-mcp")]
#[command(about = "Filesystem, GitHub, Sentry and weather tools over MCP stdio", long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "toolsuite.toml")]
    pub config: PathBuf,

    /// Directory filesystem tools may touch (repeatable)
    #[arg(long = "allow-root", env = "TOOLSUITE_ALLOWED_ROOTS", value_delimiter = ',')]
    pub allow_roots: Vec<PathBuf>,

    /// Hard deadline for one tool call
    #[arg(long)]
    pub call_timeout_secs: Option<u64>,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub log_json: bool,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    #[arg(long, env = "SENTRY_AUTH_TOKEN", hide_env_values = true)]
    pub sentry_token: Option<String>,

    #[arg(long, env = "SENTRY_ORG_SLUG")]
    pub sentry_org: Option<String>,

    #[arg(long, env = "OPENWEATHER_API_KEY", hide_env_values = true)]
    pub weather_api_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base_url for [{service}]: {source}")]
    InvalidUrl {
        service: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("call_timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error(transparent)]
    Sandbox(#[from] SandboxConfigError),
}

/// Contents of `toolsuite.toml`; every section is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub sandbox: SandboxSection,

    #[serde(default)]
    pub dispatch: DispatchSection,

    #[serde(default)]
    pub github: ServiceSection,

    #[serde(default)]
    pub sentry: ServiceSection,

    #[serde(default)]
    pub weather: ServiceSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxSection {
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// Connection settings for one remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Falls back to the public endpoint of the service
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_http_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl ServiceSection {
    fn endpoint(&self, service: &'static str, fallback: &str, token: Option<&String>) -> Result<EndpointConfig, ConfigError> {
        let raw = self.base_url.as_deref().unwrap_or(fallback);
        let base_url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { service, source })?;
        Ok(EndpointConfig::new(base_url)
            .with_token(token.cloned())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_retry(RetryConfig::default().with_max_retries(self.max_retries)))
    }
}

impl FileConfig {
    /// Read the file if it exists, otherwise fall back to defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!(path = %config_path.display(), "Configuration file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read configuration file {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", config_path.display()))
    }
}

/// Runtime settings after merging the file with CLI and environment values
#[derive(Debug, Clone)]
pub struct Settings {
    pub sandbox: Arc<SandboxConfig>,
    pub call_timeout: Duration,
    pub github: Arc<EndpointConfig>,
    pub sentry: Arc<EndpointConfig>,
    pub sentry_org: Option<String>,
    pub weather: Arc<EndpointConfig>,
}

impl Settings {
    /// Load the configuration file named by `args` and apply the overrides
    pub fn load(args: &Args) -> Result<Self> {
        let file = FileConfig::load(&args.config)?;
        Self::merge(args, file).context("Invalid configuration")
    }

    /// CLI values win over file values
    pub fn merge(args: &Args, file: FileConfig) -> Result<Self, ConfigError> {
        let roots = if args.allow_roots.is_empty() {
            file.sandbox.allowed_roots
        } else {
            args.allow_roots.clone()
        };
        let sandbox = SandboxConfig::new(&roots)?;
        if sandbox.is_empty() {
            tracing::warn!("No sandbox roots configured; every filesystem tool call will be rejected");
        }

        let call_timeout_secs = args.call_timeout_secs.unwrap_or(file.dispatch.call_timeout_secs);
        if call_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(Self {
            sandbox: Arc::new(sandbox),
            call_timeout: Duration::from_secs(call_timeout_secs),
            github: Arc::new(file.github.endpoint("github", GITHUB_API_URL, args.github_token.as_ref())?),
            sentry: Arc::new(file.sentry.endpoint("sentry", SENTRY_API_URL, args.sentry_token.as_ref())?),
            sentry_org: args.sentry_org.clone(),
            weather: Arc::new(file.weather.endpoint(
                "weather",
                OPENWEATHER_API_URL,
                args.weather_api_key.as_ref(),
            )?),
        })
    }

    pub fn path_sandbox(&self) -> PathSandbox {
        PathSandbox::new(Arc::clone(&self.sandbox))
    }

    /// Construct every backend client
    pub fn backends(&self) -> Result<Backends> {
        Ok(Backends {
            fs: SandboxedFs::new(self.path_sandbox()),
            github: GitHubClient::new(Arc::clone(&self.github)).context("Failed to create GitHub client")?,
            sentry: SentryClient::new(Arc::clone(&self.sentry), self.sentry_org.clone())
                .context("Failed to create Sentry client")?,
            weather: WeatherClient::new(Arc::clone(&self.weather)).context("Failed to create weather client")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["toolsuite-mcp"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            [github]
            max_retries = 5

            [dispatch]
            call_timeout_secs = 15
            "#,
        )
        .unwrap();

        assert_eq!(file.github.max_retries, 5);
        assert_eq!(file.github.timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS);
        assert_eq!(file.github.base_url, None);
        assert_eq!(file.dispatch.call_timeout_secs, 15);
        assert_eq!(file.sentry, ServiceSection::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let file = FileConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(file, FileConfig::default());
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("toolsuite.toml");
        std::fs::write(&path, "[sandbox\nallowed_roots = 3").unwrap();
        let err = FileConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let from_file = TempDir::new().unwrap();
        let from_cli = TempDir::new().unwrap();
        let file = FileConfig {
            sandbox: SandboxSection {
                allowed_roots: vec![from_file.path().to_path_buf()],
            },
            dispatch: DispatchSection { call_timeout_secs: 120 },
            ..FileConfig::default()
        };
        let cli_root = from_cli.path().to_str().unwrap();

        let settings = Settings::merge(
            &args(&["--allow-root", cli_root, "--call-timeout-secs", "5"]),
            file,
        )
        .unwrap();

        let canonical = std::fs::canonicalize(from_cli.path()).unwrap();
        assert_eq!(settings.sandbox.allowed_roots(), &[canonical]);
        assert_eq!(settings.call_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_comma_separated_roots() {
        let parsed = args(&["--allow-root", "/srv/a,/srv/b"]);
        assert_eq!(parsed.allow_roots, vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]);
    }

    #[test]
    fn test_base_url_override() {
        let file: FileConfig = toml::from_str(
            r#"
            [weather]
            base_url = "http://localhost:8089/data/2.5"
            "#,
        )
        .unwrap();
        let settings = Settings::merge(&args(&[]), file).unwrap();
        assert_eq!(settings.weather.base_url.as_str(), "http://localhost:8089/data/2.5");
        assert_eq!(settings.github.base_url.as_str(), "https://api.github.com/");
    }

    #[test]
    fn test_invalid_base_url() {
        let file: FileConfig = toml::from_str("[sentry]\nbase_url = \"not a url\"").unwrap();
        let err = Settings::merge(&args(&[]), file).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { service: "sentry", .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Settings::merge(&args(&["--call-timeout-secs", "0"]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_unreadable_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let err = Settings::merge(&args(&["--allow-root", missing.to_str().unwrap()]), FileConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Sandbox(_)));
    }
}
