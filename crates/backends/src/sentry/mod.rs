//! Sentry REST client for the error-tracking tools.

pub mod analysis;

use crate::config::EndpointConfig;
use crate::error::{BackendError, BackendResult};
use crate::transport::{AuthStyle, HttpTransport};
use analysis::{SentryIssue, StatPoint};
use chrono::{Duration, Utc};
use reqwest::header;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const TOKEN_SETTING: &str = "SENTRY_AUTH_TOKEN";
const ORG_SETTING: &str = "SENTRY_ORG_SLUG";

/// Windows reported by the project health tool: (label, length, bucket size)
const HEALTH_PERIODS: [(&str, i64, &str); 4] = [
    ("1h", 1, "10s"),
    ("24h", 24, "1h"),
    ("7d", 24 * 7, "1d"),
    ("30d", 24 * 30, "1d"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct IssuesArgs {
    pub project_slug: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub stats_period: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueArgs {
    pub project_slug: String,
    pub issue_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowArgs {
    pub project_slug: String,
    pub days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectArgs {
    pub project_slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusArgs {
    pub project_slug: String,
    pub issue_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct Project {
    id: String,
    slug: String,
    name: String,
    platform: Option<String>,
    status: Option<String>,
}

/// Reject identifiers that would change the request path.
fn segment<'a>(field: &str, value: &'a str) -> BackendResult<&'a str> {
    let clean = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value != "."
        && value != "..";
    if clean {
        Ok(value)
    } else {
        Err(BackendError::InvalidInput(format!(
            "{} contains characters not allowed in an identifier: '{}'",
            field, value
        )))
    }
}

/// Sentry API client scoped to one organization.
#[derive(Debug, Clone)]
pub struct SentryClient {
    transport: HttpTransport,
    org: Option<String>,
}

impl SentryClient {
    pub fn new(config: Arc<EndpointConfig>, org: Option<String>) -> BackendResult<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        let transport = HttpTransport::new(config, AuthStyle::Bearer, headers)?;
        Ok(Self {
            transport,
            org: org.filter(|o| !o.trim().is_empty()),
        })
    }

    /// Organization slug, once both credential settings are known to be present
    fn org(&self) -> BackendResult<&str> {
        self.transport.require_token(TOKEN_SETTING)?;
        let org = self
            .org
            .as_deref()
            .ok_or(BackendError::MissingCredential(ORG_SETTING))?;
        segment("organization", org)
    }

    async fn project(&self, org: &str, slug: &str) -> BackendResult<Value> {
        let path = format!("/projects/{}/{}/", org, segment("project_slug", slug)?);
        let project: Project = self.transport.get(&path).await.map_err(|e| match e {
            BackendError::NotFound(_) => BackendError::NotFound(format!(
                "Project '{}' not found in organization '{}'",
                slug, org
            )),
            other => other,
        })?;
        Ok(json!({
            "id": project.id,
            "slug": project.slug,
            "name": project.name,
            "platform": project.platform,
            "status": project.status,
        }))
    }

    async fn issues(
        &self,
        org: &str,
        slug: &str,
        query: &str,
        stats_period: &str,
    ) -> BackendResult<Vec<SentryIssue>> {
        let path = format!("/projects/{}/{}/issues/", org, segment("project_slug", slug)?);
        let mut params: Vec<(&str, &str)> = Vec::new();
        if !query.is_empty() {
            params.push(("query", query));
        }
        if !stats_period.is_empty() {
            params.push(("statsPeriod", stats_period));
        }
        self.transport.get_with_query(&path, &params).await
    }

    async fn stats(&self, org: &str, slug: &str, hours: i64, resolution: &str) -> BackendResult<Vec<StatPoint>> {
        let path = format!("/projects/{}/{}/stats/", org, segment("project_slug", slug)?);
        let until = Utc::now();
        let since = until - Duration::hours(hours);
        let since = since.timestamp().to_string();
        let until = until.timestamp().to_string();
        self.transport
            .get_with_query(
                &path,
                &[
                    ("stat", "received"),
                    ("resolution", resolution),
                    ("since", since.as_str()),
                    ("until", until.as_str()),
                ],
            )
            .await
    }

    async fn issue_and_latest_event(&self, issue_id: &str) -> BackendResult<(Value, Value)> {
        let id = segment("issue_id", issue_id)?;
        let issue: Value = self.transport.get(&format!("/issues/{}/", id)).await?;
        let event: Value = self
            .transport
            .get(&format!("/issues/{}/events/latest/", id))
            .await?;
        Ok((issue, event))
    }

    pub async fn get_issues(&self, args: IssuesArgs) -> BackendResult<Value> {
        let org = self.org()?;
        let project = self.project(org, &args.project_slug).await?;
        let issues = self
            .issues(org, &args.project_slug, &args.query, &args.stats_period)
            .await?;
        Ok(json!({ "project": project, "issues": issues }))
    }

    pub async fn get_issue_details(&self, args: IssueArgs) -> BackendResult<Value> {
        self.org()?;
        let (issue, event) = self.issue_and_latest_event(&args.issue_id).await?;
        let parsed: SentryIssue = serde_json::from_value(issue.clone())
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let mut details = json!(parsed);
        details["stacktrace"] = event.get("entries").cloned().unwrap_or_else(|| json!([]));
        details["tags"] = issue.get("tags").cloned().unwrap_or_else(|| json!([]));
        details["subscribed"] = issue.get("isSubscribed").cloned().unwrap_or(json!(false));
        Ok(json!({ "issue": details }))
    }

    pub async fn get_error_frequency(&self, args: WindowArgs) -> BackendResult<Value> {
        let org = self.org()?;
        let points = self
            .stats(org, &args.project_slug, i64::from(args.days) * 24, "1d")
            .await?;
        Ok(analysis::frequency(&points, args.days))
    }

    pub async fn get_error_patterns(&self, args: WindowArgs) -> BackendResult<Value> {
        let org = self.org()?;
        self.project(org, &args.project_slug).await?;
        let issues = self.issues(org, &args.project_slug, "", "").await?;
        let issues = analysis::within_window(issues, args.days, Utc::now());
        Ok(analysis::error_patterns(&issues, args.days))
    }

    pub async fn update_issue_status(&self, args: UpdateStatusArgs) -> BackendResult<Value> {
        self.org()?;
        let path = format!("/issues/{}/", segment("issue_id", &args.issue_id)?);
        let issue: Value = self
            .transport
            .put(&path, &json!({ "status": args.status }))
            .await?;
        tracing::info!(
            project = %args.project_slug,
            issue = %args.issue_id,
            status = %args.status,
            "Issue status updated"
        );
        Ok(json!({
            "status": "success",
            "message": format!("Issue {} status updated to {}", args.issue_id, args.status),
            "issue": issue,
        }))
    }

    pub async fn get_project_stats(&self, args: ProjectArgs) -> BackendResult<Value> {
        let org = self.org()?;
        let mut statistics = serde_json::Map::new();
        let mut error_rates = serde_json::Map::new();
        for (label, hours, resolution) in HEALTH_PERIODS {
            let points = self.stats(org, &args.project_slug, hours, resolution).await?;
            error_rates.insert(label.to_string(), json!(analysis::average(&points)));
            statistics.insert(label.to_string(), json!(points));
        }
        let current = self.issues(org, &args.project_slug, "", "24h").await?;

        Ok(json!({
            "project_health": {
                "name": args.project_slug,
                "organization": org,
                "statistics": statistics,
                "current_issues": current.len(),
                "error_rates": error_rates,
            }
        }))
    }

    pub async fn get_detailed_stacktrace(&self, args: IssueArgs) -> BackendResult<Value> {
        self.org()?;
        let (issue, event) = self.issue_and_latest_event(&args.issue_id).await?;
        let pick = |name: &str| issue.get(name).cloned().unwrap_or(Value::Null);
        let frames = analysis::stack_frames(&event);

        Ok(json!({
            "issue": {
                "id": pick("id"),
                "title": pick("title"),
                "type": pick("type"),
                "level": pick("level"),
                "status": pick("status"),
                "priority": pick("priority"),
                "platform": pick("platform"),
                "count": pick("count"),
                "userCount": pick("userCount"),
                "firstSeen": pick("firstSeen"),
                "lastSeen": pick("lastSeen"),
                "culprit": pick("culprit"),
                "metadata": issue.get("metadata").cloned().unwrap_or_else(|| json!({})),
                "permalink": pick("permalink"),
            },
            "stacktrace_analysis": analysis::stacktrace_analysis(frames),
        }))
    }

    pub async fn analyze_error_patterns(&self, args: WindowArgs) -> BackendResult<Value> {
        let org = self.org()?;
        let issues = self.issues(org, &args.project_slug, "", "").await?;
        let issues = analysis::within_window(issues, args.days, Utc::now());
        Ok(analysis::analyze_patterns(&issues, args.days))
    }
}
