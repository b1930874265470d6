//! Aggregations computed locally over fetched Sentry issues and events.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Issue document as returned by the project issues endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentryIssue {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Sentry sends this one as a string
    #[serde(default, deserialize_with = "lenient_count")]
    pub count: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub user_count: u64,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub level: Option<String>,
    pub status: Option<String>,
    pub permalink: Option<String>,
    #[serde(default)]
    pub culprit: Option<String>,
    #[serde(rename = "type")]
    pub issue_type: Option<String>,
    pub platform: Option<String>,
    pub priority: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// One `[timestamp, count]` bucket from the stats endpoint.
pub type StatPoint = (i64, u64);

fn timeframe(days: u32) -> String {
    format!("Last {} days", days)
}

fn label(value: Option<&str>, fallback: &str) -> String {
    value.filter(|v| !v.is_empty()).unwrap_or(fallback).to_string()
}

/// Issues seen within the last `days` days; undated issues are kept.
pub fn within_window(issues: Vec<SentryIssue>, days: u32, now: DateTime<Utc>) -> Vec<SentryIssue> {
    let cutoff = now - Duration::days(i64::from(days));
    issues
        .into_iter()
        .filter(|issue| {
            issue
                .last_seen
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|seen| seen.with_timezone(&Utc) >= cutoff)
                .unwrap_or(true)
        })
        .collect()
}

/// Totals and per-bucket series for the error frequency tool.
pub fn frequency(points: &[StatPoint], days: u32) -> Value {
    let total: u64 = points.iter().map(|(_, count)| count).sum();
    let data: Vec<Value> = points
        .iter()
        .map(|(ts, count)| json!({ "timestamp": ts, "count": count }))
        .collect();
    json!({
        "statistics": {
            "timeframe": timeframe(days),
            "data": data,
            "total_errors": total,
            "average_per_day": average(points),
        }
    })
}

/// Mean count per bucket, zero for an empty series.
pub fn average(points: &[StatPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let total: u64 = points.iter().map(|(_, count)| count).sum();
    total as f64 / points.len() as f64
}

/// Issue counts grouped by type, level and culprit.
pub fn error_patterns(issues: &[SentryIssue], days: u32) -> Value {
    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_level: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_culprit: BTreeMap<String, u64> = BTreeMap::new();

    for issue in issues {
        *by_type.entry(label(issue.issue_type.as_deref(), "unknown")).or_default() += 1;
        *by_level.entry(label(issue.level.as_deref(), "unknown")).or_default() += 1;
        if let Some(culprit) = issue.culprit.as_deref().filter(|c| !c.is_empty()) {
            *by_culprit.entry(culprit.to_string()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&String, &u64)> = by_culprit.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let most_frequent: Vec<Value> = ranked
        .into_iter()
        .take(5)
        .map(|(culprit, count)| json!({ "culprit": culprit, "count": count }))
        .collect();

    json!({
        "patterns": {
            "timeframe": timeframe(days),
            "total_issues": issues.len(),
            "by_type": by_type,
            "by_level": by_level,
            "by_culprit": by_culprit,
            "most_frequent_culprits": most_frequent,
        }
    })
}

#[derive(Debug, Default, Serialize)]
struct PlatformStats {
    total_errors: u64,
    total_users: u64,
    issues: Vec<Value>,
}

/// Distribution, frequency, platform and priority breakdown of a set of issues.
pub fn analyze_patterns(issues: &[SentryIssue], days: u32) -> Value {
    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_level: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_platform: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_priority: BTreeMap<String, u64> = BTreeMap::new();
    let mut priority_analysis: BTreeMap<String, u64> = ["high", "medium", "low"]
        .iter()
        .map(|p| (p.to_string(), 0))
        .collect();
    let mut platforms: BTreeMap<String, PlatformStats> = BTreeMap::new();
    let mut total_errors = 0u64;
    let mut total_users = 0u64;

    for issue in issues {
        let platform = label(issue.platform.as_deref(), "unknown");
        let priority = label(issue.priority.as_deref(), "medium");

        *by_type.entry(label(issue.issue_type.as_deref(), "unknown")).or_default() += 1;
        *by_level.entry(label(issue.level.as_deref(), "unknown")).or_default() += 1;
        *by_platform.entry(platform.clone()).or_default() += 1;
        *by_priority.entry(priority.clone()).or_default() += 1;
        *priority_analysis.entry(priority.clone()).or_default() += 1;

        total_errors += issue.count;
        total_users += issue.user_count;

        let stats = platforms.entry(platform).or_default();
        stats.total_errors += issue.count;
        stats.total_users += issue.user_count;
        stats.issues.push(json!({
            "id": issue.id,
            "title": issue.title,
            "count": issue.count,
            "userCount": issue.user_count,
            "priority": priority,
        }));
    }

    let mut ranked: Vec<&SentryIssue> = issues.iter().collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    let most_frequent: Vec<Value> = ranked
        .into_iter()
        .take(10)
        .map(|issue| {
            json!({
                "id": issue.id,
                "title": issue.title,
                "count": issue.count,
                "userCount": issue.user_count,
                "priority": issue.priority,
                "platform": issue.platform,
                "firstSeen": issue.first_seen,
                "lastSeen": issue.last_seen,
            })
        })
        .collect();

    json!({
        "timeframe": timeframe(days),
        "total_issues": issues.len(),
        "error_distribution": {
            "by_type": by_type,
            "by_level": by_level,
            "by_platform": by_platform,
            "by_priority": by_priority,
        },
        "frequency_analysis": {
            "total_errors": total_errors,
            "total_users_affected": total_users,
            "most_frequent_errors": most_frequent,
        },
        "platform_analysis": platforms,
        "priority_analysis": priority_analysis,
    })
}

/// Flatten every exception frame of an event, outermost call first.
pub fn stack_frames(event: &Value) -> Vec<Value> {
    let entries = event.get("entries").and_then(Value::as_array);
    let mut frames = Vec::new();

    for entry in entries.into_iter().flatten() {
        if entry.get("type").and_then(Value::as_str) != Some("exception") {
            continue;
        }
        let values = entry.pointer("/data/values").and_then(Value::as_array);
        for exception in values.into_iter().flatten() {
            let raw = exception.pointer("/stacktrace/frames").and_then(Value::as_array);
            for frame in raw.into_iter().flatten() {
                let field = |name: &str| frame.get(name).cloned().unwrap_or(Value::Null);
                let list = |name: &str| frame.get(name).cloned().unwrap_or_else(|| json!([]));
                frames.push(json!({
                    "filename": field("filename"),
                    "function": field("function"),
                    "line_number": field("lineno"),
                    "column_number": field("colno"),
                    "context": list("context"),
                    "variables": frame.get("vars").cloned().unwrap_or_else(|| json!({})),
                    "is_in_app": frame.get("in_app").and_then(Value::as_bool).unwrap_or(false),
                    "module": field("module"),
                    "package": field("package"),
                    "abs_path": field("abs_path"),
                    "pre_context": list("pre_context"),
                    "post_context": list("post_context"),
                }));
            }
        }
    }
    frames
}

/// Frame counts plus where the error surfaced and where it originated.
pub fn stacktrace_analysis(frames: Vec<Value>) -> Value {
    let in_app = frames
        .iter()
        .filter(|f| f["is_in_app"].as_bool().unwrap_or(false))
        .count();
    let root_cause = frames.last().cloned().unwrap_or(Value::Null);
    let origin = frames.first().cloned().unwrap_or(Value::Null);
    json!({
        "total_frames": frames.len(),
        "in_app_frames": in_app,
        "frames": frames,
        "error_propagation": {
            "root_cause": root_cause,
            "error_origin": origin,
        }
    })
}
