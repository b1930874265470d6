// Error-tracking tools backed by the Sentry API

use super::{remote, RegistryError, ToolRegistryBuilder};
use toolsuite_backends::sentry::{IssueArgs, IssuesArgs, ProjectArgs, UpdateStatusArgs, WindowArgs};
use toolsuite_backends::SentryClient;
use toolsuite_core::{FieldSchema, InputSchema, ToolCategory, ToolDefinition};

fn tool(name: &str, description: &str, schema: InputSchema) -> ToolDefinition {
    ToolDefinition::new(name, description, ToolCategory::Errors, schema)
}

fn project_slug() -> FieldSchema {
    FieldSchema::string("project_slug", "Sentry project slug").required()
}

fn issue_schema(issue_description: &str) -> InputSchema {
    InputSchema::new()
        .field(project_slug())
        .field(FieldSchema::string("issue_id", issue_description).required())
}

fn window_schema(days_description: &str) -> InputSchema {
    InputSchema::new().field(project_slug()).field(
        FieldSchema::integer("days", days_description)
            .default_value(7)
            .range(1, 90),
    )
}

pub fn register(builder: ToolRegistryBuilder, client: &SentryClient) -> Result<ToolRegistryBuilder, RegistryError> {
    builder
        .register(
            tool(
                "sentry_get_issues",
                "Gets issues for a Sentry project with optional filtering.",
                InputSchema::new()
                    .field(project_slug())
                    .field(FieldSchema::string("query", "Optional search query to filter issues").default_value(""))
                    .field(
                        FieldSchema::string("stats_period", "Time period for stats (e.g., '24h', '14d')")
                            .default_value("24h"),
                    ),
            ),
            remote(client, |s: SentryClient, a: IssuesArgs| async move { s.get_issues(a).await }),
        )?
        .register(
            tool(
                "sentry_get_issue_details",
                "Gets detailed information about a specific issue including stacktrace.",
                issue_schema("ID of the issue to get details for"),
            ),
            remote(client, |s: SentryClient, a: IssueArgs| async move { s.get_issue_details(a).await }),
        )?
        .register(
            tool(
                "sentry_get_error_frequency",
                "Gets error frequency statistics over a time period.",
                window_schema("Number of days to analyze"),
            ),
            remote(client, |s: SentryClient, a: WindowArgs| async move { s.get_error_frequency(a).await }),
        )?
        .register(
            tool(
                "sentry_get_error_patterns",
                "Analyzes error patterns and groups similar errors.",
                window_schema("Number of days to analyze patterns"),
            ),
            remote(client, |s: SentryClient, a: WindowArgs| async move { s.get_error_patterns(a).await }),
        )?
        .register(
            tool(
                "sentry_update_issue_status",
                "Updates the status of a Sentry issue.",
                issue_schema("ID of the issue to update").field(
                    FieldSchema::string("status", "New status (resolved, ignored, unresolved)")
                        .required()
                        .one_of(&["resolved", "ignored", "unresolved"]),
                ),
            ),
            remote(client, |s: SentryClient, a: UpdateStatusArgs| async move {
                s.update_issue_status(a).await
            }),
        )?
        .register(
            tool(
                "sentry_get_project_stats",
                "Gets overall project statistics and health metrics.",
                InputSchema::new().field(project_slug()),
            ),
            remote(client, |s: SentryClient, a: ProjectArgs| async move { s.get_project_stats(a).await }),
        )?
        .register(
            tool(
                "sentry_get_detailed_stacktrace",
                "Gets detailed stacktrace analysis including frame-by-frame analysis, context, and error propagation path.",
                issue_schema("ID of the issue to get detailed stacktrace for"),
            ),
            remote(client, |s: SentryClient, a: IssueArgs| async move {
                s.get_detailed_stacktrace(a).await
            }),
        )?
        .register(
            tool(
                "sentry_analyze_error_patterns",
                "Analyzes error patterns in detail including frequency trends, user impact, and correlation patterns.",
                window_schema("Number of days to analyze patterns"),
            ),
            remote(client, |s: SentryClient, a: WindowArgs| async move {
                s.analyze_error_patterns(a).await
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support;
    use crate::tools::ToolRegistry;
    use serde_json::json;
    use toolsuite_core::{ErrorKind, ToolOutcome};

    async fn call(registry: &ToolRegistry, name: &str, arguments: serde_json::Value) -> ToolOutcome {
        let tool = registry.lookup(name)?;
        let args = tool.definition().input_schema.validate(&arguments)?;
        tool.handler().call(args).await
    }

    fn registry() -> (tempfile::TempDir, ToolRegistry) {
        let root = tempfile::TempDir::new().unwrap();
        let backends = test_support::backends(root.path(), "http://127.0.0.1:9/api/0");
        let registry = register(ToolRegistry::builder(), &backends.sentry).unwrap().build();
        (root, registry)
    }

    #[tokio::test]
    async fn test_status_must_be_known() {
        let (_root, registry) = registry();
        let failure = call(
            &registry,
            "sentry_update_issue_status",
            json!({"project_slug": "web", "issue_id": "1", "status": "archived"}),
        )
        .await
        .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::ValidationError);
        assert_eq!(failure.details.unwrap()["violations"][0]["reason"], "invalid_enum_value");
    }

    #[tokio::test]
    async fn test_days_out_of_range() {
        let (_root, registry) = registry();
        let failure = call(
            &registry,
            "sentry_get_error_frequency",
            json!({"project_slug": "web", "days": 0}),
        )
        .await
        .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::ValidationError);
    }

    #[test]
    fn test_window_default_advertised() {
        let (_root, registry) = registry();
        let tool = registry.lookup("sentry_analyze_error_patterns").unwrap();
        let schema = tool.definition().input_schema.to_json_schema();
        assert_eq!(schema["properties"]["days"]["default"], 7);
        assert_eq!(schema["required"], json!(["project_slug"]));
    }
}
