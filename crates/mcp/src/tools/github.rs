// Source-hosting tools backed by the GitHub REST API

use super::{remote, RegistryError, ToolRegistryBuilder};
use serde::Deserialize;
use toolsuite_backends::github::{
    CreateIssueArgs, CreatePullRequestArgs, CreateRepoArgs, ListPullRequestsArgs, RepoArgs, ReviewPullRequestArgs,
    SearchCodeArgs, SearchReposArgs, UpdateReadmeArgs,
};
use toolsuite_backends::GitHubClient;
use toolsuite_core::{FieldSchema, FieldType, InputSchema, ToolCategory, ToolDefinition};

#[derive(Deserialize)]
struct NoArgs {}

fn tool(name: &str, description: &str, schema: InputSchema) -> ToolDefinition {
    ToolDefinition::new(name, description, ToolCategory::SourceHosting, schema)
}

fn repo_full_name() -> FieldSchema {
    FieldSchema::string("repo_full_name", "Full name of the repo (e.g., 'owner/repo')").required()
}

fn limit() -> FieldSchema {
    FieldSchema::integer("limit", "Maximum number of results")
        .default_value(10)
        .range(1, 100)
}

pub fn register(builder: ToolRegistryBuilder, client: &GitHubClient) -> Result<ToolRegistryBuilder, RegistryError> {
    builder
        .register(
            tool(
                "gh_list_repositories",
                "Lists all GitHub repositories accessible by the authenticated user.",
                InputSchema::new(),
            ),
            remote(client, |gh: GitHubClient, _: NoArgs| async move { gh.list_repositories().await }),
        )?
        .register(
            tool(
                "gh_list_repo_issues",
                "Lists open issues for a GitHub repository.",
                InputSchema::new().field(repo_full_name()),
            ),
            remote(client, |gh: GitHubClient, a: RepoArgs| async move { gh.list_repo_issues(a).await }),
        )?
        .register(
            tool(
                "gh_create_repo",
                "Creates a new GitHub repository.",
                InputSchema::new()
                    .field(FieldSchema::string("name", "Name for the new repository").required())
                    .field(FieldSchema::string("description", "Optional description").default_value(""))
                    .field(FieldSchema::boolean("private", "Make repo private (default: false)").default_value(false)),
            ),
            remote(client, |gh: GitHubClient, a: CreateRepoArgs| async move { gh.create_repo(a).await }),
        )?
        .register(
            tool(
                "gh_fork_repo",
                "Forks an existing GitHub repository.",
                InputSchema::new().field(
                    FieldSchema::string("repo_full_name", "Full name of the repo to fork (e.g., 'owner/repo')").required(),
                ),
            ),
            remote(client, |gh: GitHubClient, a: RepoArgs| async move { gh.fork_repo(a).await }),
        )?
        .register(
            tool(
                "gh_create_issue",
                "Creates a new issue in a repository.",
                InputSchema::new()
                    .field(repo_full_name())
                    .field(FieldSchema::string("title", "Title of the issue").required())
                    .field(FieldSchema::string("body", "Body/description of the issue").default_value(""))
                    .field(
                        FieldSchema::array("labels", FieldType::String, "List of labels to apply")
                            .default_value(Vec::<String>::new()),
                    ),
            ),
            remote(client, |gh: GitHubClient, a: CreateIssueArgs| async move { gh.create_issue(a).await }),
        )?
        .register(
            tool(
                "gh_create_pr",
                "Creates a new pull request.",
                InputSchema::new()
                    .field(repo_full_name())
                    .field(FieldSchema::string("title", "Title of the pull request").required())
                    .field(FieldSchema::string("head", "Branch containing changes").required())
                    .field(FieldSchema::string("base", "Base branch to merge into").default_value("main"))
                    .field(FieldSchema::string("body", "Description of the changes").default_value("")),
            ),
            remote(client, |gh: GitHubClient, a: CreatePullRequestArgs| async move {
                gh.create_pull_request(a).await
            }),
        )?
        .register(
            tool(
                "gh_search_repos",
                "Searches for GitHub repositories.",
                InputSchema::new()
                    .field(FieldSchema::string("query", "Search query").required())
                    .field(
                        FieldSchema::string("sort", "Sort by (stars, forks, updated)")
                            .one_of(&["stars", "forks", "updated"])
                            .default_value("stars"),
                    )
                    .field(
                        FieldSchema::string("order", "Sort order (asc, desc)")
                            .one_of(&["asc", "desc"])
                            .default_value("desc"),
                    )
                    .field(limit()),
            ),
            remote(client, |gh: GitHubClient, a: SearchReposArgs| async move {
                gh.search_repositories(a).await
            }),
        )?
        .register(
            tool(
                "gh_search_code",
                "Searches for code in GitHub repositories.",
                InputSchema::new()
                    .field(FieldSchema::string("query", "Search query").required())
                    .field(FieldSchema::string("repo", "Limit search to specific repo"))
                    .field(FieldSchema::string("language", "Filter by programming language"))
                    .field(limit()),
            ),
            remote(client, |gh: GitHubClient, a: SearchCodeArgs| async move { gh.search_code(a).await }),
        )?
        .register(
            tool(
                "gh_get_prs",
                "Lists pull requests in a repository.",
                InputSchema::new().field(repo_full_name()).field(
                    FieldSchema::string("state", "PR state (open, closed, all)")
                        .one_of(&["open", "closed", "all"])
                        .default_value("open"),
                ),
            ),
            remote(client, |gh: GitHubClient, a: ListPullRequestsArgs| async move {
                gh.list_pull_requests(a).await
            }),
        )?
        .register(
            tool(
                "gh_review_pr",
                "Reviews a pull request.",
                InputSchema::new()
                    .field(repo_full_name())
                    .field(FieldSchema::integer("pr_number", "Pull request number").required().range(1, i64::MAX))
                    .field(FieldSchema::string("body", "Review comment").required())
                    .field(
                        FieldSchema::string("event", "Review event (APPROVE, REQUEST_CHANGES, COMMENT)")
                            .one_of(&["APPROVE", "REQUEST_CHANGES", "COMMENT"])
                            .default_value("APPROVE"),
                    ),
            ),
            remote(client, |gh: GitHubClient, a: ReviewPullRequestArgs| async move {
                gh.review_pull_request(a).await
            }),
        )?
        .register(
            tool(
                "gh_update_readme",
                "Updates or creates the README.md file in a repository.",
                InputSchema::new()
                    .field(repo_full_name())
                    .field(FieldSchema::string("content", "New content for the README file").required())
                    .field(
                        FieldSchema::string("commit_message", "Commit message for the update")
                            .default_value("Update README.md"),
                    ),
            ),
            remote(client, |gh: GitHubClient, a: UpdateReadmeArgs| async move { gh.update_readme(a).await }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support;
    use crate::tools::ToolRegistry;
    use serde_json::json;
    use toolsuite_core::{ErrorKind, ToolOutcome};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn call(registry: &ToolRegistry, name: &str, arguments: serde_json::Value) -> ToolOutcome {
        let tool = registry.lookup(name)?;
        let args = tool.definition().input_schema.validate(&arguments)?;
        tool.handler().call(args).await
    }

    fn registry(server: &MockServer) -> (tempfile::TempDir, ToolRegistry) {
        let root = tempfile::TempDir::new().unwrap();
        let backends = test_support::backends(root.path(), &server.uri());
        let registry = register(ToolRegistry::builder(), &backends.github).unwrap().build();
        (root, registry)
    }

    #[tokio::test]
    async fn test_create_issue_requires_title() {
        let server = MockServer::start().await;
        let (_root, registry) = registry(&server);

        let failure = call(&registry, "gh_create_issue", json!({"repo_full_name": "o/r"}))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::ValidationError);
        let violations = &failure.details.unwrap()["violations"];
        assert_eq!(violations[0]["field"], "title");
        assert_eq!(violations[0]["reason"], "missing_field");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_pr_defaults_base_to_main() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/pulls"))
            .and(body_partial_json(json!({"base": "main", "head": "feature"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "number": 7,
                "title": "Add feature",
                "html_url": "https://github.com/o/r/pull/7",
                "state": "open"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (_root, registry) = registry(&server);

        let created = call(
            &registry,
            "gh_create_pr",
            json!({"repo_full_name": "o/r", "title": "Add feature", "head": "feature"}),
        )
        .await
        .unwrap();
        assert_eq!(created["pull_request"]["number"], 7);
    }

    #[tokio::test]
    async fn test_search_sort_is_constrained() {
        let server = MockServer::start().await;
        let (_root, registry) = registry(&server);

        let failure = call(&registry, "gh_search_repos", json!({"query": "rust", "sort": "best"}))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::ValidationError);
    }
}
