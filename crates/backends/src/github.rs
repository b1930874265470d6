//! GitHub REST client for the source-hosting tools.

use crate::config::EndpointConfig;
use crate::error::{BackendError, BackendResult};
use crate::transport::{AuthStyle, HttpTransport};
use base64::Engine;
use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

const TOKEN_SETTING: &str = "GITHUB_TOKEN";
const README_PATH: &str = "README.md";

// Arguments, deserialized from validated tool input

#[derive(Debug, Clone, Deserialize)]
pub struct RepoArgs {
    pub repo_full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRepoArgs {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateIssueArgs {
    pub repo_full_name: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePullRequestArgs {
    pub repo_full_name: String,
    pub title: String,
    pub head: String,
    pub base: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchReposArgs {
    pub query: String,
    pub sort: String,
    pub order: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchCodeArgs {
    pub query: String,
    pub repo: Option<String>,
    pub language: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListPullRequestsArgs {
    pub repo_full_name: String,
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewPullRequestArgs {
    pub repo_full_name: String,
    pub pr_number: u64,
    pub body: String,
    pub event: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateReadmeArgs {
    pub repo_full_name: String,
    pub content: String,
    pub commit_message: String,
}

// Remote documents, only the fields the tools report

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    full_name: String,
    html_url: String,
    description: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    language: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    title: String,
    html_url: String,
    state: String,
    created_at: Option<String>,
    /// Present when the "issue" is really a pull request
    pull_request: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    title: String,
    html_url: String,
    state: String,
    created_at: Option<String>,
    user: Option<Account>,
    head: Option<GitRef>,
    base: Option<GitRef>,
}

#[derive(Debug, Deserialize)]
struct Review {
    id: u64,
    state: String,
    body: Option<String>,
    submitted_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct CodeHit {
    name: String,
    path: String,
    html_url: String,
    repository: RepositoryRef,
}

#[derive(Debug, Deserialize)]
struct ContentFile {
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

fn repo_summary(repo: &Repository) -> Value {
    json!({
        "name": repo.name,
        "full_name": repo.full_name,
        "url": repo.html_url,
        "description": repo.description,
        "private": repo.private,
        "stars": repo.stargazers_count,
        "forks": repo.forks_count,
    })
}

/// `owner/repo`, with both halves non-empty
fn repo_path(full_name: &str) -> BackendResult<String> {
    match full_name.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok(format!("/repos/{}/{}", owner, repo))
        }
        _ => Err(BackendError::InvalidInput(format!(
            "repo_full_name must look like 'owner/repo', got '{}'",
            full_name
        ))),
    }
}

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    transport: HttpTransport,
}

impl GitHubClient {
    pub fn new(config: Arc<EndpointConfig>) -> BackendResult<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            header::HeaderName::from_static("x-github-api-version"),
            header::HeaderValue::from_static("2022-11-28"),
        );
        let transport = HttpTransport::new(config, AuthStyle::Bearer, headers)?;
        Ok(Self { transport })
    }

    fn authorized(&self) -> BackendResult<()> {
        self.transport.require_token(TOKEN_SETTING).map(|_| ())
    }

    pub async fn list_repositories(&self) -> BackendResult<Value> {
        self.authorized()?;
        let repos: Vec<Repository> = self
            .transport
            .get_with_query("/user/repos", &[("per_page", "100")])
            .await?;
        Ok(json!({ "repositories": repos.iter().map(repo_summary).collect::<Vec<_>>() }))
    }

    /// Open issues only; pull requests the issues endpoint also returns are dropped
    pub async fn list_repo_issues(&self, args: RepoArgs) -> BackendResult<Value> {
        self.authorized()?;
        let path = format!("{}/issues", repo_path(&args.repo_full_name)?);
        let issues: Vec<Issue> = self
            .transport
            .get_with_query(&path, &[("state", "open"), ("per_page", "100")])
            .await?;
        let issues: Vec<Value> = issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| json!({ "number": i.number, "title": i.title, "url": i.html_url }))
            .collect();
        Ok(json!({ "issues": issues }))
    }

    pub async fn create_repo(&self, args: CreateRepoArgs) -> BackendResult<Value> {
        self.authorized()?;
        let body = json!({
            "name": args.name,
            "description": args.description,
            "private": args.private,
            "has_issues": true,
            "has_wiki": true,
            "auto_init": true,
        });
        let repo: Repository = self.transport.post("/user/repos", &body).await?;
        info!(repo = %repo.full_name, "Created repository");
        Ok(json!({
            "status": "success",
            "repository": {
                "name": repo.name,
                "full_name": repo.full_name,
                "url": repo.html_url,
                "description": repo.description,
                "private": repo.private,
                "created_at": repo.created_at,
            }
        }))
    }

    pub async fn fork_repo(&self, args: RepoArgs) -> BackendResult<Value> {
        self.authorized()?;
        let path = format!("{}/forks", repo_path(&args.repo_full_name)?);
        let fork: Repository = self.transport.post(&path, &json!({})).await?;
        Ok(json!({
            "status": "success",
            "forked_repo": {
                "name": fork.name,
                "full_name": fork.full_name,
                "url": fork.html_url,
                "parent": args.repo_full_name,
            }
        }))
    }

    pub async fn create_issue(&self, args: CreateIssueArgs) -> BackendResult<Value> {
        self.authorized()?;
        let path = format!("{}/issues", repo_path(&args.repo_full_name)?);
        let body = json!({ "title": args.title, "body": args.body, "labels": args.labels });
        let issue: Issue = self.transport.post(&path, &body).await?;
        Ok(json!({
            "status": "success",
            "issue": {
                "number": issue.number,
                "title": issue.title,
                "url": issue.html_url,
                "state": issue.state,
                "created_at": issue.created_at,
            }
        }))
    }

    pub async fn create_pull_request(&self, args: CreatePullRequestArgs) -> BackendResult<Value> {
        self.authorized()?;
        let path = format!("{}/pulls", repo_path(&args.repo_full_name)?);
        let body = json!({
            "title": args.title,
            "head": args.head,
            "base": args.base,
            "body": args.body,
        });
        let pr: PullRequest = self.transport.post(&path, &body).await?;
        Ok(json!({
            "status": "success",
            "pull_request": {
                "number": pr.number,
                "title": pr.title,
                "url": pr.html_url,
                "state": pr.state,
                "created_at": pr.created_at,
            }
        }))
    }

    pub async fn search_repositories(&self, args: SearchReposArgs) -> BackendResult<Value> {
        self.authorized()?;
        let per_page = args.limit.to_string();
        let page: SearchPage<Repository> = self
            .transport
            .get_with_query(
                "/search/repositories",
                &[
                    ("q", args.query.as_str()),
                    ("sort", args.sort.as_str()),
                    ("order", args.order.as_str()),
                    ("per_page", per_page.as_str()),
                ],
            )
            .await?;
        let repositories: Vec<Value> = page
            .items
            .iter()
            .take(args.limit as usize)
            .map(|repo| {
                let mut summary = repo_summary(repo);
                summary["language"] = json!(repo.language);
                summary
            })
            .collect();
        Ok(json!({ "repositories": repositories }))
    }

    pub async fn search_code(&self, args: SearchCodeArgs) -> BackendResult<Value> {
        self.authorized()?;
        let mut query = args.query.clone();
        if let Some(repo) = args.repo.as_deref().filter(|r| !r.is_empty()) {
            query.push_str(&format!(" repo:{}", repo));
        }
        if let Some(language) = args.language.as_deref().filter(|l| !l.is_empty()) {
            query.push_str(&format!(" language:{}", language));
        }

        let per_page = args.limit.to_string();
        let page: SearchPage<CodeHit> = self
            .transport
            .get_with_query("/search/code", &[("q", query.as_str()), ("per_page", per_page.as_str())])
            .await?;
        let results: Vec<Value> = page
            .items
            .into_iter()
            .take(args.limit as usize)
            .map(|hit| {
                json!({
                    "name": hit.name,
                    "path": hit.path,
                    "url": hit.html_url,
                    "repository": hit.repository.full_name,
                    "language": args.language,
                })
            })
            .collect();
        Ok(json!({ "results": results }))
    }

    pub async fn list_pull_requests(&self, args: ListPullRequestsArgs) -> BackendResult<Value> {
        self.authorized()?;
        let path = format!("{}/pulls", repo_path(&args.repo_full_name)?);
        let prs: Vec<PullRequest> = self
            .transport
            .get_with_query(&path, &[("state", args.state.as_str()), ("per_page", "100")])
            .await?;
        let pull_requests: Vec<Value> = prs
            .into_iter()
            .map(|pr| {
                json!({
                    "number": pr.number,
                    "title": pr.title,
                    "url": pr.html_url,
                    "state": pr.state,
                    "created_at": pr.created_at,
                    "user": pr.user.map(|u| u.login),
                    "head": pr.head.map(|r| r.name),
                    "base": pr.base.map(|r| r.name),
                })
            })
            .collect();
        Ok(json!({ "pull_requests": pull_requests }))
    }

    pub async fn review_pull_request(&self, args: ReviewPullRequestArgs) -> BackendResult<Value> {
        self.authorized()?;
        let path = format!(
            "{}/pulls/{}/reviews",
            repo_path(&args.repo_full_name)?,
            args.pr_number
        );
        let review: Review = self
            .transport
            .post(&path, &json!({ "body": args.body, "event": args.event }))
            .await?;
        Ok(json!({
            "status": "success",
            "review": {
                "id": review.id,
                "state": review.state,
                "body": review.body,
                "submitted_at": review.submitted_at,
            }
        }))
    }

    /// Replace README.md, creating it when the repository has none
    pub async fn update_readme(&self, args: UpdateReadmeArgs) -> BackendResult<Value> {
        self.authorized()?;
        let path = format!("{}/contents/{}", repo_path(&args.repo_full_name)?, README_PATH);

        let existing: Option<ContentFile> = self.transport.get_optional(&path).await?;
        let action = if existing.is_some() { "updated" } else { "created" };

        let body = PutContents {
            message: &args.commit_message,
            content: base64::engine::general_purpose::STANDARD.encode(args.content.as_bytes()),
            sha: existing.map(|f| f.sha),
        };
        let _: Value = self.transport.put(&path, &body).await?;
        info!(repo = %args.repo_full_name, action, "README.md written");

        Ok(json!({
            "status": "success",
            "message": format!("README.md {} successfully", action),
            "repository": args.repo_full_name,
            "commit_message": args.commit_message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use toolsuite_core::ErrorKind;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, token: Option<&str>) -> GitHubClient {
        let config = EndpointConfig::new(url::Url::parse(&server.uri()).unwrap())
            .with_token(token.map(str::to_string))
            .with_retry(RetryConfig::no_retry());
        GitHubClient::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_never_calls_remote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server, None).list_repositories().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthError);
    }

    #[tokio::test]
    async fn test_list_repositories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .and(header("Authorization", "Bearer ghp-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "name": "toolsuite",
                "full_name": "acme/toolsuite",
                "html_url": "https://github.com/acme/toolsuite",
                "description": "tools",
                "private": false,
                "stargazers_count": 12,
                "forks_count": 3
            }])))
            .mount(&server)
            .await;

        let result = client(&server, Some("ghp-test")).list_repositories().await.unwrap();
        assert_eq!(result["repositories"][0]["full_name"], "acme/toolsuite");
        assert_eq!(result["repositories"][0]["stars"], 12);
    }

    #[tokio::test]
    async fn test_list_repo_issues_drops_pull_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/toolsuite/issues"))
            .and(query_param("state", "open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"number": 1, "title": "bug", "html_url": "u1", "state": "open"},
                {"number": 2, "title": "pr", "html_url": "u2", "state": "open", "pull_request": {}}
            ])))
            .mount(&server)
            .await;

        let result = client(&server, Some("t"))
            .list_repo_issues(RepoArgs {
                repo_full_name: "acme/toolsuite".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result["issues"].as_array().unwrap().len(), 1);
        assert_eq!(result["issues"][0]["number"], 1);
    }

    #[tokio::test]
    async fn test_create_issue_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/issues"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})),
            )
            .mount(&server)
            .await;

        let err = client(&server, Some("expired"))
            .create_issue(CreateIssueArgs {
                repo_full_name: "o/r".to_string(),
                title: "t".to_string(),
                body: String::new(),
                labels: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthError);
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[tokio::test]
    async fn test_malformed_repo_name_rejected_locally() {
        let server = MockServer::start().await;
        let err = client(&server, Some("t"))
            .fork_repo(RepoArgs {
                repo_full_name: "no-slash".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_search_code_builds_qualified_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(query_param("q", "fn main repo:acme/toolsuite language:rust"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 1,
                "items": [{
                    "name": "main.rs",
                    "path": "src/main.rs",
                    "html_url": "https://github.com/acme/toolsuite/blob/main/src/main.rs",
                    "repository": {"full_name": "acme/toolsuite"}
                }]
            })))
            .mount(&server)
            .await;

        let result = client(&server, Some("t"))
            .search_code(SearchCodeArgs {
                query: "fn main".to_string(),
                repo: Some("acme/toolsuite".to_string()),
                language: Some("rust".to_string()),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(result["results"][0]["path"], "src/main.rs");
        assert_eq!(result["results"][0]["repository"], "acme/toolsuite");
    }

    #[tokio::test]
    async fn test_search_page_without_items_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/repositories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "incomplete_results": false})))
            .mount(&server)
            .await;

        let result = client(&server, Some("t"))
            .search_repositories(SearchReposArgs {
                query: "nothing-matches-this".to_string(),
                sort: "stars".to_string(),
                order: "desc".to_string(),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(result["repositories"], json!([]));
    }

    #[tokio::test]
    async fn test_update_readme_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/contents/README.md"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/o/r/contents/README.md"))
            .and(body_partial_json(json!({"message": "docs", "content": "IyBIaQ=="})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"content": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server, Some("t"))
            .update_readme(UpdateReadmeArgs {
                repo_full_name: "o/r".to_string(),
                content: "# Hi".to_string(),
                commit_message: "docs".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result["message"], "README.md created successfully");
    }

    #[tokio::test]
    async fn test_update_readme_passes_existing_sha() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/contents/README.md"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sha": "abc123"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/o/r/contents/README.md"))
            .and(body_partial_json(json!({"sha": "abc123"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server, Some("t"))
            .update_readme(UpdateReadmeArgs {
                repo_full_name: "o/r".to_string(),
                content: "new".to_string(),
                commit_message: "Update README.md".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result["message"], "README.md updated successfully");
    }

    #[tokio::test]
    async fn test_secondary_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/pulls"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("retry-after", "30")
                    .set_body_json(json!({"message": "API rate limit exceeded"})),
            )
            .mount(&server)
            .await;

        let err = client(&server, Some("t"))
            .list_pull_requests(ListPullRequestsArgs {
                repo_full_name: "o/r".to_string(),
                state: "open".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }
}
