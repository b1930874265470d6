//! HTTP transport shared by the backend clients.

use crate::config::EndpointConfig;
use crate::error::{retry_after, BackendError, BackendResult};
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("toolsuite/", env!("CARGO_PKG_VERSION"));

/// How the endpoint's token is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// Callers add the token themselves (e.g. as a query parameter).
    None,
}

/// HTTP transport for making API requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<EndpointConfig>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given configuration.
    pub fn new(
        config: Arc<EndpointConfig>,
        auth: AuthStyle,
        mut headers: header::HeaderMap,
    ) -> BackendResult<Self> {
        if let (AuthStyle::Bearer, Some(token)) = (auth, config.token.as_ref()) {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| BackendError::Config("Invalid token format".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// The configured token, or an auth failure naming `setting`.
    pub fn require_token(&self, setting: &'static str) -> BackendResult<&str> {
        self.config
            .token
            .as_deref()
            .ok_or(BackendError::MissingCredential(setting))
    }

    /// Build a URL for the given path, keeping any path prefix on the base URL.
    fn build_url(&self, path: &str) -> BackendResult<url::Url> {
        let base = self.config.base_url.as_str().trim_end_matches('/');
        let joined = format!("{}/{}", base, path.trim_start_matches('/'));
        Ok(url::Url::parse(&joined)?)
    }

    /// Execute a request with retries.
    ///
    /// 429 is retried for every method; gateway errors and timeouts only for
    /// idempotent ones.
    async fn execute_with_retry(
        &self,
        method: &Method,
        request_builder: RequestBuilder,
    ) -> BackendResult<Response> {
        let retry_config = &self.config.retry_config;
        let idempotent = matches!(*method, Method::GET | Method::PUT | Method::DELETE | Method::HEAD);
        let mut attempts = 0;

        loop {
            let request = request_builder
                .try_clone()
                .ok_or_else(|| BackendError::Config("Request cannot be cloned".to_string()))?;

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let may_retry = status == 429 || idempotent;
                    if may_retry
                        && attempts < retry_config.max_retries
                        && retry_config.should_retry_status(status)
                    {
                        let backoff = retry_after(response.headers())
                            .map(Duration::from_secs)
                            .map(|d| d.min(retry_config.max_backoff))
                            .unwrap_or_else(|| retry_config.backoff_for_attempt(attempts));
                        warn!(
                            status = status,
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            "Request failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }

                    let headers = response.headers().clone();
                    let body = response.text().await.unwrap_or_default();
                    return Err(BackendError::from_response(status, &headers, &body));
                }
                Err(e) => {
                    if idempotent
                        && attempts < retry_config.max_retries
                        && (e.is_timeout() || e.is_connect())
                    {
                        let backoff = retry_config.backoff_for_attempt(attempts);
                        warn!(
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Request did not complete, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }
                    return Err(BackendError::from_reqwest(e));
                }
            }
        }
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, builder: RequestBuilder) -> BackendResult<T> {
        let response = self.execute_with_retry(&method, builder).await?;
        decode(response).await
    }

    /// Execute a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "GET request");
        self.send(Method::GET, self.client.get(url)).await
    }

    /// Execute a GET request with query parameters.
    pub async fn get_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> BackendResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "GET request with query");
        self.send(Method::GET, self.client.get(url).query(query)).await
    }

    /// Execute a GET request, mapping 404 to `None`.
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> BackendResult<Option<T>> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Execute a POST request.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> BackendResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "POST request");
        self.send(Method::POST, self.client.post(url).json(body)).await
    }

    /// Execute a PUT request.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> BackendResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "PUT request");
        self.send(Method::PUT, self.client.put(url).json(body)).await
    }
}

/// Read the body and decode it; an unexpected shape is a `Decode` error.
async fn decode<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
    let body = response.text().await.map_err(BackendError::from_reqwest)?;
    let text = if body.trim().is_empty() { "null" } else { body.as_str() };
    serde_json::from_str(text).map_err(|e| BackendError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use serde::{Deserialize, Serialize};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestResponse {
        message: String,
        value: i32,
    }

    fn create_config(base_url: &str) -> Arc<EndpointConfig> {
        Arc::new(
            EndpointConfig::new(url::Url::parse(base_url).unwrap())
                .with_retry(RetryConfig::no_retry()),
        )
    }

    fn create_config_with_retries(base_url: &str, retries: u32) -> Arc<EndpointConfig> {
        Arc::new(
            EndpointConfig::new(url::Url::parse(base_url).unwrap()).with_retry(RetryConfig {
                max_retries: retries,
                initial_backoff: Duration::from_millis(1),
                ..Default::default()
            }),
        )
    }

    fn transport(config: Arc<EndpointConfig>) -> HttpTransport {
        HttpTransport::new(config, AuthStyle::Bearer, reqwest::header::HeaderMap::new()).unwrap()
    }

    #[tokio::test]
    async fn test_get_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "success".to_string(),
                value: 42,
            }))
            .mount(&server)
            .await;

        let result: TestResponse = transport(create_config(&server.uri()))
            .get("/api/test")
            .await
            .unwrap();
        assert_eq!(result.value, 42);
    }

    #[tokio::test]
    async fn test_query_and_bearer_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "tokio"))
            .and(header("Authorization", "Bearer ghp-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "found".to_string(),
                value: 1,
            }))
            .mount(&server)
            .await;

        let config = Arc::new(
            EndpointConfig::new(url::Url::parse(&server.uri()).unwrap())
                .with_token(Some("ghp-test".to_string()))
                .with_retry(RetryConfig::no_retry()),
        );
        let result: TestResponse = transport(config)
            .get_with_query("/search", &[("q", "tokio")])
            .await
            .unwrap();
        assert_eq!(result.message, "found");
    }

    #[tokio::test]
    async fn test_base_path_prefix_is_kept() {
        let t = transport(create_config("https://sentry.example.com/api/0/"));
        let url = t.build_url("/projects/acme/web/").unwrap();
        assert_eq!(url.as_str(), "https://sentry.example.com/api/0/projects/acme/web/");
    }

    #[tokio::test]
    async fn test_not_found_maps_to_none() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let result: Option<TestResponse> = transport(create_config(&server.uri()))
            .get_optional("/missing")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_retries_gateway_errors_on_get() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "recovered".to_string(),
                value: 3,
            }))
            .mount(&server)
            .await;

        let result: TestResponse = transport(create_config_with_retries(&server.uri(), 3))
            .get("/flaky")
            .await
            .unwrap();
        assert_eq!(result.message, "recovered");
    }

    #[tokio::test]
    async fn test_post_not_replayed_after_gateway_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/create"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let result: BackendResult<TestResponse> = transport(create_config_with_retries(&server.uri(), 3))
            .post("/create", &serde_json::json!({"name": "x"}))
            .await;
        assert!(matches!(result, Err(BackendError::Transient(_))));
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_typed_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(3)
            .mount(&server)
            .await;

        let result: BackendResult<TestResponse> = transport(create_config_with_retries(&server.uri(), 2))
            .get("/busy")
            .await;
        assert!(matches!(
            result,
            Err(BackendError::RateLimited { retry_after_secs: Some(0) })
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result: BackendResult<TestResponse> = transport(create_config(&server.uri()))
            .get("/garbled")
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
        assert_eq!(err.kind(), toolsuite_core::ErrorKind::BackendError);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Port 9 (discard) on localhost is not expected to be listening
        let result: BackendResult<TestResponse> = transport(create_config("http://127.0.0.1:9"))
            .get("/anything")
            .await;
        assert_eq!(
            result.unwrap_err().kind(),
            toolsuite_core::ErrorKind::TransientNetworkError
        );
    }

    #[tokio::test]
    async fn test_require_token() {
        let t = transport(create_config("https://api.github.com"));
        let err = t.require_token("GITHUB_TOKEN").unwrap_err();
        assert!(matches!(err, BackendError::MissingCredential("GITHUB_TOKEN")));
    }
}
