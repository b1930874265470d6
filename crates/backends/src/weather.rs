//! Current-conditions lookup against an OpenWeatherMap-compatible API.

use crate::config::EndpointConfig;
use crate::error::{BackendError, BackendResult};
use crate::transport::{AuthStyle, HttpTransport};
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const KEY_SETTING: &str = "OPENWEATHER_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherArgs {
    pub location: String,
}

#[derive(Debug, Deserialize)]
struct Observation {
    name: Option<String>,
    #[serde(default)]
    weather: Vec<Condition>,
    main: Option<Readings>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Readings {
    temp: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentWeather {
    pub location: String,
    pub conditions: String,
    pub temperature_c: Option<f64>,
    pub humidity_percent: Option<f64>,
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct WeatherClient {
    transport: HttpTransport,
}

impl WeatherClient {
    pub fn new(config: Arc<EndpointConfig>) -> BackendResult<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        let transport = HttpTransport::new(config, AuthStyle::None, headers)?;
        Ok(Self { transport })
    }

    pub async fn current(&self, args: WeatherArgs) -> BackendResult<CurrentWeather> {
        let key = self.transport.require_token(KEY_SETTING)?;
        let observation: Observation = self
            .transport
            .get_with_query(
                "/weather",
                &[("q", args.location.as_str()), ("appid", key), ("units", "metric")],
            )
            .await
            .map_err(|e| match e {
                BackendError::NotFound(_) => {
                    BackendError::NotFound(format!("Location '{}' not found", args.location))
                }
                other => other,
            })?;

        let conditions = observation
            .weather
            .first()
            .and_then(|c| c.description.as_deref())
            .map(capitalize)
            .unwrap_or_else(|| "N/A".to_string());
        let main = observation.main;

        Ok(CurrentWeather {
            location: observation.name.unwrap_or_else(|| args.location.clone()),
            conditions,
            temperature_c: main.as_ref().and_then(|m| m.temp),
            humidity_percent: main.as_ref().and_then(|m| m.humidity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use serde_json::json;
    use toolsuite_core::ErrorKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, key: Option<&str>) -> WeatherClient {
        let config = EndpointConfig::new(url::Url::parse(&server.uri()).unwrap())
            .with_token(key.map(str::to_string))
            .with_retry(RetryConfig::no_retry());
        WeatherClient::new(Arc::new(config)).unwrap()
    }

    fn args(location: &str) -> WeatherArgs {
        WeatherArgs {
            location: location.to_string(),
        }
    }

    #[tokio::test]
    async fn test_current_weather() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("q", "Oslo"))
            .and(query_param("appid", "k-123"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Oslo",
                "weather": [{"description": "light snow"}],
                "main": {"temp": -3.5, "humidity": 86}
            })))
            .mount(&server)
            .await;

        let weather = client(&server, Some("k-123")).current(args("Oslo")).await.unwrap();
        assert_eq!(
            weather,
            CurrentWeather {
                location: "Oslo".to_string(),
                conditions: "Light snow".to_string(),
                temperature_c: Some(-3.5),
                humidity_percent: Some(86.0),
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"cod": "404", "message": "city not found"})))
            .mount(&server)
            .await;

        let err = client(&server, Some("k")).current(args("Atlantis")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("Atlantis"));
    }

    #[tokio::test]
    async fn test_bad_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"cod": 401, "message": "Invalid API key"})))
            .mount(&server)
            .await;

        let err = client(&server, Some("wrong")).current(args("Oslo")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthError);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let server = MockServer::start().await;
        let err = client(&server, None).current(args("Oslo")).await.unwrap_err();
        assert!(matches!(err, BackendError::MissingCredential("OPENWEATHER_API_KEY")));
    }
}
