// src/services/osu.rs

//! Upstream catalog API client.
//!
//! Handles the OAuth2 token lifecycle, rate governance and response
//! classification. No retries happen here; callers decide what to do with a
//! failed call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Beatmap, BeatmapSet, SearchPage, SearchQuery, UpstreamConfig};
use crate::services::CatalogSource;
use crate::services::rate_limit::RateLimiter;

/// Decoded body of a successful upstream call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// `application/json`
    Json(Value),
    /// `text/plain`
    Text(String),
    /// `application/octet-stream` and anything unrecognized
    Binary(Vec<u8>),
}

impl ApiResponse {
    /// Decode a body according to its content type.
    pub fn classify(path: &str, content_type: Option<&str>, body: Vec<u8>) -> Result<Self> {
        let content_type = content_type
            .ok_or_else(|| AppError::unexpected(path, "missing content-type header"))?;
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/json" => Ok(Self::Json(serde_json::from_slice(&body)?)),
            "text/plain" => String::from_utf8(body)
                .map(Self::Text)
                .map_err(|e| AppError::unexpected(path, e)),
            _ => Ok(Self::Binary(body)),
        }
    }

    /// Deserialize a structured-data response into `T`.
    pub fn into_json<T: DeserializeOwned>(self, path: &str) -> Result<T> {
        match self {
            Self::Json(value) => serde_json::from_value(value)
                .map_err(|e| AppError::malformed(format!("{path}: {e}"))),
            Self::Text(_) => Err(AppError::unexpected(path, "expected JSON, got text")),
            Self::Binary(_) => Err(AppError::unexpected(path, "expected JSON, got binary")),
        }
    }
}

/// Access token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_at: Instant,
}

impl AccessToken {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct BeatmapsResponse {
    #[serde(default)]
    beatmaps: Vec<Beatmap>,
}

/// Client for the upstream catalog API.
pub struct OsuClient {
    config: UpstreamConfig,
    http: Client,
    limiter: RateLimiter,
    token: Mutex<Option<AccessToken>>,
}

impl OsuClient {
    /// Create a new client from configuration.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let limiter = RateLimiter::new(config.request_interval(), config.max_requests_per_minute);

        Ok(Self {
            config,
            http,
            limiter,
            token: Mutex::new(None),
        })
    }

    /// Exchange credentials for a fresh access token.
    ///
    /// Uses the resource-owner grant when a username is configured and the
    /// client-credentials grant otherwise.
    pub async fn authenticate(&self) -> Result<AccessToken> {
        let mut form = vec![
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
            ("scope", self.config.scope.clone()),
        ];
        match (&self.config.username, &self.config.password) {
            (Some(username), Some(password)) => {
                form.push(("grant_type", "password".to_string()));
                form.push(("username", username.clone()));
                form.push(("password", password.clone()));
            }
            _ => form.push(("grant_type", "client_credentials".to_string())),
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::auth(format!("token endpoint returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::auth(format!("token body unreadable: {e}")))?;
        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| AppError::auth(format!("token response malformed: {e}")))?;

        log::info!("Authenticated with upstream, token valid for {}s", token.expires_in);

        Ok(AccessToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }

    /// Return a valid bearer token, re-authenticating if the current one expired.
    async fn bearer(&self) -> Result<String> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.access_token.clone());
        }

        let token = self.authenticate().await?;
        let bearer = token.access_token.clone();
        *slot = Some(token);
        drop(slot);

        // One spacing interval between the token exchange and the real call.
        sleep(self.limiter.interval()).await;
        Ok(bearer)
    }

    fn url(&self, path: &str) -> Result<Url> {
        let raw = format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&raw)?)
    }

    /// Perform one rate-governed, authenticated call.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse> {
        self.limiter.acquire().await;
        let bearer = self.bearer().await?;
        let url = self.url(path)?;

        log::debug!("{} {}", method, url);

        let response = self
            .http
            .request(method, url)
            .query(params)
            .bearer_auth(bearer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::request(status.as_u16(), path));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?.to_vec();

        ApiResponse::classify(path, content_type.as_deref(), body)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.request(Method::GET, path, params)
            .await?
            .into_json(path)
    }
}

#[async_trait]
impl CatalogSource for OsuClient {
    async fn beatmapset(&self, id: u64) -> Result<BeatmapSet> {
        self.get_json(&format!("beatmapsets/{id}"), &[]).await
    }

    async fn beatmap(&self, id: u64) -> Result<Beatmap> {
        self.get_json(&format!("beatmaps/{id}"), &[]).await
    }

    async fn beatmaps(&self, ids: &[u64]) -> Result<Vec<Beatmap>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<_> = ids.iter().map(|id| ("ids[]", id.to_string())).collect();
        let response: BeatmapsResponse = self.get_json("beatmaps", &params).await?;
        Ok(response.beatmaps)
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        self.get_json("beatmapsets/search", &query.params()).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config_for(server: &MockServer) -> UpstreamConfig {
        UpstreamConfig {
            api_base_url: format!("{}/api/v2", server.uri()),
            token_url: format!("{}/oauth/token", server.uri()),
            client_id: "1".to_string(),
            client_secret: "secret".to_string(),
            request_interval_ms: 0,
            ..UpstreamConfig::default()
        }
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 86400,
                "token_type": "Bearer"
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn classify_by_content_type() {
        let json = ApiResponse::classify(
            "/x",
            Some("application/json; charset=utf-8"),
            br#"{"id":1}"#.to_vec(),
        )
        .unwrap();
        assert_eq!(json, ApiResponse::Json(json!({"id": 1})));

        let text = ApiResponse::classify("/x", Some("text/plain"), b"hello".to_vec()).unwrap();
        assert_eq!(text, ApiResponse::Text("hello".to_string()));

        let bin =
            ApiResponse::classify("/x", Some("application/octet-stream"), vec![0, 1]).unwrap();
        assert_eq!(bin, ApiResponse::Binary(vec![0, 1]));

        assert!(ApiResponse::classify("/x", None, vec![]).is_err());
    }

    #[tokio::test]
    async fn fetches_set_with_bearer_token_reused() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/beatmapsets/42"))
            .and(header_is("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "status": "ranked",
                "beatmaps": [{"id": 100, "status": "ranked"}]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = OsuClient::new(config_for(&server)).unwrap();
        let set = client.beatmapset(42).await.unwrap();
        assert_eq!(set.id, 42);
        assert_eq!(set.beatmaps.len(), 1);

        client.beatmapset(42).await.unwrap();
    }

    #[tokio::test]
    async fn not_found_is_a_typed_request_error() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/beatmapsets/7"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = OsuClient::new(config_for(&server)).unwrap();
        let err = client.beatmapset(7).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn server_error_keeps_status() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/beatmaps/5"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = OsuClient::new(config_for(&server)).unwrap();
        let err = client.beatmap(5).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn payload_missing_required_fields_is_malformed() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/beatmapsets/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5, "title": "x"})))
            .mount(&server)
            .await;

        let client = OsuClient::new(config_for(&server)).unwrap();
        let err = client.beatmapset(5).await.unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn expired_token_is_renewed_then_spaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "short-lived",
                "expires_in": 0
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/beatmaps/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 5, "beatmapset_id": 1, "status": "ranked"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let interval = Duration::from_millis(200);
        let mut config = config_for(&server);
        config.request_interval_ms = interval.as_millis() as u64;
        let client = OsuClient::new(config).unwrap();

        client.beatmap(5).await.unwrap();
        let started = Instant::now();
        client.beatmap(5).await.unwrap();
        assert!(started.elapsed() >= interval);

        let requests = server.received_requests().await.unwrap();
        let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
        assert_eq!(
            paths,
            ["/oauth/token", "/api/v2/beatmaps/5", "/oauth/token", "/api/v2/beatmaps/5"]
        );
    }

    #[tokio::test]
    async fn rejected_credentials_are_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = OsuClient::new(config_for(&server)).unwrap();
        let err = client.beatmap(1).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[tokio::test]
    async fn resource_owner_grant_when_username_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=player"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "owner",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config_for(&server);
        config.username = Some("player".to_string());
        config.password = Some("hunter2".to_string());

        let client = OsuClient::new(config).unwrap();
        let token = client.authenticate().await.unwrap();
        assert_eq!(token.access_token, "owner");
    }

    #[tokio::test]
    async fn batch_fetch_sends_repeated_ids() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/beatmaps"))
            .and(query_param("ids[]", "11"))
            .and(query_param("ids[]", "12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "beatmaps": [{"id": 11, "beatmapset_id": 3, "status": "pending"}]
            })))
            .mount(&server)
            .await;

        let client = OsuClient::new(config_for(&server)).unwrap();
        let maps = client.beatmaps(&[11, 12]).await.unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].beatmapset_id, 3);
    }

    #[tokio::test]
    async fn search_passes_cursor_string() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        let cursor = crate::models::CrawlCursor::new(json!({"id": 77}));
        Mock::given(method("GET"))
            .and(path("/api/v2/beatmapsets/search"))
            .and(query_param("sort", "updated_desc"))
            .and(query_param("cursor_string", cursor.to_cursor_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "beatmapsets": [{"id": 1, "status": "graveyard"}],
                "cursor": null,
                "total": 1
            })))
            .mount(&server)
            .await;

        let client = OsuClient::new(config_for(&server)).unwrap();
        let page = client
            .search(&SearchQuery::recently_updated("updated_desc", Some(cursor)))
            .await
            .unwrap();
        assert_eq!(page.beatmapsets.len(), 1);
        assert!(page.next_cursor().is_none());
    }
}
