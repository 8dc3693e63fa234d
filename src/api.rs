//! HTTP client for the Airplane.dev REST API.
//!
//! [`AirplaneApi`] is the seam resources and data sources talk to;
//! [`ApiClient`] is its `reqwest` implementation.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::models::{CreateTaskRequest, CreateTaskResponse, Env, ErrorBody};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-Airplane-API-Key";

/// Header carrying the team id.
pub const TEAM_ID_HEADER: &str = "X-Team-ID";

/// Errors returned by the API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be sent or the response not received.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-2xx status.
    #[error("api: {status}: {message}")]
    Status {
        /// HTTP status of the response.
        status: StatusCode,
        /// Message from the response's `error` field, or the raw body.
        message: String,
    },

    /// The configured host cannot be turned into a base URL.
    #[error("invalid host {0:?}")]
    InvalidHost(String),

    /// A credential cannot be sent as a header value.
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),

    /// A 2xx response body did not match the expected shape.
    #[error("decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Resolved connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name, `host:port` or full URL of the API.
    pub host: String,
    /// API key, sent as [`API_KEY_HEADER`].
    pub api_key: SecretString,
    /// Team id, sent as [`TEAM_ID_HEADER`].
    pub team_id: String,
}

impl ClientConfig {
    /// The base URL requests are issued against.
    pub fn base_url(&self) -> Result<Url, ApiError> {
        base_url(&self.host)
    }
}

/// Turn a configured host into a base URL.
///
/// A host with an explicit scheme is used as-is. `localhost` and `127.0.0.1`
/// default to `http`, every other host to `https`.
pub fn base_url(host: &str) -> Result<Url, ApiError> {
    let host = host.trim();
    let invalid = || ApiError::InvalidHost(host.to_string());

    // The scheme is split off before trailing slashes are trimmed.
    let candidate = if host.contains("://") {
        host.to_string()
    } else {
        let bare = host.trim_end_matches('/');
        if bare.is_empty() {
            return Err(invalid());
        }
        let name = bare.split([':', '/']).next().unwrap_or_default();
        let scheme = if name == "localhost" || name == "127.0.0.1" {
            "http"
        } else {
            "https"
        };
        format!("{}://{}", scheme, bare)
    };

    let url = Url::parse(&candidate).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
        return Err(invalid());
    }
    Ok(url)
}

/// Operations the provider performs against the remote API.
#[async_trait]
pub trait AirplaneApi: Send + Sync {
    /// Fetch an environment by slug.
    async fn get_env(&self, slug: &str) -> Result<Env, ApiError>;

    /// Create a task.
    async fn create_task(&self, request: &CreateTaskRequest)
        -> Result<CreateTaskResponse, ApiError>;
}

/// `reqwest`-backed [`AirplaneApi`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    /// Build a client; credentials are attached to every request.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let base = config.base_url()?;

        let mut api_key = HeaderValue::from_str(config.api_key.expose_secret())
            .map_err(|_| ApiError::InvalidHeader(API_KEY_HEADER))?;
        api_key.set_sensitive(true);
        let team_id = HeaderValue::from_str(&config.team_id)
            .map_err(|_| ApiError::InvalidHeader(TEAM_ID_HEADER))?;

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, api_key);
        headers.insert(TEAM_ID_HEADER, team_id);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                "terraform-provider-airplanedev/",
                env!("CARGO_PKG_VERSION")
            )),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// The base URL this client talks to, without a trailing slash.
    pub fn base(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

#[async_trait]
impl AirplaneApi for ApiClient {
    async fn get_env(&self, slug: &str) -> Result<Env, ApiError> {
        debug!(slug, "GET /v0/envs/get");
        let response = self
            .http
            .get(self.endpoint("/v0/envs/get"))
            .query(&[("slug", slug)])
            .send()
            .await?;
        decode(response).await
    }

    async fn create_task(
        &self,
        request: &CreateTaskRequest,
    ) -> Result<CreateTaskResponse, ApiError> {
        debug!(
            slug = %request.slug,
            parameters = request.parameters.len(),
            "POST /v0/tasks/create"
        );
        let response = self
            .http
            .post(self.endpoint("/v0/tasks/create"))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let message = match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => err.error,
            Err(_) => String::from_utf8_lossy(&body).trim().to_string(),
        };
        return Err(ApiError::Status { status, message });
    }

    Ok(serde_json::from_slice(&body)?)
}
