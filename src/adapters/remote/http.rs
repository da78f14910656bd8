//! HTTP implementation of the remote client port.

use async_trait::async_trait;
use reqwest::{header, Client, Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::errors::RemoteError;
use crate::domain::models::RemoteConfig;
use crate::domain::ports::{Endpoint, HttpMethod, RemoteClient};

/// Bearer-authenticated JSON client for the fleet API.
///
/// Classifies failures for the retry layer: connection errors, timeouts,
/// 429 and 5xx are transient; other statuses are permanent.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    http: Client,
    base_url: String,
}

impl HttpRemoteClient {
    /// Build the HTTP client; fails if TLS setup or headers are invalid.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            let value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RemoteError::Permanent {
                    status: 0,
                    message: format!("invalid token: {e}"),
                })?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RemoteError::Permanent {
                status: 0,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        info!(
            base_url = %config.base_url,
            authenticated = config.token.is_some(),
            "remote client initialized"
        );
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path.trim_start_matches('/'))
    }

    async fn classify(response: Response) -> RemoteError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_string());
        warn!(status = %status, body = %body, "remote call failed");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            RemoteError::Transient(format!("{status}: {body}"))
        } else {
            RemoteError::Permanent {
                status: status.as_u16(),
                message: body,
            }
        }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Patch => Method::PATCH,
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn call(&self, endpoint: &Endpoint, payload: Option<Value>) -> Result<Value, RemoteError> {
        debug!(endpoint = %endpoint, "remote call");
        let mut request = self.http.request(method(endpoint.method), self.url(endpoint));
        if let Some(body) = &payload {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                RemoteError::Transient(e.to_string())
            } else {
                RemoteError::Permanent {
                    status: 0,
                    message: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
