//! REST client for the networking backend.
//!
//! A thin pass-through: each call maps onto one collection endpoint and the
//! backend's response body is returned unchanged.

use std::time::Duration;

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;

use netplane_core::replication::DataType;

use crate::error::{BackendError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Error body the backend returns on failure.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
}

/// URL path segment of the collection holding `data_type`.
pub fn collection_path(data_type: DataType) -> Result<&'static str> {
    let path = match data_type {
        DataType::Network => "networks",
        DataType::Subnet => "subnets",
        DataType::Port => "ports",
        DataType::Router => "routers",
        DataType::FloatingIp => "floatingips",
        DataType::SecurityGroup => "security-groups",
        DataType::SecurityGroupRule => "security-group-rules",
        DataType::Pool => "lb/pools",
        DataType::Vip => "lb/vips",
        DataType::HealthMonitor => "lb/health_monitors",
        DataType::Member => "lb/members",
        DataType::PortBinding => "port-bindings",
        DataType::Config => {
            return Err(BackendError::invalid_request(format!(
                "{data_type} has no backend collection"
            )))
        }
    };
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BackendClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Backend] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Backend] Response error ({}): {}", status, preview);
    }

    /// Create a backend client.
    ///
    /// `base_url` is the API root (e.g. "http://controller:9696/v2.0"); a
    /// trailing slash is ignored.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| BackendError::auth("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        Ok(headers)
    }

    fn collection_url(&self, data_type: DataType) -> Result<String> {
        Ok(format!("{}/{}", self.base_url, collection_path(data_type)?))
    }

    fn resource_url(&self, data_type: DataType, id: &str) -> Result<String> {
        if id.trim().is_empty() {
            return Err(BackendError::invalid_request(format!(
                "{data_type} id must not be empty"
            )));
        }
        Ok(format!(
            "{}/{}",
            self.collection_url(data_type)?,
            urlencoding::encode(id)
        ))
    }

    /// Parse a JSON response body. An empty success body yields `Value::Null`.
    async fn parse_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(BackendError::api(
                    status.as_u16(),
                    format!("{}: {}", error.code, error.message),
                ));
            }
            return Err(BackendError::api(status.as_u16(), format!("Request failed: {}", body)));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "[Backend] Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            BackendError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// POST {base}/{collection}
    pub async fn create_resource(&self, data_type: DataType, body: &Value) -> Result<Value> {
        let url = self.collection_url(data_type)?;
        debug!("[Backend] POST {}", url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// PUT {base}/{collection}/{id}
    pub async fn update_resource(
        &self,
        data_type: DataType,
        id: &str,
        body: &Value,
    ) -> Result<Value> {
        let url = self.resource_url(data_type, id)?;
        debug!("[Backend] PUT {}", url);

        let response = self
            .client
            .put(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// DELETE {base}/{collection}/{id}
    pub async fn delete_resource(&self, data_type: DataType, id: &str) -> Result<()> {
        let url = self.resource_url(data_type, id)?;
        debug!("[Backend] DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .headers(self.headers()?)
            .send()
            .await?;

        Self::parse_response(response).await.map(|_| ())
    }
}
