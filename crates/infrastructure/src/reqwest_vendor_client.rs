use std::time::Duration;

use async_trait::async_trait;
use mirrorline_application::{VendorClient, VendorMethod, VendorRequest};
use mirrorline_core::{AppError, AppResult};
use mirrorline_domain::VendorPage;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// `reqwest` implementation of the outbound vendor HTTP port.
#[derive(Clone)]
pub struct ReqwestVendorClient {
    http_client: reqwest::Client,
}

impl ReqwestVendorClient {
    /// Creates a vendor client around a configured `reqwest` client.
    #[must_use]
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Creates a vendor client whose requests time out after `timeout`.
    pub fn with_timeout(timeout: Duration) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mirrorline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build vendor HTTP client: {error}"))
            })?;
        Ok(Self::new(http_client))
    }
}

fn request_url(request: &VendorRequest) -> AppResult<Url> {
    let mut url = Url::parse(request.url.as_str()).map_err(|error| {
        AppError::Validation(format!("invalid vendor URL '{}': {error}", request.url))
    })?;
    if !request.query.is_empty() {
        url.query_pairs_mut().extend_pairs(
            request
                .query
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );
    }
    Ok(url)
}

fn parse_body(url: &Url, bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }

    serde_json::from_slice(bytes).unwrap_or_else(|error| {
        debug!(url = %url, error = %error, "vendor response body is not JSON");
        Value::Null
    })
}

#[async_trait]
impl VendorClient for ReqwestVendorClient {
    async fn send(&self, request: &VendorRequest) -> AppResult<VendorPage> {
        let url = request_url(request)?;
        let mut builder = match request.method {
            VendorMethod::Get => self.http_client.get(url.clone()),
            VendorMethod::Post => self.http_client.post(url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| {
            AppError::Transport(format!("vendor request to '{url}' failed: {error}"))
        })?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|error| {
            AppError::Transport(format!(
                "failed to read vendor response body from '{url}': {error}"
            ))
        })?;

        debug!(url = %url, status, "vendor response received");
        Ok(VendorPage {
            status,
            headers,
            body: parse_body(&url, &bytes),
        })
    }
}
