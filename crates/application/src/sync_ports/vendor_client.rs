use async_trait::async_trait;
use mirrorline_core::AppResult;
use mirrorline_domain::VendorPage;
use serde_json::Value;

/// Outbound HTTP method. Both are safe to repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorMethod {
    /// GET with query parameters.
    Get,
    /// POST with a JSON body.
    Post,
}

/// One outbound vendor call.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRequest {
    /// Request method.
    pub method: VendorMethod,
    /// Absolute URL.
    pub url: String,
    /// Query parameters appended to the URL.
    pub query: Vec<(String, String)>,
    /// Request headers, including authentication.
    pub headers: Vec<(String, String)>,
    /// JSON body for POST requests.
    pub json_body: Option<Value>,
}

/// Outbound vendor HTTP port.
///
/// Any HTTP status is returned as a [`VendorPage`]. Network failures and
/// unreadable bodies are reported as [`mirrorline_core::AppError::Transport`].
#[async_trait]
pub trait VendorClient: Send + Sync {
    /// Sends one request.
    async fn send(&self, request: &VendorRequest) -> AppResult<VendorPage>;
}
