//! Hosted backend API client.
//!
//! Every endpoint answers with the envelope `{ success, data?, error? }`.
//! A non-2xx status and a `success: false` body are both surfaced as
//! [`Error::Remote`]; transport failures become [`Error::Network`] with a
//! message suitable for the operator.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{Customer, CustomerDraft, PriceTable, SalePayload};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used for the lightweight health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub const SALES_SYNC_PATH: &str = "/api/sales/offline-sync";
pub const CUSTOMERS_PATH: &str = "/api/customers";
pub const CUSTOMER_SEARCH_PATH: &str = "/api/customers/search";
pub const PRICES_PATH: &str = "/api/prices";
pub const HEALTH_PATH: &str = "/api/health";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Collapse the envelope: `success: false` becomes a remote error.
    pub fn into_result(self) -> Result<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(Error::remote(
                None,
                self.error
                    .unwrap_or_else(|| "Backend reported failure".to_string()),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
struct CustomerSearchRequest<'a> {
    name: &'a str,
}

/// Backend operations used by the offline core.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn submit_sale(&self, sale: &SalePayload) -> Result<Option<Value>>;
    /// Empty `name` lists every customer.
    async fn search_customers(&self, name: &str) -> Result<Vec<Customer>>;
    async fn create_customer(&self, draft: &CustomerDraft) -> Result<Option<Customer>>;
    async fn update_customer(&self, id: &str, draft: &CustomerDraft) -> Result<Option<Customer>>;
    async fn fetch_prices(&self) -> Result<PriceTable>;
    async fn health_check(&self) -> bool;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
pub fn friendly_error(url: &str, err: &reqwest::Error) -> Error {
    let message = if err.is_connect() {
        format!("Cannot reach backend at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid backend URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    Error::Network(message)
}

/// Convert an HTTP status code into a user-friendly message.
pub fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "User not authorized for this action".to_string(),
        404 => "Backend endpoint not found".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected response from backend (HTTP {s})"),
    }
}

/// Build the error for a non-2xx response, preferring the backend's own
/// `error`/`message` field when the body is JSON.
fn error_from_body(status: StatusCode, body_text: &str) -> Error {
    let code = status.as_u16();
    let message = match serde_json::from_str::<Value>(body_text) {
        Ok(json) => {
            let message = json
                .get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status_error(status));
            format!("{message} (HTTP {code})")
        }
        Err(_) if !body_text.trim().is_empty() => {
            format!("{} (HTTP {code}): {}", status_error(status), body_text.trim())
        }
        Err(_) => status_error(status),
    };
    Error::remote(Some(code), message)
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    access_token: Option<String>,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        access_token: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            api_key,
            access_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("Content-Type", "application/json");
        if let Some(key) = self.api_key.as_deref() {
            req = req.header("apikey", key);
        }
        if let Some(token) = self.access_token.as_deref() {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Send a request and unwrap the `{ success, data, error }` envelope.
    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Option<T>>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let mut req = self.request(method.clone(), path);
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let err = error_from_body(status, &body_text);
            warn!(%method, path, status = status.as_u16(), error = %err, "backend request failed");
            return Err(err);
        }
        if body_text.trim().is_empty() {
            return Err(Error::remote(
                Some(status.as_u16()),
                "Empty response from backend",
            ));
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&body_text)?;
        debug!(%method, path, success = envelope.success, "backend response");
        envelope.into_result()
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn submit_sale(&self, sale: &SalePayload) -> Result<Option<Value>> {
        self.call(Method::POST, SALES_SYNC_PATH, Some(sale)).await
    }

    async fn search_customers(&self, name: &str) -> Result<Vec<Customer>> {
        let body = CustomerSearchRequest { name };
        let customers: Option<Vec<Customer>> = self
            .call(Method::POST, CUSTOMER_SEARCH_PATH, Some(&body))
            .await?;
        Ok(customers.unwrap_or_default())
    }

    async fn create_customer(&self, draft: &CustomerDraft) -> Result<Option<Customer>> {
        self.call(Method::POST, CUSTOMERS_PATH, Some(draft)).await
    }

    async fn update_customer(&self, id: &str, draft: &CustomerDraft) -> Result<Option<Customer>> {
        let path = format!("{CUSTOMERS_PATH}/{id}");
        self.call(Method::PUT, &path, Some(draft)).await
    }

    async fn fetch_prices(&self) -> Result<PriceTable> {
        let prices: Option<PriceTable> = self.call::<(), _>(Method::GET, PRICES_PATH, None).await?;
        prices.ok_or_else(|| Error::remote(None, "Price list missing from response"))
    }

    async fn health_check(&self) -> bool {
        match self
            .request(Method::HEAD, HEALTH_PATH)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "health check failed");
                false
            }
        }
    }
}
