//! HTTP client for communicating with the Jobline API server.

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// API response wrapper matching the server's ApiResponse format.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
}

/// Error body returned by the server on failure.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    code: String,
    message: String,
}

/// HTTP client for the Jobline API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a GET request and deserialize the response data.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        unwrap_data(resp, &url).await
    }

    /// Perform a POST request with a JSON body and deserialize the response.
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        unwrap_data(resp, &url).await
    }

    /// Perform a raw GET request and return the status and JSON body.
    ///
    /// Used for `/health`, which answers 503 with a useful body.
    pub async fn get_raw(&self, path: &str) -> Result<(reqwest::StatusCode, serde_json::Value)> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = resp.status();
        let body = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;
        Ok((status, body))
    }
}

async fn unwrap_data<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => anyhow::bail!("API error ({}): {} {}", status, err.error.code, err.error.message),
            Err(_) => anyhow::bail!("API error ({}): {}", status, body),
        }
    }

    let api_resp: ApiResponse<T> = resp
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))?;

    match (api_resp.success, api_resp.data) {
        (true, Some(data)) => Ok(data),
        (true, None) => Err(anyhow::anyhow!("API returned success but no data")),
        (false, _) => Err(anyhow::anyhow!("API reported failure for {}", url)),
    }
}
