use crate::backend::DnsApi;
use crate::constants::{API_REQUEST_TIMEOUT, CLOUDFLARE_API_BASE};
use crate::errors::{Result, TunnelError};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct CloudflareApi {
    client: reqwest::Client,
    api_token: String,
    base_url: String,
}

impl CloudflareApi {
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_token, CLOUDFLARE_API_BASE)
    }

    pub fn with_base_url(
        api_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Self::build(api_token.into(), base_url.into(), API_REQUEST_TIMEOUT)
    }

    // Teardown must not hang on an unresponsive API.
    fn build(api_token: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, name: &str) -> Result<T> {
        tracing::debug!("GET {}?name={}", url, name);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .query(&[("name", name)])
            .send()
            .await?;

        let api_response: ApiResponse<T> = response.json().await?;
        api_response.into_result()
    }
}

#[async_trait]
impl DnsApi for CloudflareApi {
    async fn find_zone_id(&self, domain: &str) -> Result<Option<String>> {
        let url = format!("{}/zones", self.base_url);
        let zones: Vec<ApiObject> = self.get(&url, domain).await?;
        Ok(zones.into_iter().next().map(|z| z.id))
    }

    async fn find_record_id(&self, zone_id: &str, hostname: &str) -> Result<Option<String>> {
        let url = format!("{}/zones/{}/dns_records", self.base_url, zone_id);
        let records: Vec<ApiObject> = self.get(&url, hostname).await?;
        Ok(records.into_iter().next().map(|r| r.id))
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record_id
        );
        tracing::debug!("DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let api_response: ApiResponse<ApiObject> = response.json().await?;
        api_response.into_result().map(|_| ())
    }
}

// ============ API Types ============

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T> {
        if !self.success {
            let error_msg = self
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(TunnelError::Api(error_msg));
        }

        self.result
            .ok_or_else(|| TunnelError::Api("Response has no result".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[allow(dead_code)]
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiObject {
    id: String,
}
