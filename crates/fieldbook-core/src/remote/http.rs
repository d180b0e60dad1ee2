//! HTTP implementation of the remote record store.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::RemoteApi;
use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url};

/// REST client for the backend record store.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl HttpRemote {
    /// Build a client for an explicit API base URL.
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !is_http_url(&base_url) {
            return Err(Error::InvalidInput(
                "Remote base URL must include http:// or https://".to_string(),
            ));
        }
        // A blank token from the environment means unauthenticated, not an
        // empty bearer header.
        let auth_token = crate::util::normalize_text_option(auth_token);
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::remote_retryable(format!("HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            client,
            auth_token,
        })
    }

    /// Base URL this client was configured with.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), compact_text(&body));
        // Server-side trouble and throttling are worth retrying; anything
        // else is a rejection the outbox must not loop on.
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(Error::remote_retryable(message))
        } else {
            Err(Error::remote_rejected(message))
        }
    }

    fn transport_error(error: &reqwest::Error) -> Error {
        Error::remote_retryable(format!("Request failed: {error}"))
    }
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    record_id: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    records: Vec<serde_json::Value>,
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn create(&self, table: &str, payload: &serde_json::Value) -> Result<String> {
        let url = format!("{}/v1/tables/{table}/records", self.base_url);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        let response = Self::check(response).await?;

        let body = response
            .json::<CreateResponse>()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        body.record_id
            .or(body.id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                Error::remote_rejected("Create response did not include a record id")
            })
    }

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let url = format!(
            "{}/v1/tables/{table}/records/{}",
            self.base_url,
            urlencoding::encode(record_id)
        );
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, record_id: &str) -> Result<()> {
        let url = format!(
            "{}/v1/tables/{table}/records/{}",
            self.base_url,
            urlencoding::encode(record_id)
        );
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn signed_file_url(&self, key: &str) -> Result<String> {
        let url = format!(
            "{}/v1/files/signed?key={}",
            self.base_url,
            urlencoding::encode(key)
        );
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        let response = Self::check(response).await?;
        let body = response
            .json::<SignedUrlResponse>()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        Ok(body.url)
    }

    async fn list(
        &self,
        table: &str,
        filter: &serde_json::Value,
    ) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/v1/tables/{table}/query", self.base_url);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(filter)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        let response = Self::check(response).await?;
        let body = response
            .json::<ListResponse>()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        Ok(body.records)
    }
}
