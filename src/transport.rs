//! Outbound HTTP transport
//!
//! A single request with a deadline. The trait exists so tests can script
//! transport behavior; production uses the reqwest implementation.

use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ResilienceError;
use crate::ResilienceResult;

/// One outbound request, fully assembled by the client.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
}

/// Response from a peer service.
///
/// The transport returns a response for every status code; mapping error
/// statuses into the error taxonomy happens in the client.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ServiceResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> ResilienceResult<T> {
        serde_json::from_str(&self.body).map_err(ResilienceError::from)
    }
}

/// HTTP client primitive: perform a single request within `timeout`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        request: TransportRequest,
        timeout: Duration,
    ) -> ResilienceResult<ServiceResponse>;
}

/// Production transport backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> ResilienceResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ResilienceError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: TransportRequest,
        timeout: Duration,
    ) -> ResilienceResult<ServiceResponse> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = response.text().await?;
        Ok(ServiceResponse {
            status,
            headers,
            body,
        })
    }
}
