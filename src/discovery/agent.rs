//! HTTP agent discovery backend
//!
//! Speaks a Consul-style agent API: services register with a TTL check and
//! stay alive by passing it; the catalog answers name resolution.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ResilienceError;
use crate::types::RegistrationRecord;
use crate::ResilienceResult;

use super::backend::DiscoveryBackend;

const AGENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Discovery backend talking to an agent over its HTTP API.
pub struct AgentBackend {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl AgentBackend {
    /// Create a backend for the agent at `endpoint`.
    pub fn new(endpoint: String, token: Option<String>) -> ResilienceResult<Self> {
        let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint
        } else {
            format!("http://{}", endpoint)
        };

        let http = reqwest::Client::builder()
            .timeout(AGENT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                ResilienceError::Internal(format!("failed to build agent http client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    fn ttl_check_id(service_name: &str) -> String {
        format!("service:{}:ttl", service_name)
    }

    async fn get(&self, path: &str) -> ResilienceResult<reqwest::Response> {
        let url = format!("{}/v1{}", self.base_url, path);
        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }
        request
            .send()
            .await
            .map_err(|e| ResilienceError::RegistryUnavailable(e.to_string()))
    }

    async fn put(&self, path: &str, body: Option<Value>) -> ResilienceResult<reqwest::Response> {
        let url = format!("{}/v1{}", self.base_url, path);
        let mut request = self.http.put(&url);
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        request
            .send()
            .await
            .map_err(|e| ResilienceError::RegistryUnavailable(e.to_string()))
    }
}

#[async_trait]
impl DiscoveryBackend for AgentBackend {
    async fn resolve(&self, service_name: &str) -> ResilienceResult<Option<String>> {
        let response = self
            .get(&format!("/catalog/service/{}", service_name))
            .await?;

        if !response.status().is_success() {
            return Err(ResilienceError::RegistryUnavailable(format!(
                "catalog query for {} returned HTTP {}",
                service_name,
                response.status()
            )));
        }

        let entries: Vec<Value> = response
            .json()
            .await
            .map_err(|e| ResilienceError::RegistryUnavailable(e.to_string()))?;

        let Some(entry) = entries.first() else {
            return Ok(None);
        };

        let address = entry["ServiceAddress"]
            .as_str()
            .filter(|a| !a.is_empty())
            .or_else(|| entry["Address"].as_str());
        let port = entry["ServicePort"].as_u64();

        match (address, port) {
            (Some(address), Some(port)) => {
                let url = if port == 80 {
                    format!("http://{}", address)
                } else {
                    format!("http://{}:{}", address, port)
                };
                debug!(service = service_name, %url, "resolved from agent catalog");
                Ok(Some(url))
            }
            _ => Ok(None),
        }
    }

    async fn register(&self, record: &RegistrationRecord) -> ResilienceResult<()> {
        let ttl_secs = record.ttl.as_secs().max(1);
        let body = json!({
            "ID": record.service_name,
            "Name": record.service_name,
            "Address": record.host,
            "Port": record.port,
            "Meta": {
                "health_check_url": record.health_check_url,
            },
            "Check": {
                "CheckID": Self::ttl_check_id(&record.service_name),
                "TTL": format!("{}s", ttl_secs),
                "DeregisterCriticalServiceAfter": format!("{}s", ttl_secs),
            },
        });

        let response = self.put("/agent/service/register", Some(body)).await?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ResilienceError::Registration(format!(
                "agent rejected registration of {}: HTTP {} {}",
                record.service_name, status, detail
            )));
        }

        info!(service = %record.service_name, "registered with discovery agent");
        Ok(())
    }

    async fn heartbeat(&self, service_name: &str) -> ResilienceResult<()> {
        let path = format!("/agent/check/pass/{}", Self::ttl_check_id(service_name));
        let response = self.put(&path, None).await?;
        if !response.status().is_success() {
            return Err(ResilienceError::Registration(format!(
                "heartbeat for {} returned HTTP {}",
                service_name,
                response.status()
            )));
        }
        debug!(service = service_name, "heartbeat acknowledged");
        Ok(())
    }

    async fn deregister(&self, service_name: &str) -> ResilienceResult<()> {
        let path = format!("/agent/service/deregister/{}", service_name);
        let response = self.put(&path, None).await?;
        if !response.status().is_success() {
            return Err(ResilienceError::Registration(format!(
                "deregistration of {} returned HTTP {}",
                service_name,
                response.status()
            )));
        }
        info!(service = service_name, "deregistered from discovery agent");
        Ok(())
    }
}
