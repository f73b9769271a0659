//! Consul HTTP v1 backend

use super::{BackendFactory, CoordinationBackend};
use async_trait::async_trait;
use consulate_core::models::ttl_format;
use consulate_core::{
    CatalogService, CheckRegistration, CheckState, CoordinationError, Result,
    ServiceRegistration,
};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Prefix the agent gives to a service's own check id
const SERVICE_CHECK_PREFIX: &str = "service:";

#[derive(Debug, Serialize)]
struct SessionRequest {
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "Behavior")]
    behavior: &'static str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// Coordination backend speaking the Consul HTTP API
#[derive(Debug, Clone)]
pub struct ConsulHttpBackend {
    http_client: HttpClient,
    base_url: Url,
    request_timeout: Duration,
}

impl ConsulHttpBackend {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let raw = base_url.into();
        let base_url = Url::parse(&raw)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                CoordinationError::Configuration(format!("invalid Consul URL: {raw}"))
            })?;

        let http_client = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                CoordinationError::BackendUnavailable(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            base_url,
            request_timeout,
        })
    }

    /// `{base}/v1/{segments}`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CoordinationError::Configuration(format!("invalid Consul URL: {}", self.base_url))
            })?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    /// KV endpoint for `key`, keeping its `/` separators, with an optional
    /// value-less flag such as `raw` or `recurse`.
    fn kv_url(&self, key: &str, flag: Option<&str>) -> Result<Url> {
        let segments: Vec<&str> = std::iter::once("kv").chain(key.split('/')).collect();
        let mut url = self.url(&segments)?;
        if let Some(flag) = flag {
            url.query_pairs_mut().append_key_only(flag);
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| {
            CoordinationError::BackendUnavailable(format!("Consul request failed: {e}"))
        })
    }

    /// Turn a non-success status into a protocol error carrying the body.
    async fn expect_success(response: Response, action: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(CoordinationError::BackendProtocol(format!(
            "Failed to {action}: HTTP {status} - {body}"
        )))
    }

    async fn decode<T: DeserializeOwned>(response: Response, action: &str) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            CoordinationError::BackendProtocol(format!("Failed to parse {action} response: {e}"))
        })
    }

    async fn put_flag(&self, request: RequestBuilder, action: &str) -> Result<bool> {
        let response = self.send(request).await?;
        let response = Self::expect_success(response, action).await?;
        Self::decode::<bool>(response, action).await
    }

    async fn set_check(&self, check_id: &str, state: CheckState, note: Option<&str>) -> Result<()> {
        let mut request = self
            .http_client
            .put(self.url(&["agent", "check", state.endpoint(), check_id])?);
        if let Some(note) = note {
            request = request.query(&[("note", note)]);
        }

        let response = self.send(request).await?;
        if response.status().is_success() {
            trace!(check_id = %check_id, state = %state, "Check updated");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(CoordinationError::NotRegistered(format!("{check_id}: {body}")))
    }
}

#[async_trait]
impl CoordinationBackend for ConsulHttpBackend {
    async fn leader(&self) -> Result<Option<String>> {
        let request = self.http_client.get(self.url(&["status", "leader"])?);
        let response = self.send(request).await?;
        let response = Self::expect_success(response, "read leader").await?;
        let leader: String = Self::decode(response, "leader").await?;
        Ok(Some(leader).filter(|l| !l.is_empty()))
    }

    async fn is_registered(&self, registration_id: &str) -> Result<bool> {
        let request = self.http_client.get(self.url(&["agent", "services"])?);
        let response = self.send(request).await?;
        let response = Self::expect_success(response, "list agent services").await?;
        let services: HashMap<String, serde_json::Value> =
            Self::decode(response, "agent services").await?;
        Ok(services.contains_key(registration_id))
    }

    async fn register_service(&self, registration: &ServiceRegistration) -> Result<()> {
        let request = self
            .http_client
            .put(self.url(&["agent", "service", "register"])?)
            .json(registration);
        let response = self.send(request).await?;
        Self::expect_success(response, "register service").await?;
        debug!(registration_id = %registration.id, "Registered service in Consul");
        Ok(())
    }

    async fn deregister_service(&self, registration_id: &str) -> Result<()> {
        let request = self
            .http_client
            .put(self.url(&["agent", "service", "deregister", registration_id])?);
        let response = self.send(request).await?;
        Self::expect_success(response, "deregister service").await?;
        Ok(())
    }

    async fn register_check(&self, check: &CheckRegistration) -> Result<()> {
        let request = self
            .http_client
            .put(self.url(&["agent", "check", "register"])?)
            .json(check);
        let response = self.send(request).await?;
        Self::expect_success(response, "register check").await?;
        Ok(())
    }

    async fn update_check(
        &self,
        check_id: &str,
        state: CheckState,
        note: Option<&str>,
    ) -> Result<()> {
        self.set_check(check_id, state, note).await
    }

    async fn pass_service(&self, registration_id: &str, note: Option<&str>) -> Result<()> {
        let check_id = format!("{SERVICE_CHECK_PREFIX}{registration_id}");
        self.set_check(&check_id, CheckState::Pass, note).await
    }

    async fn get(&self, key: &str, wait: Option<Duration>) -> Result<Option<String>> {
        let mut request = self.http_client.get(self.kv_url(key, Some("raw"))?);
        if let Some(wait) = wait {
            request = request
                .query(&[("index", "1"), ("wait", ttl_format::to_string(wait).as_str())])
                .timeout(wait + self.request_timeout);
        }

        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success(response, "read key").await?;
        let value = response.text().await.map_err(|e| {
            CoordinationError::BackendProtocol(format!("Failed to read value of {key}: {e}"))
        })?;
        Ok(Some(value))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        if self
            .put_flag(
                self.http_client
                    .put(self.kv_url(key, None)?)
                    .body(value.to_string()),
                "write key",
            )
            .await?
        {
            Ok(())
        } else {
            Err(CoordinationError::BackendProtocol(format!(
                "Consul rejected write of {key}"
            )))
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .send(self.http_client.delete(self.kv_url(key, None)?))
            .await?;
        Self::expect_success(response, "delete key").await?;
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        let response = self
            .send(self.http_client.delete(self.kv_url(prefix, Some("recurse"))?))
            .await?;
        Self::expect_success(response, "delete tree").await?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let response = self
            .send(self.http_client.get(self.kv_url(prefix, Some("keys"))?))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = Self::expect_success(response, "list keys").await?;
        Self::decode(response, "key listing").await
    }

    async fn acquire_lock(&self, key: &str, session_id: &str) -> Result<bool> {
        let request = self
            .http_client
            .put(self.kv_url(key, None)?)
            .query(&[("acquire", session_id)]);
        self.put_flag(request, "acquire lock").await
    }

    async fn release_lock(&self, key: &str, session_id: &str) -> Result<bool> {
        let request = self
            .http_client
            .put(self.kv_url(key, None)?)
            .query(&[("release", session_id)]);
        self.put_flag(request, "release lock").await
    }

    async fn create_session(&self, ttl: Duration) -> Result<String> {
        let body = SessionRequest {
            ttl: ttl_format::to_string(ttl),
            behavior: "release",
        };
        let request = self
            .http_client
            .put(self.url(&["session", "create"])?)
            .json(&body);
        let response = self.send(request).await?;
        let response = Self::expect_success(response, "create session").await?;
        let session: SessionResponse = Self::decode(response, "session").await?;
        Ok(session.id)
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        let request = self
            .http_client
            .put(self.url(&["session", "destroy", session_id])?);
        let response = self.send(request).await?;
        Self::expect_success(response, "destroy session").await?;
        Ok(())
    }

    async fn service_instances(&self, service_name: &str) -> Result<Vec<CatalogService>> {
        let response = self
            .send(
                self.http_client
                    .get(self.url(&["catalog", "service", service_name])?),
            )
            .await?;
        let response = Self::expect_success(response, "query catalog").await?;
        Self::decode(response, "catalog").await
    }
}

/// Builds a fresh HTTP client, and with it a fresh connection pool, per connect.
#[derive(Debug, Clone)]
pub struct HttpBackendFactory {
    base_url: String,
    request_timeout: Duration,
}

impl HttpBackendFactory {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout,
        }
    }
}

impl BackendFactory for HttpBackendFactory {
    fn connect(&self) -> Result<Arc<dyn CoordinationBackend>> {
        debug!(base_url = %self.base_url, "Creating Consul HTTP client");
        Ok(Arc::new(ConsulHttpBackend::new(
            self.base_url.clone(),
            self.request_timeout,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::StatusCode as AxumStatus,
        routing::{get, put},
        Json, Router,
    };

    /// Serve a handful of Consul endpoints on an ephemeral port.
    async fn fake_consul() -> String {
        let app = Router::new()
            .route("/v1/status/leader", get(|| async { Json("10.0.0.1:8300") }))
            .route(
                "/v1/kv/{*key}",
                get(|Path(key): Path<String>| async move {
                    if key == "orders/orders-1/config/current" {
                        Ok("{\"pool\":4}".to_string())
                    } else if key.starts_with("echo/") {
                        Ok(key)
                    } else {
                        Err(AxumStatus::NOT_FOUND)
                    }
                })
                .put(|| async { Json(true) }),
            )
            .route(
                "/v1/agent/check/pass/{id}",
                put(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "Unknown check ID") }),
            )
            .route(
                "/v1/agent/check/fail/{id}",
                put(|Path(id): Path<String>| async move {
                    if id == "orders-1 disk#1" {
                        AxumStatus::OK
                    } else {
                        AxumStatus::NOT_FOUND
                    }
                }),
            )
            .route(
                "/v1/session/create",
                put(|| async { Json(serde_json::json!({ "ID": "session-1" })) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_leader_and_kv_reads() {
        let backend = ConsulHttpBackend::new(fake_consul().await, Duration::from_secs(2)).unwrap();

        assert_eq!(
            backend.leader().await.unwrap(),
            Some("10.0.0.1:8300".to_string())
        );
        assert_eq!(
            backend
                .get("orders/orders-1/config/current", None)
                .await
                .unwrap(),
            Some("{\"pool\":4}".to_string())
        );
        assert_eq!(backend.get("orders/missing", None).await.unwrap(), None);
        backend.put("orders/anything", "v").await.unwrap();
    }

    #[tokio::test]
    async fn test_reserved_characters_in_keys_are_escaped() {
        let backend = ConsulHttpBackend::new(fake_consul().await, Duration::from_secs(2)).unwrap();

        for key in ["echo/feature#2?x", "echo/a b/100%", "echo/nested/key&wait=1"] {
            assert_eq!(backend.get(key, None).await.unwrap(), Some(key.to_string()));
        }
    }

    #[tokio::test]
    async fn test_reserved_characters_in_check_ids_are_escaped() {
        let backend = ConsulHttpBackend::new(fake_consul().await, Duration::from_secs(2)).unwrap();

        backend
            .update_check("orders-1 disk#1", CheckState::Fail, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_a_configuration_error() {
        let err = ConsulHttpBackend::new("not a url", Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, CoordinationError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_failed_check_update_is_not_registered() {
        let backend = ConsulHttpBackend::new(fake_consul().await, Duration::from_secs(2)).unwrap();

        let err = backend.pass_service("orders-1", None).await.unwrap_err();
        assert!(matches!(err, CoordinationError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn test_create_session() {
        let backend = ConsulHttpBackend::new(fake_consul().await, Duration::from_secs(2)).unwrap();

        let session = backend
            .create_session(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(session, "session-1");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let backend =
            ConsulHttpBackend::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();

        let err = backend.leader().await.unwrap_err();
        assert!(matches!(err, CoordinationError::BackendUnavailable(_)));
    }
}
