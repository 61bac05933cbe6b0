//! HTTP client for the resource store REST API

use super::{async_trait, paths, ResourceStore};
use crate::error::{ControllerError, Result};
use crate::models::{HorizontalPodAutoscaler, HpaStatus, Pod, ReplicaSet, ReplicaSetStatus};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Configuration for the store client
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the store (e.g., "http://127.0.0.1:7000")
    pub endpoint: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7000".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// List endpoints wrap their payload in `{"data": [...]}`
#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Option<Vec<T>>,
}

/// Resource store client over REST
#[derive(Debug, Clone)]
pub struct StoreClient {
    client: Client,
    base_url: Url,
}

impl StoreClient {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let base_url =
            Url::parse(&config.endpoint).map_err(|source| ControllerError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                source,
            })?;

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ControllerError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Create a client for `endpoint` with default timeouts
    pub fn with_defaults(endpoint: impl Into<String>) -> Result<Self> {
        Self::new(StoreConfig {
            endpoint: endpoint.into(),
            ..StoreConfig::default()
        })
    }

    pub fn endpoint(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|source| ControllerError::InvalidEndpoint {
                endpoint: format!("{}{}", self.base_url, path),
                source,
            })
    }

    /// GET a list endpoint and unwrap its envelope
    async fn list<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<Vec<T>> {
        let url = self.url(path)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| ControllerError::Transport {
                method: Method::GET,
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ControllerError::Transport {
                method: Method::GET,
                url: url.to_string(),
                source,
            })?;

        if status != StatusCode::OK {
            return Err(ControllerError::Status {
                method: Method::GET,
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ListEnvelope<T> =
            serde_json::from_str(&body).map_err(|source| ControllerError::Decode {
                what: what.to_string(),
                source,
            })?;
        let items = envelope.data.unwrap_or_default();

        debug!(path = %path, count = items.len(), "Listed {}", what);
        Ok(items)
    }

    /// Send a request with an optional JSON body and require `expected`
    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        expected: StatusCode,
    ) -> Result<()> {
        let url = self.url(path)?;
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| ControllerError::Transport {
                method: method.clone(),
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status != expected {
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::Status {
                method,
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ResourceStore for StoreClient {
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        self.list(paths::PODS, "pods").await
    }

    async fn list_replica_sets(&self) -> Result<Vec<ReplicaSet>> {
        self.list(paths::REPLICASETS, "replicasets").await
    }

    async fn list_hpas(&self) -> Result<Vec<HorizontalPodAutoscaler>> {
        self.list(paths::HPAS, "horizontal pod autoscalers").await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        self.send(
            Method::POST,
            &paths::namespaced_pods(namespace),
            Some(pod),
            StatusCode::CREATED,
        )
        .await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.send::<()>(
            Method::DELETE,
            &paths::pod(namespace, name),
            None,
            StatusCode::OK,
        )
        .await
    }

    async fn update_replica_set_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ReplicaSetStatus,
    ) -> Result<()> {
        self.send(
            Method::PUT,
            &paths::replica_set_status(namespace, name),
            Some(status),
            StatusCode::OK,
        )
        .await
    }

    async fn update_hpa_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HpaStatus,
    ) -> Result<()> {
        self.send(
            Method::PUT,
            &paths::hpa_status(namespace, name),
            Some(status),
            StatusCode::OK,
        )
        .await
    }
}

/// Builder for StoreClient configuration
pub struct StoreClientBuilder {
    config: StoreConfig,
}

impl StoreClientBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<StoreClient> {
        StoreClient::new(self.config)
    }
}

impl Default for StoreClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectMeta;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.endpoint, "http://127.0.0.1:7000");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_rejects_invalid_endpoint() {
        let result = StoreClientBuilder::new().endpoint("not a url").build();
        assert!(matches!(
            result,
            Err(ControllerError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_pods_unwraps_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/pods")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":[{"metadata":{"name":"web-1","namespace":"default","labels":{"app":"web"}},"status":{"phase":"Running","cpuUsage":0.3,"memUsage":0.1}}]}"#,
            )
            .create_async()
            .await;

        let client = StoreClient::with_defaults(server.url()).unwrap();
        let pods = client.list_pods().await.unwrap();

        mock.assert_async().await;
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].metadata.name, "web-1");
        assert!(pods[0].is_running());
    }

    #[tokio::test]
    async fn test_list_null_data_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/hpa")
            .with_status(200)
            .with_body(r#"{"data":null}"#)
            .create_async()
            .await;

        let client = StoreClient::with_defaults(server.url()).unwrap();
        assert!(client.list_hpas().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_missing_data_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/replicasets")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = StoreClient::with_defaults(server.url()).unwrap();
        assert!(client.list_replica_sets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/replicasets")
            .with_status(200)
            .with_body(r#"{"data":[{"metadata":42}]}"#)
            .create_async()
            .await;

        let client = StoreClient::with_defaults(server.url()).unwrap();
        let err = client.list_replica_sets().await.unwrap_err();
        assert!(matches!(err, ControllerError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_list_unexpected_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/pods")
            .with_status(503)
            .with_body("store unavailable")
            .create_async()
            .await;

        let client = StoreClient::with_defaults(server.url()).unwrap();
        match client.list_pods().await.unwrap_err() {
            ControllerError::Status { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body, "store unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_pod_requires_created() {
        let mut server = mockito::Server::new_async().await;
        let created = server
            .mock("POST", "/api/v1/namespaces/prod/pods")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"metadata":{"name":"web-1","namespace":"prod"}}"#.to_string(),
            ))
            .with_status(201)
            .create_async()
            .await;

        let client = StoreClient::with_defaults(server.url()).unwrap();
        let pod = Pod {
            metadata: ObjectMeta {
                name: "web-1".to_string(),
                namespace: "prod".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        client.create_pod("prod", &pod).await.unwrap();
        created.assert_async().await;

        server
            .mock("POST", "/api/v1/namespaces/dev/pods")
            .with_status(200)
            .create_async()
            .await;
        let err = client.create_pod("dev", &pod).await.unwrap_err();
        assert!(matches!(err, ControllerError::Status { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_delete_and_status_paths() {
        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", "/api/v1/namespaces/default/pods/web-1")
            .with_status(200)
            .create_async()
            .await;
        let rs_status = server
            .mock("PUT", "/api/v1/namespaces/default/replicasets/web/status")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"replicas":3,"readyReplicas":1}"#.to_string(),
            ))
            .with_status(200)
            .create_async()
            .await;
        let hpa_status = server
            .mock("PUT", "/api/v1/namespaces/default/hpa/web-hpa/status")
            .with_status(200)
            .create_async()
            .await;

        let client = StoreClient::with_defaults(server.url()).unwrap();
        client.delete_pod("default", "web-1").await.unwrap();
        client
            .update_replica_set_status(
                "default",
                "web",
                &ReplicaSetStatus {
                    replicas: 3,
                    ready_replicas: 1,
                    conditions: Vec::new(),
                },
            )
            .await
            .unwrap();
        client
            .update_hpa_status("default", "web-hpa", &HpaStatus::default())
            .await
            .unwrap();

        delete.assert_async().await;
        rs_status.assert_async().await;
        hpa_status.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_error() {
        // Nothing listens on port 9 of the loopback interface
        let client = StoreClientBuilder::new()
            .endpoint("http://127.0.0.1:9")
            .connect_timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        let err = client.list_pods().await.unwrap_err();
        assert!(matches!(err, ControllerError::Transport { .. }));
    }
}
