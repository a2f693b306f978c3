//! Single-target calls from the Manager to one Node.

use crate::directory::NodeDirectory;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use shared::types::{Application, FeatureState, NodeRecord, StateChange};
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("node {0} not found")]
    NodeNotFound(u64),

    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    #[error("{0} did not answer in time")]
    Timeout(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{endpoint} answered with status {status}")]
    Status { status: StatusCode, endpoint: String },

    #[error("request cancelled")]
    Cancelled,
}

#[async_trait]
pub trait NodeGateway: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, GatewayError>;

    async fn list_applications(&self, node: &NodeRecord) -> Result<Vec<Application>, GatewayError>;

    async fn list_features(
        &self,
        node: &NodeRecord,
        application: &str,
    ) -> Result<Vec<FeatureState>, GatewayError>;

    async fn set_feature_state(
        &self,
        node: &NodeRecord,
        application: &str,
        feature: &str,
        enabled: bool,
    ) -> Result<(), GatewayError>;
}

/// Talks to Nodes over their HTTP API. Every request is bounded by `timeout`.
pub struct HttpNodeGateway {
    directory: NodeDirectory,
    client: reqwest::Client,
}

impl HttpNodeGateway {
    pub fn new(directory: NodeDirectory, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpNodeGateway { directory, client })
    }

    async fn get_json<T: DeserializeOwned>(&self, node: &NodeRecord, url: Url) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| transport_error(e, node))?;
        let response = check_status(response, &url)?;
        response.json().await.map_err(|e| transport_error(e, node))
    }
}

#[async_trait]
impl NodeGateway for HttpNodeGateway {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, GatewayError> {
        Ok(self.directory.list())
    }

    async fn list_applications(&self, node: &NodeRecord) -> Result<Vec<Application>, GatewayError> {
        let url = endpoint(node, &["applications"])?;
        self.get_json(node, url).await
    }

    async fn list_features(
        &self,
        node: &NodeRecord,
        application: &str,
    ) -> Result<Vec<FeatureState>, GatewayError> {
        let url = endpoint(node, &["applications", application, "features"])?;
        self.get_json(node, url).await
    }

    async fn set_feature_state(
        &self,
        node: &NodeRecord,
        application: &str,
        feature: &str,
        enabled: bool,
    ) -> Result<(), GatewayError> {
        let url = endpoint(node, &["applications", application, "features", feature])?;
        let response = self
            .client
            .put(url.clone())
            .json(&StateChange { state: enabled })
            .send()
            .await
            .map_err(|e| transport_error(e, node))?;
        check_status(response, &url)?;
        Ok(())
    }
}

/// Appends `segments` to the node address, percent-encoding each one.
pub fn endpoint(node: &NodeRecord, segments: &[&str]) -> Result<Url, GatewayError> {
    let mut url = node.address.clone();
    url.path_segments_mut()
        .map_err(|_| GatewayError::InvalidAddress(node.address.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn check_status(response: reqwest::Response, url: &Url) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(GatewayError::Status {
            status,
            endpoint: url.to_string(),
        })
    }
}

fn transport_error(error: reqwest::Error, node: &NodeRecord) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout(format!("node {}", node.name))
    } else {
        GatewayError::Transport(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::StatusCode as AxumStatus,
        routing::{get, put},
    };
    use tokio::net::TcpListener;

    async fn start_test_server() -> Url {
        let app = Router::new()
            .route(
                "/applications",
                get(|| async {
                    Json(vec![Application {
                        name: "checkout".into(),
                        environment: "production".into(),
                    }])
                }),
            )
            .route(
                "/applications/{app}/features",
                get(|Path(app): Path<String>| async move {
                    let mut features = Vec::new();
                    if app == "checkout" {
                        features.push(FeatureState {
                            name: "new-cart".into(),
                            state: true,
                        });
                    }
                    Json(features)
                }),
            )
            .route(
                "/applications/{app}/features/{feature}",
                put(
                    |Path((_app, feature)): Path<(String, String)>, Json(_): Json<StateChange>| async move {
                        if feature == "new-cart" {
                            AxumStatus::OK
                        } else {
                            AxumStatus::NOT_FOUND
                        }
                    },
                ),
            )
            .route(
                "/slow/applications",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(Vec::<Application>::new())
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await });

        Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap()
    }

    fn node(address: Url) -> NodeRecord {
        NodeRecord {
            id: 1,
            name: "production".into(),
            address,
        }
    }

    #[test]
    fn test_endpoint_encoding() {
        let node = node(Url::parse("http://node.internal:8080/base").unwrap());
        let url = endpoint(&node, &["applications", "a/b", "features"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://node.internal:8080/base/applications/a%2Fb/features"
        );
    }

    #[tokio::test]
    async fn test_http_gateway() {
        let node = node(start_test_server().await);
        let gateway = HttpNodeGateway::new(NodeDirectory::new(), Duration::from_secs(2)).unwrap();

        let apps = gateway.list_applications(&node).await.unwrap();
        assert_eq!(apps[0].name, "checkout");

        let features = gateway.list_features(&node, "checkout").await.unwrap();
        assert_eq!(features.len(), 1);
        assert!(features[0].state);

        gateway
            .set_feature_state(&node, "checkout", "new-cart", false)
            .await
            .unwrap();
        let result = gateway
            .set_feature_state(&node, "checkout", "missing", false)
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Status { status: StatusCode::NOT_FOUND, .. })
        ));
    }

    #[tokio::test]
    async fn test_http_gateway_timeout() {
        let mut slow = node(start_test_server().await);
        slow.address = slow.address.join("slow/").unwrap();
        let gateway =
            HttpNodeGateway::new(NodeDirectory::new(), Duration::from_millis(100)).unwrap();

        let result = gateway.list_applications(&slow).await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }
}
