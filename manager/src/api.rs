use crate::aggregation::AggregationFetcher;
use crate::config::Listener as ListenerConfig;
use crate::directory::{DirectoryError, NodeDirectory};
use crate::gateway::GatewayError;
use crate::matrix::MatrixView;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use shared::admin_service::Readiness;
use shared::types::{Application, ErrorBody, FeatureState, NodeRecord, NodeRegistration, StateChange};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub directory: NodeDirectory,
    pub fetcher: AggregationFetcher,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/nodes", get(list_nodes).put(register_node))
        .route("/nodes/{id}/applications", get(list_applications))
        .route("/nodes/{id}/applications/{app}/features", get(list_features))
        .route(
            "/nodes/{id}/applications/{app}/features/{feature}",
            put(set_feature_state),
        )
        .route("/matrix", get(matrix))
        .route("/matrix/refresh", post(refresh_matrix))
        .with_state(state)
}

pub async fn serve(
    listener: ListenerConfig,
    state: AppState,
    readiness: Readiness,
) -> Result<(), std::io::Error> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Manager API listening");

    readiness.set_ready();
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

fn lookup(state: &AppState, id: u64) -> Result<NodeRecord, ApiError> {
    state
        .directory
        .get(id)
        .ok_or(ApiError::Gateway(GatewayError::NodeNotFound(id)))
}

async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeRecord>> {
    Json(state.directory.list())
}

async fn register_node(
    State(state): State<AppState>,
    Json(registration): Json<NodeRegistration>,
) -> Result<(StatusCode, Json<NodeRecord>), ApiError> {
    let record = state
        .directory
        .upsert(&registration.node_name, registration.node_address)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_applications(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<Application>>, ApiError> {
    let node = lookup(&state, id)?;
    let applications = state
        .fetcher
        .fetch_applications(&node, &CancellationToken::new())
        .await?;
    Ok(Json(applications))
}

async fn list_features(
    State(state): State<AppState>,
    Path((id, app)): Path<(u64, String)>,
) -> Result<Json<Vec<FeatureState>>, ApiError> {
    let node = lookup(&state, id)?;
    let features = state
        .fetcher
        .fetch_features(&node, &app, &CancellationToken::new())
        .await?;
    Ok(Json(features))
}

async fn set_feature_state(
    State(state): State<AppState>,
    Path((id, app, feature)): Path<(u64, String, String)>,
    Json(change): Json<StateChange>,
) -> Result<StatusCode, ApiError> {
    let node = lookup(&state, id)?;
    state
        .fetcher
        .set_feature_state(&node, &app, &feature, change.state, &CancellationToken::new())
        .await?;
    Ok(StatusCode::OK)
}

async fn matrix(State(state): State<AppState>) -> Json<MatrixView> {
    Json(state.fetcher.snapshot())
}

async fn refresh_matrix(State(state): State<AppState>) -> Json<MatrixView> {
    Json(state.fetcher.refresh().await)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Directory(_) => StatusCode::BAD_REQUEST,
            ApiError::Gateway(GatewayError::NodeNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Gateway(GatewayError::Status { status, .. })
                if *status == StatusCode::NOT_FOUND =>
            {
                StatusCode::NOT_FOUND
            }
            ApiError::Gateway(GatewayError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Gateway(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(ErrorBody {
            error_message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::HttpNodeGateway;
    use serde_json::json;
    use shared::limiter::ConcurrencyLimiter;
    use std::sync::Arc;
    use std::time::Duration;

    /// A node serving a single application with one feature.
    async fn start_node() -> String {
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
                get(|| async {
                    Json(vec![FeatureState {
                        name: "new-cart".into(),
                        state: false,
                    }])
                }),
            )
            .route(
                "/applications/{app}/features/{feature}",
                put(|Path((_app, feature)): Path<(String, String)>| async move {
                    if feature == "new-cart" {
                        StatusCode::OK
                    } else {
                        StatusCode::NOT_FOUND
                    }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://127.0.0.1:{port}")
    }

    async fn start_test_server() -> String {
        let directory = NodeDirectory::new();
        let gateway =
            HttpNodeGateway::new(directory.clone(), Duration::from_millis(500)).unwrap();
        let fetcher = AggregationFetcher::new(
            Arc::new(gateway),
            ConcurrencyLimiter::new(2),
            Duration::from_millis(500),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(serve_on(listener, AppState { directory, fetcher }));
        format!("http://127.0.0.1:{port}")
    }

    async fn register(client: &reqwest::Client, base: &str, name: &str, address: &str) -> reqwest::Response {
        client
            .put(format!("{base}/nodes"))
            .json(&json!({"nodeName": name, "nodeAddress": address}))
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_nodes_and_proxy() {
        let node_address = start_node().await;
        let base = start_test_server().await;
        let client = reqwest::Client::new();

        let response = register(&client, &base, "production", &node_address).await;
        assert_eq!(response.status(), 201);
        let record: NodeRecord = response.json().await.unwrap();

        let again: NodeRecord = register(&client, &base, "production", &node_address)
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(again.id, record.id);

        let nodes: Vec<NodeRecord> = client
            .get(format!("{base}/nodes"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);

        let features: Vec<FeatureState> = client
            .get(format!("{base}/nodes/{}/applications/checkout/features", record.id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(features[0].name, "new-cart");

        let response = client
            .put(format!("{base}/nodes/{}/applications/checkout/features/new-cart", record.id))
            .json(&StateChange { state: true })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = client
            .put(format!("{base}/nodes/{}/applications/checkout/features/missing", record.id))
            .json(&StateChange { state: true })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let base = start_test_server().await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{base}/nodes/42/applications"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        let response = register(&client, &base, "production", "ftp://node.internal").await;
        assert_eq!(response.status(), 400);

        // Nothing listens on port 9 of localhost in the test environment.
        let record: NodeRecord = register(&client, &base, "gone", "http://127.0.0.1:9")
            .await
            .json()
            .await
            .unwrap();
        let response = client
            .get(format!("{base}/nodes/{}/applications", record.id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 502);
    }

    #[tokio::test]
    async fn test_matrix_refresh() {
        let node_address = start_node().await;
        let base = start_test_server().await;
        let client = reqwest::Client::new();
        register(&client, &base, "production", &node_address).await;

        let view: serde_json::Value = client
            .post(format!("{base}/matrix/refresh"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(view["loading"], json!(false));
        assert_eq!(view["nodes"], json!(["production"]));
        assert_eq!(view["rows"][0]["application"], json!("checkout"));
        assert_eq!(
            view["rows"][0]["cells"]["production"],
            json!({"kind": "value", "value": false})
        );

        let cached: serde_json::Value = client
            .get(format!("{base}/matrix"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cached["epoch"], view["epoch"]);
    }
}
