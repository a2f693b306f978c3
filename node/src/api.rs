use crate::config::Listener as ListenerConfig;
use crate::registry::{FeatureRegistry, RegistryError};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Serialize;
use shared::admin_service::Readiness;
use shared::types::{Application, ApplicationRegistration, ErrorBody, FeatureState, StateChange};
use std::sync::Arc;
use tokio::net::TcpListener;

pub fn router(registry: Arc<FeatureRegistry>) -> Router {
    Router::new()
        .route(
            "/applications",
            post(register_application).get(list_applications),
        )
        .route("/applications/{app}/features", get(list_features))
        .route(
            "/applications/{app}/features/{feature}/state",
            get(get_feature_state),
        )
        .route(
            "/applications/{app}/features/{feature}",
            put(set_feature_state),
        )
        .with_state(registry)
}

pub async fn serve(
    listener: ListenerConfig,
    registry: Arc<FeatureRegistry>,
    readiness: Readiness,
) -> Result<(), std::io::Error> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Node API listening");

    readiness.set_ready();
    serve_on(listener, registry).await
}

pub async fn serve_on(
    listener: TcpListener,
    registry: Arc<FeatureRegistry>,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(registry)).await
}

#[derive(Serialize)]
struct RegistrationSummary {
    added: Vec<String>,
    removed: Vec<String>,
}

async fn register_application(
    State(registry): State<Arc<FeatureRegistry>>,
    Json(registration): Json<ApplicationRegistration>,
) -> Result<(StatusCode, Json<RegistrationSummary>), RegistryError> {
    let changes = registry
        .register_application(
            &registration.app_name,
            &registration.environment,
            &registration.features,
        )
        .await?;

    let summary = RegistrationSummary {
        added: changes.added.into_iter().map(|(name, _)| name).collect(),
        removed: changes.removed,
    };
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn list_applications(
    State(registry): State<Arc<FeatureRegistry>>,
) -> Result<Json<Vec<Application>>, RegistryError> {
    registry.list_applications().map(Json)
}

async fn list_features(
    State(registry): State<Arc<FeatureRegistry>>,
    Path(app): Path<String>,
) -> Result<Json<Vec<FeatureState>>, RegistryError> {
    let features = registry.list_features(&app)?;
    Ok(Json(features.into_iter().map(FeatureState::from).collect()))
}

async fn get_feature_state(
    State(registry): State<Arc<FeatureRegistry>>,
    Path((app, feature)): Path<(String, String)>,
) -> Result<Json<bool>, RegistryError> {
    registry.get_feature_state(&app, &feature).map(Json)
}

async fn set_feature_state(
    State(registry): State<Arc<FeatureRegistry>>,
    Path((app, feature)): Path<(String, String)>,
    Json(change): Json<StateChange>,
) -> Result<StatusCode, RegistryError> {
    registry
        .set_feature_state(&app, &feature, change.state)
        .await?;
    Ok(StatusCode::OK)
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match self {
            RegistryError::EnvironmentMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RegistryError::FeatureNotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::DuplicateFeature(_) | RegistryError::InvalidName(_) => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::Store(_) | RegistryError::UpdateLockClosed(_) => {
                tracing::error!(error = %self, "Registry failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorBody {
            error_message: self.to_string(),
        });

        (status, body).into_response()
    }
}
