use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::node_api::NodeApi;
use shared::types::{ApplicationRegistration, DeclaredFeature};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct FeatureEntry {
    initial_state: bool,
    // Last value confirmed by the Node, seeded with `initial_state`.
    current: AtomicBool,
}

/// A declared feature together with the value this client would answer with now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureSnapshot {
    pub name: String,
    pub initial_state: bool,
    pub current_state: bool,
}

/// Answers "is this feature enabled" for one application.
///
/// Reads go to the Node every time. When the Node cannot be reached the last
/// confirmed value is returned instead, so a read only ever fails for local
/// reasons or because the caller cancelled it.
pub struct FeatureClient {
    config: ClientConfig,
    node: NodeApi,
    features: BTreeMap<String, FeatureEntry>,
}

impl FeatureClient {
    pub fn new<I>(config: ClientConfig, features: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = DeclaredFeature>,
    {
        if config.application_name.is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "application name cannot be empty",
            ));
        }
        if config.environment.is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "environment cannot be empty",
            ));
        }

        let mut entries = BTreeMap::new();
        for feature in features {
            if feature.feature_name.is_empty() {
                return Err(ClientError::InvalidConfiguration(
                    "feature name cannot be empty",
                ));
            }
            if entries.contains_key(&feature.feature_name) {
                return Err(ClientError::FeatureNameCollision(feature.feature_name));
            }
            entries.insert(
                feature.feature_name,
                FeatureEntry {
                    initial_state: feature.initial_state,
                    current: AtomicBool::new(feature.initial_state),
                },
            );
        }

        let node = NodeApi::new(config.node_address.clone())?;

        Ok(FeatureClient {
            config,
            node,
            features: entries,
        })
    }

    /// Builds a client and registers its features with the Node in one step.
    pub async fn connect<I>(
        config: ClientConfig,
        features: I,
        cancel: &CancellationToken,
    ) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = DeclaredFeature>,
    {
        let client = Self::new(config, features)?;
        client
            .register_with_node(client.config.request_timeout, cancel)
            .await?;
        Ok(client)
    }

    /// Sends the full declared feature list to the Node. Any failure is
    /// returned as is. An environment mismatch will not go away on retry.
    pub async fn register_with_node(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let registration = ApplicationRegistration {
            app_name: self.config.application_name.clone(),
            environment: self.config.environment.clone(),
            features: self
                .features
                .iter()
                .map(|(name, entry)| DeclaredFeature::new(name.as_str(), entry.initial_state))
                .collect(),
        };

        self.node.register(&registration, timeout, cancel).await?;

        tracing::info!(
            application = %self.config.application_name,
            environment = %self.config.environment,
            features = registration.features.len(),
            "Registered with node"
        );
        Ok(())
    }

    pub async fn is_feature_enabled(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let entry = self
            .features
            .get(name)
            .ok_or_else(|| ClientError::FeatureNotRegistered(name.to_string()))?;

        let result = self
            .node
            .feature_state(
                &self.config.application_name,
                name,
                self.config.request_timeout,
                cancel,
            )
            .await;

        match result {
            Ok(state) => {
                entry.current.store(state, Ordering::Relaxed);
                Ok(state)
            }
            Err(ClientError::Cancelled) => Err(ClientError::Cancelled),
            Err(e) => {
                let cached = entry.current.load(Ordering::Relaxed);
                tracing::debug!(
                    feature = name,
                    error = %e,
                    cached,
                    "Node read failed, using last known state"
                );
                Ok(cached)
            }
        }
    }

    /// Declared features sorted by name.
    pub fn features(&self) -> Vec<FeatureSnapshot> {
        self.features
            .iter()
            .map(|(name, entry)| FeatureSnapshot {
                name: name.clone(),
                initial_state: entry.initial_state,
                current_state: entry.current.load(Ordering::Relaxed),
            })
            .collect()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
