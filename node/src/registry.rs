use crate::metrics_defs::{
    FEATURE_STATE_LOOKUPS, FEATURE_TOGGLES, FEATURES_ADDED, FEATURES_REMOVED, REGISTRATIONS,
};
use crate::store::{FeatureStore, StoreError};
use crate::types::{FeatureKey, FeatureRecord, Reconciliation};
use shared::counter;
use shared::types::{Application, DeclaredFeature};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("environment {requested:?} does not match node environment {expected:?}")]
    EnvironmentMismatch { requested: String, expected: String },

    #[error("feature {feature:?} is not registered for application {application:?}")]
    FeatureNotFound { application: String, feature: String },

    #[error("feature {0:?} is declared more than once")]
    DuplicateFeature(String),

    #[error("{0} name cannot be empty")]
    InvalidName(&'static str),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("registry update lock closed")]
    UpdateLockClosed(#[from] AcquireError),
}

/// The authoritative feature state of one environment.
///
/// Registrations and toggles are serialized through a single update permit, so
/// the read-diff-write of one reconciliation is never interleaved with another
/// write. Reads go straight to the store.
pub struct FeatureRegistry {
    environment: String,
    store: Arc<dyn FeatureStore>,
    update_lock: Semaphore,
}

impl FeatureRegistry {
    pub fn new(environment: String, store: Arc<dyn FeatureStore>) -> Self {
        FeatureRegistry {
            environment,
            store,
            update_lock: Semaphore::new(1),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Brings the stored feature set of `app_name` in line with `declared`.
    ///
    /// Newly declared features are added with their initial state, features no
    /// longer declared are removed, and features present on both sides keep
    /// whatever state they currently have. Nothing is written when the sets
    /// already agree.
    pub async fn register_application(
        &self,
        app_name: &str,
        environment: &str,
        declared: &[DeclaredFeature],
    ) -> Result<Reconciliation, RegistryError> {
        if environment != self.environment {
            return Err(RegistryError::EnvironmentMismatch {
                requested: environment.to_string(),
                expected: self.environment.clone(),
            });
        }
        validate_declaration(app_name, declared)?;

        let _permit = self.get_permit().await?;

        let current = self.store.features(app_name)?;
        let changes = reconcile(&current, declared);

        counter!(REGISTRATIONS).increment(1);
        if changes.is_empty() {
            tracing::debug!(application = app_name, "Registration matches stored features");
            return Ok(changes);
        }

        self.store.apply(app_name, &changes)?;

        counter!(FEATURES_ADDED).increment(changes.added.len() as u64);
        counter!(FEATURES_REMOVED).increment(changes.removed.len() as u64);
        tracing::info!(
            application = app_name,
            added = changes.added.len(),
            removed = changes.removed.len(),
            "Reconciled application features"
        );

        Ok(changes)
    }

    pub fn get_feature_state(&self, app_name: &str, feature: &str) -> Result<bool, RegistryError> {
        counter!(FEATURE_STATE_LOOKUPS).increment(1);
        self.store
            .state(app_name, feature)?
            .ok_or_else(|| RegistryError::FeatureNotFound {
                application: app_name.to_string(),
                feature: feature.to_string(),
            })
    }

    /// Overwrites the state of a registered feature. This is the only way
    /// `enabled` changes outside of reconciliation.
    pub async fn set_feature_state(
        &self,
        app_name: &str,
        feature: &str,
        enabled: bool,
    ) -> Result<(), RegistryError> {
        let _permit = self.get_permit().await?;

        if !self.store.set_state(app_name, feature, enabled)? {
            return Err(RegistryError::FeatureNotFound {
                application: app_name.to_string(),
                feature: feature.to_string(),
            });
        }

        counter!(FEATURE_TOGGLES).increment(1);
        tracing::info!(application = app_name, feature, enabled, "Feature state changed");
        Ok(())
    }

    pub fn list_applications(&self) -> Result<Vec<Application>, RegistryError> {
        Ok(self
            .store
            .applications()?
            .into_iter()
            .map(|name| Application {
                name,
                environment: self.environment.clone(),
            })
            .collect())
    }

    pub fn list_features(&self, app_name: &str) -> Result<Vec<FeatureRecord>, RegistryError> {
        Ok(self
            .store
            .features(app_name)?
            .into_iter()
            .map(|(feature, enabled)| FeatureRecord {
                key: FeatureKey::new(app_name, feature),
                enabled,
            })
            .collect())
    }

    /// Guard that ensures only one write is in progress at a time.
    async fn get_permit(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        self.update_lock.acquire().await
    }
}

fn validate_declaration(app_name: &str, declared: &[DeclaredFeature]) -> Result<(), RegistryError> {
    if app_name.is_empty() {
        return Err(RegistryError::InvalidName("application"));
    }

    let mut seen = HashSet::with_capacity(declared.len());
    for feature in declared {
        if feature.feature_name.is_empty() {
            return Err(RegistryError::InvalidName("feature"));
        }
        if !seen.insert(feature.feature_name.as_str()) {
            return Err(RegistryError::DuplicateFeature(feature.feature_name.clone()));
        }
    }

    Ok(())
}

/// Symmetric difference of feature names, computed from one snapshot.
fn reconcile(current: &BTreeMap<String, bool>, declared: &[DeclaredFeature]) -> Reconciliation {
    let declared_names: HashSet<&str> = declared.iter().map(|f| f.feature_name.as_str()).collect();

    let added = declared
        .iter()
        .filter(|f| !current.contains_key(&f.feature_name))
        .map(|f| (f.feature_name.clone(), f.initial_state))
        .collect();

    let removed = current
        .keys()
        .filter(|name| !declared_names.contains(name.as_str()))
        .cloned()
        .collect();

    Reconciliation { added, removed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryFeatureStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the in-memory store and counts mutating calls.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryFeatureStore,
        writes: AtomicUsize,
    }

    impl FeatureStore for CountingStore {
        fn applications(&self) -> Result<Vec<String>, StoreError> {
            self.inner.applications()
        }

        fn features(&self, application: &str) -> Result<BTreeMap<String, bool>, StoreError> {
            self.inner.features(application)
        }

        fn state(&self, application: &str, feature: &str) -> Result<Option<bool>, StoreError> {
            self.inner.state(application, feature)
        }

        fn apply(&self, application: &str, changes: &Reconciliation) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.apply(application, changes)
        }

        fn set_state(
            &self,
            application: &str,
            feature: &str,
            enabled: bool,
        ) -> Result<bool, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_state(application, feature, enabled)
        }
    }

    fn registry() -> (FeatureRegistry, Arc<CountingStore>) {
        let store = Arc::new(CountingStore::default());
        (
            FeatureRegistry::new("production".into(), store.clone()),
            store,
        )
    }

    fn declared(features: &[(&str, bool)]) -> Vec<DeclaredFeature> {
        features
            .iter()
            .map(|(name, state)| DeclaredFeature::new(*name, *state))
            .collect()
    }

    fn listed(registry: &FeatureRegistry, app: &str) -> Vec<(String, bool)> {
        registry
            .list_features(app)
            .unwrap()
            .into_iter()
            .map(|record| (record.key.feature, record.enabled))
            .collect()
    }

    #[tokio::test]
    async fn test_register_adds_declared_features() {
        let (registry, _) = registry();
        let changes = registry
            .register_application(
                "checkout",
                "production",
                &declared(&[("new-cart", false), ("dark-mode", true)]),
            )
            .await
            .unwrap();

        assert_eq!(changes.added.len(), 2);
        assert!(changes.removed.is_empty());
        assert_eq!(
            listed(&registry, "checkout"),
            vec![("dark-mode".into(), true), ("new-cart".into(), false)]
        );
        assert_eq!(
            registry.list_applications().unwrap(),
            vec![Application {
                name: "checkout".into(),
                environment: "production".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_reregistration_keeps_toggled_state() {
        let (registry, _) = registry();
        let features = declared(&[("new-cart", false), ("legacy-search", true)]);
        registry
            .register_application("checkout", "production", &features)
            .await
            .unwrap();
        registry
            .set_feature_state("checkout", "new-cart", true)
            .await
            .unwrap();

        let changes = registry
            .register_application(
                "checkout",
                "production",
                &declared(&[("new-cart", false), ("one-click", true)]),
            )
            .await
            .unwrap();

        assert_eq!(changes.added, vec![("one-click".to_string(), true)]);
        assert_eq!(changes.removed, vec!["legacy-search".to_string()]);
        // new-cart was toggled away from its initial value and must keep it
        assert_eq!(
            listed(&registry, "checkout"),
            vec![("new-cart".into(), true), ("one-click".into(), true)]
        );
    }

    #[tokio::test]
    async fn test_identical_registration_writes_nothing() {
        let (registry, store) = registry();
        let features = declared(&[("new-cart", false)]);
        registry
            .register_application("checkout", "production", &features)
            .await
            .unwrap();
        let writes = store.writes.load(Ordering::SeqCst);

        let changes = registry
            .register_application("checkout", "production", &features)
            .await
            .unwrap();

        assert!(changes.is_empty());
        assert_eq!(store.writes.load(Ordering::SeqCst), writes);
        assert_eq!(listed(&registry, "checkout"), vec![("new-cart".into(), false)]);
    }

    #[tokio::test]
    async fn test_environment_mismatch() {
        let (registry, store) = registry();
        let result = registry
            .register_application("checkout", "staging", &declared(&[("new-cart", false)]))
            .await;

        assert!(matches!(
            result,
            Err(RegistryError::EnvironmentMismatch { ref requested, ref expected })
                if requested == "staging" && expected == "production"
        ));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_names_fail_before_reconciliation() {
        let (registry, store) = registry();

        let result = registry
            .register_application(
                "checkout",
                "production",
                &declared(&[("new-cart", false), ("new-cart", true)]),
            )
            .await;
        assert!(matches!(result, Err(RegistryError::DuplicateFeature(name)) if name == "new-cart"));

        let result = registry
            .register_application("checkout", "production", &declared(&[("", false)]))
            .await;
        assert!(matches!(result, Err(RegistryError::InvalidName("feature"))));

        let result = registry
            .register_application("", "production", &declared(&[("new-cart", false)]))
            .await;
        assert!(matches!(result, Err(RegistryError::InvalidName("application"))));

        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let (registry, _) = registry();
        registry
            .register_application("checkout", "production", &declared(&[("new-cart", false)]))
            .await
            .unwrap();

        registry
            .set_feature_state("checkout", "new-cart", true)
            .await
            .unwrap();
        assert!(registry.get_feature_state("checkout", "new-cart").unwrap());

        registry
            .set_feature_state("checkout", "new-cart", false)
            .await
            .unwrap();
        assert!(!registry.get_feature_state("checkout", "new-cart").unwrap());
    }

    #[tokio::test]
    async fn test_unknown_feature() {
        let (registry, _) = registry();
        registry
            .register_application("checkout", "production", &declared(&[("new-cart", false)]))
            .await
            .unwrap();

        assert!(matches!(
            registry.get_feature_state("checkout", "NEW-CART"),
            Err(RegistryError::FeatureNotFound { .. })
        ));
        assert!(matches!(
            registry.set_feature_state("billing", "new-cart", true).await,
            Err(RegistryError::FeatureNotFound { .. })
        ));
        assert!(registry.list_features("billing").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registrations_converge() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let registry = registry.clone();
            tasks.spawn(async move {
                let features = declared(&[("shared", false), (&format!("only-{i}"), true)]);
                registry
                    .register_application("checkout", "production", &features)
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        // Whichever registration ran last wins; the registry never ends up with a
        // mix of two declarations.
        let features = listed(&registry, "checkout");
        assert_eq!(features.len(), 2);
        assert_eq!(features[1], ("shared".into(), false));
    }
}
