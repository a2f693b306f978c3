use serde::{Deserialize, Serialize};
use shared::types::FeatureState;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureKey {
    pub application: String,
    pub feature: String,
}

impl FeatureKey {
    pub fn new<A, F>(application: A, feature: F) -> Self
    where
        A: Into<String>,
        F: Into<String>,
    {
        FeatureKey {
            application: application.into(),
            feature: feature.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureRecord {
    pub key: FeatureKey,
    pub enabled: bool,
}

impl From<FeatureRecord> for FeatureState {
    fn from(record: FeatureRecord) -> Self {
        FeatureState {
            name: record.key.feature,
            state: record.enabled,
        }
    }
}

/// Everything a Node knows: application name to feature name to enabled.
///
/// An application stays listed after its last feature is removed, the same way it
/// was first listed when its first feature was added.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryData {
    pub applications: BTreeMap<String, BTreeMap<String, bool>>,
}

/// The writes one registration needs to bring a stored feature set in line with
/// the declared one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Newly declared features with their initial state.
    pub added: Vec<(String, bool)>,
    /// Stored features the application no longer declares.
    pub removed: Vec<String>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
