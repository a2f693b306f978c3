//! Records that cross a process boundary.
//!
//! There is exactly one serializable record per entity on the wire. Each service
//! keeps its own internal representation and converts at the edge.

use serde::{Deserialize, Serialize};
use url::Url;

/// One feature declared by an application, with the value it starts with when a
/// Node sees it for the first time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredFeature {
    pub feature_name: String,
    pub initial_state: bool,
}

impl DeclaredFeature {
    pub fn new<N: Into<String>>(feature_name: N, initial_state: bool) -> Self {
        DeclaredFeature {
            feature_name: feature_name.into(),
            initial_state,
        }
    }
}

/// Body of `POST /applications` on a Node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRegistration {
    pub app_name: String,
    pub environment: String,
    pub features: Vec<DeclaredFeature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    #[serde(default)]
    pub environment: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureState {
    pub name: String,
    pub state: bool,
}

/// Body of the feature toggle endpoints on both the Node and the Manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: bool,
}

/// Body of `PUT /nodes` on the Manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistration {
    pub node_name: String,
    pub node_address: Url,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: u64,
    pub name: String,
    pub address: Url,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_wire_format() {
        let registration = ApplicationRegistration {
            app_name: "checkout".into(),
            environment: "production".into(),
            features: vec![DeclaredFeature::new("new-cart", true)],
        };

        assert_eq!(
            serde_json::to_value(&registration).unwrap(),
            json!({
                "appName": "checkout",
                "environment": "production",
                "features": [{"featureName": "new-cart", "initialState": true}]
            })
        );
    }

    #[test]
    fn test_application_without_environment() {
        let app: Application = serde_json::from_value(json!({"name": "checkout"})).unwrap();
        assert_eq!(app.name, "checkout");
        assert_eq!(app.environment, "");
    }

    #[test]
    fn test_node_registration_rejects_relative_address() {
        let parsed = serde_json::from_value::<NodeRegistration>(json!({
            "nodeName": "staging",
            "nodeAddress": "/staging"
        }));
        assert!(parsed.is_err());
    }
}
