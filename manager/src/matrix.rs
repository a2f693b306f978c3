//! The aggregated application × feature × node view of one refresh cycle.
//!
//! Cells are written one key at a time as fetches complete. After every write
//! [`FeatureMatrix::fill_missing`] settles the cells of nodes whose outcome for
//! an application is already known, so that every known feature has a cell on
//! every node of the cycle once that node has answered (or failed).

use indexmap::IndexMap;
use serde::Serialize;
use shared::types::FeatureState;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

pub const FEATURE_NOT_PRESENT: &str = "feature not present on this node";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellState {
    Loading,
    Value { value: bool },
    Unknown { reason: String },
}

impl CellState {
    pub fn unknown<R: Into<String>>(reason: R) -> Self {
        CellState::Unknown {
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub application: String,
    pub feature: String,
    pub node: String,
}

impl CellKey {
    pub fn new(application: &str, feature: &str, node: &str) -> Self {
        CellKey {
            application: application.to_string(),
            feature: feature.to_string(),
            node: node.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FetchErrorRecord {
    pub endpoint: String,
    pub message: String,
    /// Milliseconds since the unix epoch.
    pub timestamp_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatrixRow {
    pub application: String,
    pub feature: String,
    /// One cell per node of the cycle, in node order.
    pub cells: IndexMap<String, CellState>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatrixView {
    pub epoch: u64,
    pub nodes: Vec<String>,
    pub rows: Vec<MatrixRow>,
    pub unreachable: BTreeMap<String, String>,
    pub errors: Vec<FetchErrorRecord>,
    pub loading: bool,
    pub cycle_error: Option<String>,
}

impl MatrixView {
    pub fn cell(&self, application: &str, feature: &str, node: &str) -> Option<&CellState> {
        self.rows
            .iter()
            .find(|row| row.application == application && row.feature == feature)
            .and_then(|row| row.cells.get(node))
    }
}

enum NodeProgress {
    Listing,
    Listed(BTreeSet<String>),
    Unreachable(String),
}

enum FeatureProgress {
    Pending,
    Fetched,
    Failed(String),
}

#[derive(Default)]
pub struct FeatureMatrix {
    nodes: Vec<String>,
    listing_nodes: bool,
    cycle_error: Option<String>,
    node_progress: HashMap<String, NodeProgress>,
    // keyed by (node, application)
    feature_progress: HashMap<(String, String), FeatureProgress>,
    known_features: BTreeMap<String, BTreeSet<String>>,
    cells: HashMap<CellKey, CellState>,
    unreachable: BTreeMap<String, String>,
    errors: Vec<FetchErrorRecord>,
}

impl FeatureMatrix {
    /// Forgets everything of the previous cycle. The node list is pending until
    /// [`FeatureMatrix::set_nodes`] is called.
    pub fn reset(&mut self) {
        *self = FeatureMatrix {
            listing_nodes: true,
            ..Default::default()
        };
    }

    pub fn set_nodes(&mut self, nodes: Vec<String>) {
        self.listing_nodes = false;
        self.node_progress = nodes
            .iter()
            .map(|node| (node.clone(), NodeProgress::Listing))
            .collect();
        self.nodes = nodes;
    }

    pub fn fail_nodes(&mut self, message: String) {
        self.listing_nodes = false;
        self.cycle_error = Some(message);
    }

    pub fn mark_reachable(&mut self, node: &str, applications: Vec<String>) {
        self.unreachable.remove(node);
        for application in &applications {
            self.feature_progress.insert(
                (node.to_string(), application.clone()),
                FeatureProgress::Pending,
            );
        }
        self.node_progress.insert(
            node.to_string(),
            NodeProgress::Listed(applications.into_iter().collect()),
        );
    }

    pub fn mark_unreachable(&mut self, node: &str, message: String) {
        self.unreachable.insert(node.to_string(), message.clone());
        self.node_progress
            .insert(node.to_string(), NodeProgress::Unreachable(message));
    }

    pub fn apply_features(&mut self, node: &str, application: &str, features: Vec<FeatureState>) {
        self.unreachable.remove(node);
        let known = self
            .known_features
            .entry(application.to_string())
            .or_default();

        for feature in features {
            known.insert(feature.name.clone());
            self.cells.insert(
                CellKey::new(application, &feature.name, node),
                CellState::Value {
                    value: feature.state,
                },
            );
        }

        self.feature_progress.insert(
            (node.to_string(), application.to_string()),
            FeatureProgress::Fetched,
        );
    }

    pub fn fail_features(&mut self, node: &str, application: &str, message: String) {
        // Cells already known for this node and application keep no stale value.
        for feature in self.known_features.get(application).into_iter().flatten() {
            self.cells.insert(
                CellKey::new(application, feature, node),
                CellState::unknown(message.as_str()),
            );
        }
        self.feature_progress.insert(
            (node.to_string(), application.to_string()),
            FeatureProgress::Failed(message),
        );
    }

    /// Sets a single cell of a feature some node has already reported.
    /// Returns false and creates nothing for features no node has reported.
    pub fn set_cell(&mut self, key: CellKey, state: CellState) -> bool {
        let known = self
            .known_features
            .get(&key.application)
            .is_some_and(|features| features.contains(&key.feature));
        if known {
            self.cells.insert(key, state);
        }
        known
    }

    pub fn mark_responsive(&mut self, node: &str) {
        self.unreachable.remove(node);
    }

    pub fn record_error(&mut self, endpoint: String, message: String) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();

        self.errors.push(FetchErrorRecord {
            endpoint,
            message,
            timestamp_ms,
        });
    }

    /// Gives every absent cell whose outcome is already settled its `Unknown`
    /// reason. Cells of nodes or applications still being fetched stay absent.
    pub fn fill_missing(&mut self) {
        for (application, features) in &self.known_features {
            for node in &self.nodes {
                let reason = match self.node_progress.get(node) {
                    Some(NodeProgress::Unreachable(message)) => message.as_str(),
                    Some(NodeProgress::Listed(applications)) if !applications.contains(application) => {
                        FEATURE_NOT_PRESENT
                    }
                    Some(NodeProgress::Listed(_)) => match self
                        .feature_progress
                        .get(&(node.clone(), application.clone()))
                    {
                        Some(FeatureProgress::Fetched) => FEATURE_NOT_PRESENT,
                        Some(FeatureProgress::Failed(message)) => message.as_str(),
                        Some(FeatureProgress::Pending) | None => continue,
                    },
                    Some(NodeProgress::Listing) | None => continue,
                };

                for feature in features {
                    self.cells
                        .entry(CellKey::new(application, feature, node))
                        .or_insert_with(|| CellState::unknown(reason));
                }
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.listing_nodes
            || self
                .node_progress
                .values()
                .any(|progress| matches!(progress, NodeProgress::Listing))
            || self
                .feature_progress
                .values()
                .any(|progress| matches!(progress, FeatureProgress::Pending))
            || self
                .cells
                .values()
                .any(|cell| matches!(cell, CellState::Loading))
    }

    pub fn view(&self, epoch: u64) -> MatrixView {
        let rows = self
            .known_features
            .iter()
            .flat_map(|(application, features)| {
                features.iter().map(move |feature| MatrixRow {
                    application: application.clone(),
                    feature: feature.clone(),
                    cells: self
                        .nodes
                        .iter()
                        .map(|node| {
                            let cell = self
                                .cells
                                .get(&CellKey::new(application, feature, node))
                                .cloned()
                                .unwrap_or(CellState::Loading);
                            (node.clone(), cell)
                        })
                        .collect(),
                })
            })
            .collect();

        MatrixView {
            epoch,
            nodes: self.nodes.clone(),
            rows,
            unreachable: self.unreachable.clone(),
            errors: self.errors.clone(),
            loading: self.is_loading(),
            cycle_error: self.cycle_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(list: &[(&str, bool)]) -> Vec<FeatureState> {
        list.iter()
            .map(|(name, state)| FeatureState {
                name: name.to_string(),
                state: *state,
            })
            .collect()
    }

    fn matrix(nodes: &[&str]) -> FeatureMatrix {
        let mut matrix = FeatureMatrix::default();
        matrix.reset();
        matrix.set_nodes(nodes.iter().map(|n| n.to_string()).collect());
        matrix
    }

    #[test]
    fn test_pending_cells_render_as_loading() {
        let mut matrix = matrix(&["a", "b"]);
        matrix.mark_reachable("a", vec!["checkout".into()]);
        matrix.apply_features("a", "checkout", features(&[("new-cart", true)]));
        matrix.fill_missing();

        let view = matrix.view(1);
        assert!(view.loading);
        assert_eq!(
            view.cell("checkout", "new-cart", "a"),
            Some(&CellState::Value { value: true })
        );
        assert_eq!(view.cell("checkout", "new-cart", "b"), Some(&CellState::Loading));
    }

    #[test]
    fn test_fill_reasons() {
        let mut matrix = matrix(&["a", "b", "c", "d"]);
        matrix.mark_reachable("a", vec!["checkout".into()]);
        matrix.apply_features("a", "checkout", features(&[("new-cart", true), ("dark-mode", false)]));
        // b runs checkout but without dark-mode
        matrix.mark_reachable("b", vec!["checkout".into()]);
        matrix.apply_features("b", "checkout", features(&[("new-cart", false)]));
        // c does not run checkout at all
        matrix.mark_reachable("c", vec![]);
        matrix.mark_unreachable("d", "connection refused".into());
        matrix.fill_missing();

        let view = matrix.view(3);
        assert!(!view.loading);
        assert_eq!(
            view.cell("checkout", "dark-mode", "b"),
            Some(&CellState::unknown(FEATURE_NOT_PRESENT))
        );
        assert_eq!(
            view.cell("checkout", "new-cart", "c"),
            Some(&CellState::unknown(FEATURE_NOT_PRESENT))
        );
        assert_eq!(
            view.cell("checkout", "new-cart", "d"),
            Some(&CellState::unknown("connection refused"))
        );
        assert_eq!(view.unreachable.get("d").map(String::as_str), Some("connection refused"));

        for row in &view.rows {
            assert_eq!(row.cells.len(), 4);
        }
    }

    #[test]
    fn test_failed_feature_fetch() {
        let mut matrix = matrix(&["a", "b"]);
        matrix.mark_reachable("a", vec!["checkout".into()]);
        matrix.mark_reachable("b", vec!["checkout".into()]);
        matrix.fail_features("b", "checkout", "b answered with status 500".into());
        matrix.apply_features("a", "checkout", features(&[("new-cart", true)]));
        matrix.fill_missing();

        let view = matrix.view(1);
        assert_eq!(
            view.cell("checkout", "new-cart", "b"),
            Some(&CellState::unknown("b answered with status 500"))
        );
    }

    #[test]
    fn test_reset_clears_cycle() {
        let mut matrix = matrix(&["a"]);
        matrix.mark_unreachable("a", "timeout".into());
        matrix.record_error("http://a/applications".into(), "timeout".into());
        matrix.reset();

        let view = matrix.view(2);
        assert!(view.loading);
        assert!(view.nodes.is_empty());
        assert!(view.unreachable.is_empty());
        assert!(view.errors.is_empty());
    }

    #[test]
    fn test_set_cell_never_creates_rows() {
        let mut matrix = matrix(&["a", "b"]);
        matrix.mark_reachable("a", vec!["checkout".into()]);
        matrix.apply_features("a", "checkout", features(&[("new-cart", true)]));
        matrix.mark_reachable("b", vec![]);

        assert!(matrix.set_cell(
            CellKey::new("checkout", "new-cart", "a"),
            CellState::Value { value: false }
        ));
        assert!(!matrix.set_cell(
            CellKey::new("checkout", "typo-feature", "a"),
            CellState::unknown("not found")
        ));
        assert!(!matrix.set_cell(
            CellKey::new("billing", "invoices-v2", "b"),
            CellState::Loading
        ));
        matrix.fill_missing();

        let view = matrix.view(1);
        assert_eq!(view.rows.len(), 1);
        assert_eq!(
            view.cell("checkout", "new-cart", "a"),
            Some(&CellState::Value { value: false })
        );
        assert!(!view.loading);
    }
}
