//! Metrics definitions for the node.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REGISTRATIONS: MetricDef = MetricDef {
    name: "node.registrations",
    metric_type: MetricType::Counter,
    description: "Number of accepted application registrations",
};

pub const FEATURES_ADDED: MetricDef = MetricDef {
    name: "node.features.added",
    metric_type: MetricType::Counter,
    description: "Number of features added by reconciliation",
};

pub const FEATURES_REMOVED: MetricDef = MetricDef {
    name: "node.features.removed",
    metric_type: MetricType::Counter,
    description: "Number of features removed by reconciliation",
};

pub const FEATURE_TOGGLES: MetricDef = MetricDef {
    name: "node.features.toggled",
    metric_type: MetricType::Counter,
    description: "Number of explicit feature state changes",
};

pub const FEATURE_STATE_LOOKUPS: MetricDef = MetricDef {
    name: "node.features.lookups",
    metric_type: MetricType::Counter,
    description: "Number of single feature state reads",
};

pub const ANNOUNCE_ATTEMPTS: MetricDef = MetricDef {
    name: "node.announce.attempts",
    metric_type: MetricType::Counter,
    description: "Number of attempts to announce this node to the manager",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REGISTRATIONS,
    FEATURES_ADDED,
    FEATURES_REMOVED,
    FEATURE_TOGGLES,
    FEATURE_STATE_LOOKUPS,
    ANNOUNCE_ATTEMPTS,
];
