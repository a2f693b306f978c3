//! Metrics definitions for the manager.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REFRESH_CYCLES: MetricDef = MetricDef {
    name: "manager.refresh.cycles",
    metric_type: MetricType::Counter,
    description: "Number of aggregation cycles started",
};

pub const REFRESH_DURATION: MetricDef = MetricDef {
    name: "manager.refresh.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete an aggregation cycle in seconds",
};

pub const FETCH_FAILURES: MetricDef = MetricDef {
    name: "manager.fetch.failures",
    metric_type: MetricType::Counter,
    description: "Number of failed fetches against nodes",
};

pub const STALE_UPDATES: MetricDef = MetricDef {
    name: "manager.matrix.stale_updates",
    metric_type: MetricType::Counter,
    description: "Number of fetch results dropped because a newer cycle had started",
};

pub const LIMITER_RUNNING: MetricDef = MetricDef {
    name: "manager.limiter.running",
    metric_type: MetricType::Gauge,
    description: "Number of node fetches currently executing",
};

pub const LIMITER_QUEUED: MetricDef = MetricDef {
    name: "manager.limiter.queued",
    metric_type: MetricType::Gauge,
    description: "Number of node fetches waiting for a free slot",
};

pub const NODE_UPSERTS: MetricDef = MetricDef {
    name: "manager.nodes.upserts",
    metric_type: MetricType::Counter,
    description: "Number of node registrations received",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REFRESH_CYCLES,
    REFRESH_DURATION,
    FETCH_FAILURES,
    STALE_UPDATES,
    LIMITER_RUNNING,
    LIMITER_QUEUED,
    NODE_UPSERTS,
];
