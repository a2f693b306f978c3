pub mod admin_service;
pub mod http;
pub mod limiter;
pub mod metrics_defs;
pub mod types;
