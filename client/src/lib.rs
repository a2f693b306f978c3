//! Application-side access to feature flags served by a Node.
//!
//! An application declares its features once, registers them with the Node of
//! its environment and then asks [`FeatureClient::is_feature_enabled`] whenever
//! it needs a decision.

pub mod config;
pub mod errors;
mod node_api;
pub mod resolver;

pub use config::ClientConfig;
pub use errors::ClientError;
pub use resolver::{FeatureClient, FeatureSnapshot};
pub use shared::types::DeclaredFeature;
pub use tokio_util::sync::CancellationToken;
