use crate::metrics_defs::NODE_UPSERTS;
use indexmap::IndexMap;
use parking_lot::RwLock;
use shared::counter;
use shared::types::NodeRecord;
use std::sync::Arc;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DirectoryError {
    #[error("node name cannot be empty")]
    EmptyName,
    #[error("invalid node address {0}, expected an absolute http or https URL")]
    InvalidAddress(String),
}

#[derive(Default)]
struct Nodes {
    next_id: u64,
    by_name: IndexMap<String, NodeRecord>,
}

/// Nodes known to the Manager, in the order they were first registered.
#[derive(Clone, Default)]
pub struct NodeDirectory {
    nodes: Arc<RwLock<Nodes>>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node or updates the address of an existing one.
    /// The id assigned on first registration never changes.
    pub fn upsert(&self, name: &str, address: Url) -> Result<NodeRecord, DirectoryError> {
        if name.trim().is_empty() {
            return Err(DirectoryError::EmptyName);
        }
        if !matches!(address.scheme(), "http" | "https") || address.cannot_be_a_base() {
            return Err(DirectoryError::InvalidAddress(address.to_string()));
        }

        counter!(NODE_UPSERTS).increment(1);
        let mut nodes = self.nodes.write();

        if let Some(existing) = nodes.by_name.get_mut(name) {
            if existing.address != address {
                tracing::info!(node = name, address = %address, "Node address changed");
                existing.address = address;
            }
            return Ok(existing.clone());
        }

        nodes.next_id += 1;
        let record = NodeRecord {
            id: nodes.next_id,
            name: name.to_string(),
            address,
        };
        nodes.by_name.insert(name.to_string(), record.clone());
        tracing::info!(node = name, id = record.id, address = %record.address, "Node registered");

        Ok(record)
    }

    pub fn list(&self) -> Vec<NodeRecord> {
        self.nodes.read().by_name.values().cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<NodeRecord> {
        self.nodes
            .read()
            .by_name
            .values()
            .find(|node| node.id == id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_upsert_keeps_id() {
        let directory = NodeDirectory::new();
        let production = directory
            .upsert("production", url("http://node-prod:8080"))
            .unwrap();
        let staging = directory
            .upsert("staging", url("http://node-staging:8080"))
            .unwrap();
        assert_ne!(production.id, staging.id);

        let moved = directory
            .upsert("production", url("https://node-prod.internal"))
            .unwrap();
        assert_eq!(moved.id, production.id);
        assert_eq!(moved.address, url("https://node-prod.internal"));

        let names: Vec<_> = directory.list().into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["production", "staging"]);
        assert_eq!(directory.get(production.id).unwrap().address, moved.address);
        assert!(directory.get(999).is_none());
    }

    #[test]
    fn test_rejects_invalid_nodes() {
        let directory = NodeDirectory::new();
        assert_eq!(
            directory.upsert(" ", url("http://node:8080")),
            Err(DirectoryError::EmptyName)
        );
        assert!(matches!(
            directory.upsert("production", url("ftp://node:21")),
            Err(DirectoryError::InvalidAddress(_))
        ));
        assert!(directory.list().is_empty());
    }
}
