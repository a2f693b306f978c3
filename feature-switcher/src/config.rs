use manager::config::{Config as ManagerConfig, ValidationError as ManagerValidationError};
use node::config::{Config as NodeConfig, ValidationError as NodeValidationError};
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub node: Option<NodeConfig>,
    pub manager: Option<ManagerConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// The validated `node` section.
    pub fn node(&self) -> Result<NodeConfig, ConfigError> {
        let node = self.node.clone().ok_or(ConfigError::MissingSection("node"))?;
        node.validate()?;
        Ok(node)
    }

    /// The validated `manager` section.
    pub fn manager(&self) -> Result<ManagerConfig, ConfigError> {
        let manager = self
            .manager
            .clone()
            .ok_or(ConfigError::MissingSection("manager"))?;
        manager.validate()?;
        Ok(manager)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("config has no {0} section")]
    MissingSection(&'static str),
    #[error("invalid node config: {0}")]
    InvalidNode(#[from] NodeValidationError),
    #[error("invalid manager config: {0}")]
    InvalidManager(#[from] ManagerValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use node::config::StoreType;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn node_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            node:
                listener:
                    host: 0.0.0.0
                    port: 8080
                environment: production
                store:
                    type: filesystem
                    path: /var/lib/node/features.bin
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.common.metrics.as_ref().map(|m| m.statsd_port), Some(8125));
        assert!(config.common.logging.is_none());

        let node = config.node().expect("node config");
        assert_eq!(node.environment, "production");
        assert_eq!(
            node.store,
            StoreType::Filesystem {
                path: "/var/lib/node/features.bin".into(),
                compress: true,
            }
        );
        assert!(matches!(
            config.manager(),
            Err(ConfigError::MissingSection("manager"))
        ));
    }

    #[test]
    fn manager_config() {
        let yaml = r#"
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            manager:
                max_concurrent_fetches: 0
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert!(config.common.logging.is_some());
        assert!(matches!(
            config.manager(),
            Err(ConfigError::InvalidManager(
                ManagerValidationError::InvalidConcurrency
            ))
        ));
    }
}
