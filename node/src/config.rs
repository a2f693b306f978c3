use serde::Deserialize;
use std::path::PathBuf;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Environment cannot be empty")]
    EmptyEnvironment,
}

#[derive(Clone, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    #[default]
    Memory,
    Filesystem {
        path: PathBuf,
        /// Zstd-compress the snapshot file.
        #[serde(default = "default_compress")]
        compress: bool,
    },
}

fn default_compress() -> bool {
    true
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 8081,
    }
}

/// Where and as whom this Node announces itself to the Manager.
///
/// Every field is optional so a partially filled section can be reported and
/// skipped at startup instead of failing config parsing.
#[derive(Clone, Deserialize, Debug, Default, PartialEq)]
pub struct ManagerSettings {
    pub url: Option<Url>,
    pub node_name: Option<String>,
    pub node_address: Option<Url>,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    /// The only environment applications may register against on this Node.
    pub environment: String,
    #[serde(default)]
    pub store: StoreType,
    pub manager: Option<ManagerSettings>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.environment.trim().is_empty() {
            return Err(ValidationError::EmptyEnvironment);
        }

        Ok(())
    }
}
