const BASE_DELAY: u64 = 500;
const MAX_RETRIES: u32 = 3;

use crate::config::ManagerSettings;
use crate::metrics_defs::ANNOUNCE_ATTEMPTS;
use reqwest::StatusCode;
use shared::counter;
use shared::types::{NodeRecord, NodeRegistration};
use tokio::time::{Duration, sleep};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum AnnounceError {
    #[error("manager settings incomplete, missing {0}")]
    Incomplete(&'static str),
    #[error("invalid manager URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request to manager failed: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("manager rejected announcement with status {0}")]
    Rejected(StatusCode),
    #[error("manager unavailable")]
    RetriesExceeded,
}

/// Registers this Node with the Manager so it shows up in the aggregated view.
pub struct Announcer {
    client: reqwest::Client,
    url: Url,
    registration: NodeRegistration,
}

impl Announcer {
    pub fn new(settings: &ManagerSettings) -> Result<Self, AnnounceError> {
        let base = settings
            .url
            .as_ref()
            .ok_or(AnnounceError::Incomplete("url"))?;
        let node_name = settings
            .node_name
            .clone()
            .ok_or(AnnounceError::Incomplete("node_name"))?;
        let node_address = settings
            .node_address
            .clone()
            .ok_or(AnnounceError::Incomplete("node_address"))?;

        let url = Url::parse(&format!("{}/nodes", base.as_str().trim_end_matches('/')))?;

        Ok(Announcer {
            client: reqwest::Client::new(),
            url,
            registration: NodeRegistration {
                node_name,
                node_address,
            },
        })
    }

    pub async fn announce(&self) -> Result<NodeRecord, AnnounceError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let mut retries = 0;

        loop {
            counter!(ANNOUNCE_ATTEMPTS).increment(1);
            let result = self
                .client
                .put(self.url.clone())
                .json(&self.registration)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json::<NodeRecord>().await?);
                }
                Ok(response) if !RETRIABLE_STATUS_CODES.contains(&response.status()) => {
                    return Err(AnnounceError::Rejected(response.status()));
                }
                Ok(_) => {}
                // The manager may still be starting up
                Err(e) if e.is_connect() || e.is_timeout() => {}
                Err(e) => return Err(e.into()),
            }

            if retries >= MAX_RETRIES {
                return Err(AnnounceError::RetriesExceeded);
            }

            let retry_millis = BASE_DELAY * 2_u64.pow(retries);
            sleep(Duration::from_millis(retry_millis)).await;
            retries += 1;
        }
    }
}

/// Announces the Node if the settings allow it. Never fails the caller.
pub async fn announce_node(settings: Option<ManagerSettings>) {
    let Some(settings) = settings else {
        return;
    };

    let announcer = match Announcer::new(&settings) {
        Ok(announcer) => announcer,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping announcement to manager");
            return;
        }
    };

    match announcer.announce().await {
        Ok(record) => tracing::info!(
            node_id = record.id,
            node_name = %record.name,
            "Announced node to manager"
        ),
        Err(e) => tracing::error!(error = %e, url = %announcer.url, "Failed to announce node to manager"),
    }
}
