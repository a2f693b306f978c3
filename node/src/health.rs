use async_trait::async_trait;
use shared::admin_service::{CheckResult, HealthCheck};
use std::time::Duration;
use url::Url;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Reports whether the Manager this Node announces itself to answers.
pub struct ManagerHealthCheck {
    client: reqwest::Client,
    url: Url,
}

impl ManagerHealthCheck {
    /// Checks `{base}/nodes`, the endpoint the announcement goes to.
    pub fn new(base: &Url) -> Result<Self, HealthCheckError> {
        let url = Url::parse(&format!("{}/nodes", base.as_str().trim_end_matches('/')))?;
        let client = reqwest::Client::builder().timeout(CHECK_TIMEOUT).build()?;
        Ok(ManagerHealthCheck { client, url })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HealthCheckError {
    #[error("invalid manager URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("could not build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[async_trait]
impl HealthCheck for ManagerHealthCheck {
    fn name(&self) -> &str {
        "manager"
    }

    async fn check(&self) -> CheckResult {
        match self.client.get(self.url.clone()).send().await {
            Ok(response) if response.status().is_success() => CheckResult::healthy("Connected"),
            Ok(response) => CheckResult::degraded("Manager returned an error")
                .with_data("http_code", response.status().as_u16()),
            Err(e) => CheckResult::unhealthy(format!("Request failed: {e}")),
        }
    }
}
