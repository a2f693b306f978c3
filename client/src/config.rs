use std::time::Duration;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of the application and the Node it reads its features from.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub application_name: String,
    pub environment: String,
    pub node_address: Url,
    /// Upper bound for a single state read against the Node.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new<A, E>(application_name: A, environment: E, node_address: Url) -> Self
    where
        A: Into<String>,
        E: Into<String>,
    {
        ClientConfig {
            application_name: application_name.into(),
            environment: environment.into(),
            node_address,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}
