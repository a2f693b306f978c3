use crate::errors::ClientError;
use reqwest::StatusCode;
use shared::types::ApplicationRegistration;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// The two Node endpoints an application talks to.
#[derive(Clone, Debug)]
pub(crate) struct NodeApi {
    client: reqwest::Client,
    base: Url,
}

impl NodeApi {
    pub fn new(base: Url) -> Result<Self, ClientError> {
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(ClientError::InvalidConfiguration(
                "node address must be an absolute http or https URL",
            ));
        }

        Ok(NodeApi {
            client: reqwest::Client::new(),
            base,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidConfiguration("node address cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn register(
        &self,
        registration: &ApplicationRegistration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&["applications"])?;

        let exchange = async {
            let response = self
                .client
                .post(url)
                .json(registration)
                .send()
                .await
                .map_err(|e| ClientError::unreachable(&e))?;

            match response.status() {
                status if status.is_success() => Ok(()),
                StatusCode::UNPROCESSABLE_ENTITY => Err(ClientError::EnvironmentMismatch(
                    registration.environment.clone(),
                )),
                status => Err(ClientError::RegistrationFailed {
                    status: status.as_u16(),
                }),
            }
        };

        guarded(cancel, timeout, exchange).await
    }

    pub async fn feature_state(
        &self,
        application: &str,
        feature: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, ClientError> {
        let url = self.endpoint(&["applications", application, "features", feature, "state"])?;

        let exchange = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| ClientError::unreachable(&e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ClientError::NodeUnreachable {
                    message: format!("node answered with status {status}"),
                    code: None,
                });
            }

            response
                .json::<bool>()
                .await
                .map_err(|e| ClientError::unreachable(&e))
        };

        guarded(cancel, timeout, exchange).await
    }
}

/// Runs `exchange` until it completes, `timeout` elapses or `cancel` fires.
/// Cancellation wins over every other outcome.
async fn guarded<F, T>(
    cancel: &CancellationToken,
    timeout: Duration,
    exchange: F,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = tokio::time::timeout(timeout, exchange) => match result {
            Ok(result) => result,
            Err(_) => Err(ClientError::NodeUnreachable {
                message: format!("no answer within {}ms", timeout.as_millis()),
                code: None,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = NodeApi::new(Url::parse("http://node.internal:8080/switcher/").unwrap()).unwrap();
        let url = api
            .endpoint(&["applications", "check out", "features", "new-cart", "state"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://node.internal:8080/switcher/applications/check%20out/features/new-cart/state"
        );
    }

    #[test]
    fn test_rejects_non_http_address() {
        for address in ["mailto:ops@example.com", "ftp://node.internal/"] {
            assert!(matches!(
                NodeApi::new(Url::parse(address).unwrap()),
                Err(ClientError::InvalidConfiguration(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_timeout() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = guarded(&cancel, Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_timeout_is_unreachable() {
        let result: Result<(), _> =
            guarded(&CancellationToken::new(), Duration::from_millis(20), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(ClientError::NodeUnreachable { code: None, .. })
        ));
    }
}
