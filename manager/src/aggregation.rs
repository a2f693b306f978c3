//! Fan-out of node, application and feature fetches into one [`FeatureMatrix`].
//!
//! Each refresh is a cycle with its own epoch and cancellation token. Starting a
//! new cycle cancels the previous one, drops its queued fetches and resets the
//! matrix. Results are written one cell at a time and only if their epoch is
//! still current when the matrix lock is taken, so a late answer from an older
//! cycle can never overwrite newer data.

use crate::gateway::{GatewayError, NodeGateway, endpoint};
use crate::matrix::{CellKey, CellState, FeatureMatrix, MatrixView};
use crate::metrics_defs::{
    FETCH_FAILURES, LIMITER_QUEUED, LIMITER_RUNNING, REFRESH_CYCLES, REFRESH_DURATION,
    STALE_UPDATES,
};
use parking_lot::Mutex;
use shared::limiter::{ConcurrencyLimiter, LimiterError};
use shared::types::{Application, FeatureState, NodeRecord};
use shared::{counter, gauge, histogram};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("fetch aborted: {0}")]
    Aborted(#[from] LimiterError),
}

impl FetchError {
    /// True when the fetch ended because its cycle was replaced.
    fn is_superseded(&self) -> bool {
        matches!(
            self,
            FetchError::Gateway(GatewayError::Cancelled) | FetchError::Aborted(LimiterError::Cleared)
        )
    }
}

#[derive(Clone)]
struct Cycle {
    epoch: u64,
    cancel: CancellationToken,
}

struct State {
    cycle: Cycle,
    matrix: FeatureMatrix,
}

struct Inner {
    gateway: Arc<dyn NodeGateway>,
    limiter: ConcurrencyLimiter,
    fetch_timeout: Duration,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct AggregationFetcher {
    inner: Arc<Inner>,
}

impl AggregationFetcher {
    pub fn new(
        gateway: Arc<dyn NodeGateway>,
        limiter: ConcurrencyLimiter,
        fetch_timeout: Duration,
    ) -> Self {
        AggregationFetcher {
            inner: Arc::new(Inner {
                gateway,
                limiter,
                fetch_timeout,
                state: Mutex::new(State {
                    cycle: Cycle {
                        epoch: 0,
                        cancel: CancellationToken::new(),
                    },
                    matrix: FeatureMatrix::default(),
                }),
            }),
        }
    }

    /// Runs a full cycle and returns the resulting view.
    ///
    /// Never fails: every error is recorded in the matrix. If another refresh
    /// starts while this one is running, this one stops early and returns the
    /// view of the newer cycle as it is at that moment. The cycle runs on its
    /// own task and completes even if the caller stops waiting for it.
    pub async fn refresh(&self) -> MatrixView {
        match tokio::spawn(self.clone().run_cycle()).await {
            Ok(view) => view,
            Err(e) => {
                tracing::error!(error = %e, "Refresh cycle task failed");
                self.snapshot()
            }
        }
    }

    async fn run_cycle(self) -> MatrixView {
        let started = Instant::now();
        let cycle = self.begin_cycle();
        tracing::debug!(epoch = cycle.epoch, "Starting refresh cycle");

        let nodes = match guarded(
            &cycle.cancel,
            self.inner.fetch_timeout,
            "node directory",
            self.inner.gateway.list_nodes(),
        )
        .await
        {
            Ok(nodes) => nodes,
            Err(GatewayError::Cancelled) => return self.snapshot(),
            Err(e) => {
                counter!(FETCH_FAILURES).increment(1);
                tracing::error!(error = %e, "Failed to list nodes");
                let message = e.to_string();
                self.update(&cycle, |matrix| {
                    matrix.record_error("nodes".into(), message.clone());
                    matrix.fail_nodes(message);
                });
                return self.snapshot();
            }
        };

        self.update(&cycle, |matrix| {
            matrix.set_nodes(nodes.iter().map(|node| node.name.clone()).collect())
        });

        let mut tasks = JoinSet::new();
        for node in nodes {
            let fetcher = self.clone();
            let cycle = cycle.clone();
            tasks.spawn(async move { fetcher.refresh_node(&cycle, node).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Node refresh task failed");
            }
        }

        histogram!(REFRESH_DURATION).record(started.elapsed().as_secs_f64());
        self.snapshot()
    }

    async fn refresh_node(&self, cycle: &Cycle, node: NodeRecord) {
        let applications = {
            let node = node.clone();
            self.submit(cycle, node.name.clone(), move |gateway| async move {
                gateway.list_applications(&node).await
            })
            .await
        };

        let applications: Vec<String> = match applications {
            Ok(applications) => applications.into_iter().map(|app| app.name).collect(),
            Err(e) if e.is_superseded() => return,
            Err(e) => {
                counter!(FETCH_FAILURES).increment(1);
                tracing::warn!(node = %node.name, error = %e, "Node unreachable");
                let message = e.to_string();
                let url = endpoint_label(&node, &["applications"]);
                self.update(cycle, |matrix| {
                    matrix.record_error(url, message.clone());
                    matrix.mark_unreachable(&node.name, message);
                });
                return;
            }
        };

        if !self.update(cycle, |matrix| {
            matrix.mark_reachable(&node.name, applications.clone())
        }) {
            return;
        }

        let mut tasks = JoinSet::new();
        for application in applications {
            let fetcher = self.clone();
            let cycle = cycle.clone();
            let node = node.clone();
            tasks.spawn(async move {
                fetcher
                    .refresh_features(&cycle, node, application)
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Feature refresh task failed");
            }
        }
    }

    async fn refresh_features(&self, cycle: &Cycle, node: NodeRecord, application: String) {
        let features = {
            let node = node.clone();
            let application = application.clone();
            self.submit(cycle, node.name.clone(), move |gateway| async move {
                gateway.list_features(&node, &application).await
            })
            .await
        };

        match features {
            Ok(features) => {
                self.update(cycle, |matrix| {
                    matrix.apply_features(&node.name, &application, features)
                });
            }
            Err(e) if e.is_superseded() => {}
            Err(e) => {
                counter!(FETCH_FAILURES).increment(1);
                tracing::warn!(
                    node = %node.name,
                    application = %application,
                    error = %e,
                    "Failed to fetch features"
                );
                let message = e.to_string();
                let url = endpoint_label(&node, &["applications", &application, "features"]);
                self.update(cycle, |matrix| {
                    matrix.record_error(url, message.clone());
                    matrix.fail_features(&node.name, &application, message);
                });
            }
        }
    }

    /// Lists the applications of one node outside of any cycle.
    pub async fn fetch_applications(
        &self,
        node: &NodeRecord,
        cancel: &CancellationToken,
    ) -> Result<Vec<Application>, GatewayError> {
        guarded(
            cancel,
            self.inner.fetch_timeout,
            &node.name,
            self.inner.gateway.list_applications(node),
        )
        .await
    }

    /// Lists the features of one application on one node outside of any cycle.
    pub async fn fetch_features(
        &self,
        node: &NodeRecord,
        application: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FeatureState>, GatewayError> {
        guarded(
            cancel,
            self.inner.fetch_timeout,
            &node.name,
            self.inner.gateway.list_features(node, application),
        )
        .await
    }

    /// Writes a feature state to a node and mirrors the outcome in the matrix.
    ///
    /// The cell shows `Loading` while the write is in flight. A failed write
    /// leaves the cell `Unknown` and is returned to the caller. Only features
    /// some node has reported have cells. The write runs on its own task, so
    /// its cell settles even if the caller stops waiting.
    pub async fn set_feature_state(
        &self,
        node: &NodeRecord,
        application: &str,
        feature: &str,
        enabled: bool,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        let write = tokio::spawn(self.clone().write_feature_state(
            node.clone(),
            application.to_string(),
            feature.to_string(),
            enabled,
            cancel.clone(),
        ));

        match write.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(GatewayError::Cancelled),
        }
    }

    async fn write_feature_state(
        self,
        node: NodeRecord,
        application: String,
        feature: String,
        enabled: bool,
        cancel: CancellationToken,
    ) -> Result<(), GatewayError> {
        let cycle = self.current_cycle();
        let key = CellKey::new(&application, &feature, &node.name);
        self.update(&cycle, |matrix| {
            matrix.set_cell(key.clone(), CellState::Loading);
        });

        let result = guarded(
            &cancel,
            self.inner.fetch_timeout,
            &node.name,
            self.inner
                .gateway
                .set_feature_state(&node, &application, &feature, enabled),
        )
        .await;

        match &result {
            Ok(()) => {
                tracing::info!(
                    node = %node.name,
                    application = %application,
                    feature = %feature,
                    enabled,
                    "Feature state written"
                );
                self.update(&cycle, |matrix| {
                    matrix.mark_responsive(&node.name);
                    matrix.set_cell(key, CellState::Value { value: enabled });
                });
            }
            Err(e) => {
                counter!(FETCH_FAILURES).increment(1);
                tracing::warn!(
                    node = %node.name,
                    application = %application,
                    feature = %feature,
                    error = %e,
                    "Feature write failed"
                );
                let message = e.to_string();
                let url = endpoint_label(&node, &["applications", &application, "features", &feature]);
                self.update(&cycle, |matrix| {
                    matrix.record_error(url, message.clone());
                    matrix.set_cell(key, CellState::unknown(message));
                });
            }
        }

        result
    }

    /// Flips the state a cell currently shows. Returns the new state.
    pub async fn toggle_feature_state(
        &self,
        node: &NodeRecord,
        application: &str,
        feature: &str,
        current: bool,
        cancel: &CancellationToken,
    ) -> Result<bool, GatewayError> {
        self.set_feature_state(node, application, feature, !current, cancel)
            .await
            .map(|()| !current)
    }

    pub fn snapshot(&self) -> MatrixView {
        gauge!(LIMITER_RUNNING).set(self.inner.limiter.running() as f64);
        gauge!(LIMITER_QUEUED).set(self.inner.limiter.queued() as f64);

        let state = self.inner.state.lock();
        state.matrix.view(state.cycle.epoch)
    }

    fn begin_cycle(&self) -> Cycle {
        counter!(REFRESH_CYCLES).increment(1);
        let mut state = self.inner.state.lock();

        state.cycle.cancel.cancel();
        let dropped = self.inner.limiter.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped queued fetches of the previous cycle");
        }

        state.cycle = Cycle {
            epoch: state.cycle.epoch + 1,
            cancel: CancellationToken::new(),
        };
        state.matrix.reset();
        state.cycle.clone()
    }

    fn current_cycle(&self) -> Cycle {
        self.inner.state.lock().cycle.clone()
    }

    /// Applies `write` to the matrix if `cycle` is still the current one.
    /// Returns false if the write was dropped.
    fn update<F>(&self, cycle: &Cycle, write: F) -> bool
    where
        F: FnOnce(&mut FeatureMatrix),
    {
        let mut state = self.inner.state.lock();
        if state.cycle.epoch != cycle.epoch {
            counter!(STALE_UPDATES).increment(1);
            return false;
        }
        write(&mut state.matrix);
        state.matrix.fill_missing();
        true
    }

    /// Queues one gateway call on the limiter, bounded by the cycle's token and
    /// the fetch timeout.
    async fn submit<F, Fut, T>(&self, cycle: &Cycle, target: String, call: F) -> Result<T, FetchError>
    where
        F: FnOnce(Arc<dyn NodeGateway>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        let gateway = self.inner.gateway.clone();
        let cancel = cycle.cancel.clone();
        let timeout = self.inner.fetch_timeout;

        let outcome = self
            .inner
            .limiter
            .run(move || async move { guarded(&cancel, timeout, &target, call(gateway)).await })
            .await?;
        Ok(outcome?)
    }
}

async fn guarded<F, T>(
    cancel: &CancellationToken,
    timeout: Duration,
    target: &str,
    call: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        result = tokio::time::timeout(timeout, call) => {
            result.unwrap_or_else(|_| Err(GatewayError::Timeout(target.to_string())))
        }
    }
}

fn endpoint_label(node: &NodeRecord, segments: &[&str]) -> String {
    endpoint(node, segments)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| format!("{}/{}", node.address, segments.join("/")))
}
