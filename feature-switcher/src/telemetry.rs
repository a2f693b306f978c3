use crate::config::CommonConfig;
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRICS_PREFIX: &str = "feature_switcher";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}

/// Keeps the Sentry client alive. Events still queued are flushed on drop.
pub struct TelemetryGuard {
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Installs logging, error reporting and metrics for the whole process.
pub fn init(common: &CommonConfig) -> Result<TelemetryGuard, TelemetryError> {
    let sentry = common.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    if let Some(metrics) = &common.metrics {
        let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
            .build(Some(METRICS_PREFIX))?;
        metrics::set_global_recorder(recorder).map_err(|_| TelemetryError::RecorderInstalled)?;

        describe_all(node::metrics_defs::ALL_METRICS);
        describe_all(manager::metrics_defs::ALL_METRICS);
        tracing::info!(
            host = %metrics.statsd_host,
            port = metrics.statsd_port,
            "Sending metrics to statsd"
        );
    }

    Ok(TelemetryGuard { _sentry: sentry })
}
