//! Liveness and readiness endpoints served on a separate admin listener.
//!
//! `/health` answers as long as the process is accepting connections. When
//! dependency checks are registered it runs them and answers with a JSON report
//! instead, 503 if any check is unhealthy. `/ready` answers 200 only once the
//! owning service reports that it is serving traffic.

use crate::http::{make_boxed_error_response, make_boxed_ok_response};
use async_trait::async_trait;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(thiserror::Error, Debug)]
pub enum AdminError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared readiness flag flipped by the owning service once it is serving.
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// Ordered worst first, so the overall status is the minimum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthStatus {
    Unhealthy,
    Degraded,
    Healthy,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    pub description: String,
    pub data: BTreeMap<String, serde_json::Value>,
}

impl CheckResult {
    pub fn healthy<D: Into<String>>(description: D) -> Self {
        Self::new(HealthStatus::Healthy, description)
    }

    pub fn degraded<D: Into<String>>(description: D) -> Self {
        Self::new(HealthStatus::Degraded, description)
    }

    pub fn unhealthy<D: Into<String>>(description: D) -> Self {
        Self::new(HealthStatus::Unhealthy, description)
    }

    pub fn with_data<V: Into<serde_json::Value>>(mut self, key: &str, value: V) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    fn new<D: Into<String>>(status: HealthStatus, description: D) -> Self {
        CheckResult {
            status,
            description: description.into(),
            data: BTreeMap::new(),
        }
    }
}

/// A dependency the service reports on in `/health`.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> CheckResult;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NamedCheck {
    pub name: String,
    #[serde(flatten)]
    pub result: CheckResult,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<NamedCheck>,
}

pub async fn run_checks(checks: &[Arc<dyn HealthCheck>]) -> HealthReport {
    let mut results = Vec::with_capacity(checks.len());
    for check in checks {
        let result = check.check().await;
        if result.status != HealthStatus::Healthy {
            tracing::warn!(
                check = check.name(),
                status = ?result.status,
                description = %result.description,
                "Health check not passing"
            );
        }
        results.push(NamedCheck {
            name: check.name().to_string(),
            result,
        });
    }

    HealthReport {
        status: results
            .iter()
            .map(|named| named.result.status)
            .min()
            .unwrap_or(HealthStatus::Healthy),
        checks: results,
    }
}

pub struct AdminService {
    readiness: Readiness,
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl AdminService {
    pub fn new(readiness: Readiness) -> Self {
        Self {
            readiness,
            checks: Vec::new(),
        }
    }

    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }
}

impl Service<Request<Incoming>> for AdminService {
    type Response = Response<BoxBody<Bytes, AdminError>>;
    type Error = AdminError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        if *req.method() == Method::GET && req.uri().path() == "/health" && !self.checks.is_empty() {
            let checks = self.checks.clone();
            return Box::pin(async move { Ok(health_response(&run_checks(&checks).await)) });
        }

        let is_ready = self.readiness.is_ready();
        let res = route(req.method(), req.uri().path(), is_ready);
        Box::pin(async move { Ok(res) })
    }
}

fn route(method: &Method, path: &str, is_ready: bool) -> Response<BoxBody<Bytes, AdminError>> {
    if method != Method::GET {
        return make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    match path {
        "/health" => make_boxed_ok_response(),
        "/ready" => match is_ready {
            true => make_boxed_ok_response(),
            false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
        },
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

fn health_response(report: &HealthReport) -> Response<BoxBody<Bytes, AdminError>> {
    let body = match serde_json::to_vec(report) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize health report");
            return make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed());
    *response.status_mut() = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Degraded | HealthStatus::Healthy => StatusCode::OK,
    };
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
