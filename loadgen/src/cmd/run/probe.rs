use std::{fmt, sync::Arc, time::Duration};

use rama::{
    Service,
    error::BoxError,
    http::{
        Body, HeaderValue, Method, Request, Response, StatusCode, Uri,
        body::util::BodyExt as _, header::CONNECTION,
    },
    telemetry::tracing,
};
use tokio::time::Instant;

use super::check::Checks;

/// What the probe sends its requests to.
#[derive(Debug, Clone)]
pub enum ProbeTarget {
    Url(Uri),
    /// The target could not be resolved, every iteration fails
    /// without touching the network.
    Unusable(Arc<str>),
}

/// Observable outcome of a single completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub status: StatusCode,
    pub latency: Duration,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureKind {
    /// No (complete) response within the request timeout.
    Timeout,
    /// Connection, TLS or protocol failure.
    Transport,
    /// The target could not be turned into a request.
    InvalidTarget,
    /// Response head was received but reading the body failed.
    Body,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Transport => "transport",
            FailureKind::InvalidTarget => "invalid_target",
            FailureKind::Body => "body",
        }
    }

    /// Whether a request was attempted on the wire.
    pub fn is_http_request(self) -> bool {
        !matches!(self, FailureKind::InvalidTarget)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeFailure {
    pub kind: FailureKind,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub outcome: Result<ResponseRecord, ProbeFailure>,
    /// One entry per configured check, in order.
    pub checks: Vec<bool>,
}

impl ProbeResult {
    pub fn latency(&self) -> Duration {
        match &self.outcome {
            Ok(record) => record.latency,
            Err(failure) => failure.latency,
        }
    }
}

/// Issues one `GET` per iteration to the target and evaluates the checks
/// against the response.
///
/// Failures are never retried.
pub struct Probe<S> {
    client: S,
    target: ProbeTarget,
    checks: Checks,
    timeout: Duration,
}

impl<S> fmt::Debug for Probe<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("target", &self.target)
            .field("checks", &self.checks)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<S> Probe<S>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    pub fn new(client: S, target: ProbeTarget, checks: Checks, timeout: Duration) -> Self {
        Self {
            client,
            target,
            checks,
            timeout,
        }
    }

    pub async fn execute(&self) -> ProbeResult {
        let start = Instant::now();

        let outcome = match &self.target {
            ProbeTarget::Url(uri) => self.fetch(uri, start).await,
            ProbeTarget::Unusable(reason) => {
                tracing::trace!("skip request for unusable target: {reason}");
                Err(FailureKind::InvalidTarget)
            }
        }
        .map_err(|kind| ProbeFailure {
            kind,
            latency: start.elapsed(),
        });

        let checks = self.checks.evaluate(outcome.as_ref().ok());
        ProbeResult { outcome, checks }
    }

    async fn fetch(&self, uri: &Uri, start: Instant) -> Result<ResponseRecord, FailureKind> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri.clone())
            .header(CONNECTION, HeaderValue::from_static("keep-alive"))
            .body(Body::empty())
            .map_err(|err| {
                tracing::debug!("failed to build request for target {uri}: {err}");
                FailureKind::InvalidTarget
            })?;

        let resp = match tokio::time::timeout(self.timeout, self.client.serve(req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                let err: BoxError = err.into();
                tracing::debug!("request to {uri} failed: {err}");
                return Err(FailureKind::Transport);
            }
            Err(_) => {
                tracing::debug!("request to {uri} timed out after {:?}", self.timeout);
                return Err(FailureKind::Timeout);
            }
        };

        let status = resp.status();

        // drain the body so the connection can be reused
        let remaining = self.timeout.saturating_sub(start.elapsed());
        let bytes_received = match tokio::time::timeout(remaining, resp.into_body().collect())
            .await
        {
            Ok(Ok(collected)) => collected.to_bytes().len() as u64,
            Ok(Err(err)) => {
                tracing::debug!("failed to read response body (status {status}) from {uri}: {err}");
                return Err(FailureKind::Body);
            }
            Err(_) => {
                tracing::debug!("reading response body from {uri} timed out");
                return Err(FailureKind::Timeout);
            }
        };

        Ok(ResponseRecord {
            status,
            latency: start.elapsed(),
            bytes_received,
        })
    }
}
