use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::{sync::Arc, time::Duration};
use tower::{Layer, Service};
use tracing::debug;

use crate::{
    limiter::{AcquireOutcome, FixedWindowLimiter},
    metrics::Metrics,
};

/// Response body sent when a request is throttled
#[derive(serde::Serialize)]
struct ThrottledResponse {
    error: String,
    message: String,
    retry_after: u64,
}

impl IntoResponse for ThrottledResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", self.retry_after.to_string())],
            axum::Json(self),
        )
            .into_response()
    }
}

/// Tower layer that gates every request through a shared fixed-window limiter
///
/// Admitted requests flow to the inner service. Rejected and timed-out
/// requests are answered with `429 Too Many Requests`, a `Retry-After`
/// header pointing at the next rotation, and a JSON body. Requests arriving
/// after the limiter shut down get `503`.
#[derive(Clone)]
pub struct ThrottleLayer {
    limiter: Arc<FixedWindowLimiter>,
    metrics: Option<Metrics>,
    max_wait: Option<Duration>,
}

impl ThrottleLayer {
    pub fn new(limiter: Arc<FixedWindowLimiter>) -> Self {
        Self {
            limiter,
            metrics: None,
            max_wait: None,
        }
    }

    /// Bound how long a queued request may wait before it is throttled
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Record admission outcomes and wait times on `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = Throttle<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Throttle {
            inner,
            limiter: Arc::clone(&self.limiter),
            metrics: self.metrics.clone(),
            max_wait: self.max_wait,
        }
    }
}

/// Tower service produced by [`ThrottleLayer`]
#[derive(Clone)]
pub struct Throttle<S> {
    inner: S,
    limiter: Arc<FixedWindowLimiter>,
    metrics: Option<Metrics>,
    max_wait: Option<Duration>,
}

impl<S> Service<Request> for Throttle<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let mut svc = self.inner.clone();
        let limiter = Arc::clone(&self.limiter);
        let metrics = self.metrics.clone();
        let max_wait = self.max_wait;

        Box::pin(async move {
            let timer = metrics.as_ref().map(|m| m.start_acquire_timer());
            let outcome = match max_wait {
                Some(bound) => limiter.acquire_timeout(bound).await,
                None => limiter.acquire().await,
            };
            drop(timer);
            if let Some(metrics) = &metrics {
                metrics.record_outcome(outcome);
                metrics.observe_limiter(&limiter.stats());
            }

            match outcome {
                AcquireOutcome::Admitted => {
                    let response = svc.call(req).await?;
                    Ok(response.into_response())
                }
                AcquireOutcome::Rejected | AcquireOutcome::TimedOut => {
                    let retry_after = limiter.duration_until_reset().as_secs().max(1);
                    debug!(
                        "request throttled ({}), retry after {}s",
                        outcome.as_str(),
                        retry_after
                    );
                    Ok(ThrottledResponse {
                        error: "too_many_requests".to_string(),
                        message: "Too many requests. Please try again later.".to_string(),
                        retry_after,
                    }
                    .into_response())
                }
                AcquireOutcome::Cancelled => Ok(StatusCode::SERVICE_UNAVAILABLE.into_response()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_response_shape() {
        let response = ThrottledResponse {
            error: "too_many_requests".to_string(),
            message: "Too many requests. Please try again later.".to_string(),
            retry_after: 7,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "7");
    }
}
