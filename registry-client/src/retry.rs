use std::time::Duration;

use http::StatusCode;
use hyperdriver::Body;
use tower::retry::Policy;

/// Retry policy for transient failures: exponential backoff with a bounded
/// number of attempts.
///
/// Timeouts, server errors, rate limiting and transport errors are retried.
/// A `Retry-After` header on a 429 response overrides the next delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// The delay before the next retry
    pub delay: Duration,

    /// The factor applied to the delay after each retry
    pub exponent: u32,

    /// Delays are capped at this value
    pub max_delay: Duration,

    /// Retries remaining
    pub attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(250),
            exponent: 2,
            max_delay: Duration::from_secs(30),
            attempts: 5,
        }
    }
}

impl Backoff {
    /// Create a new backoff policy.
    pub fn new(delay: Duration, exponent: u32, max_delay: Duration, attempts: u32) -> Self {
        Self {
            delay,
            exponent,
            max_delay,
            attempts,
        }
    }

    /// Consume one attempt. Returns the delay to wait before retrying, or
    /// `None` when no attempts remain.
    pub fn increment(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.checked_sub(1)?;
        let delay = self.delay;
        self.delay = self
            .delay
            .checked_mul(self.exponent)
            .map_or(self.max_delay, |next| next.min(self.max_delay));
        Some(delay)
    }

    /// Consume one attempt, waiting for a server-provided delay instead of
    /// the current backoff.
    pub fn rate_limited(&mut self, delay: Duration) -> Option<Duration> {
        self.increment().map(|_| delay.min(self.max_delay))
    }
}

fn retry_after(response: &http::Response<Body>) -> Option<Duration> {
    response
        .headers()
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl<E> Policy<http::Request<Body>, http::Response<Body>, E> for Backoff {
    type Future = BackoffFuture;

    fn retry(
        &mut self,
        req: &mut http::Request<Body>,
        result: &mut Result<http::Response<Body>, E>,
    ) -> Option<Self::Future> {
        let delay = match result {
            Ok(res) => match res.status() {
                StatusCode::TOO_MANY_REQUESTS => {
                    tracing::debug!("retrying request to {} due to rate limit", req.uri());
                    match retry_after(res) {
                        Some(delay) => self.rate_limited(delay),
                        None => self.increment(),
                    }
                }
                StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
                    tracing::debug!("retrying request to {} due to timeout", req.uri());
                    self.increment()
                }
                status if status.is_server_error() => {
                    tracing::debug!("retrying request to {} due to server error", req.uri());
                    self.increment()
                }
                _ => None,
            },
            Err(_) => {
                tracing::warn!("retrying request to {} due to error", req.uri());
                self.increment()
            }
        };

        delay.map(BackoffFuture::new)
    }

    fn clone_request(&mut self, req: &http::Request<Body>) -> Option<http::Request<Body>> {
        let body = req.body().try_clone()?;

        let mut next = http::Request::new(body);
        *next.method_mut() = req.method().clone();
        *next.uri_mut() = req.uri().clone();
        *next.version_mut() = req.version();
        *next.headers_mut() = req.headers().clone();
        *next.extensions_mut() = req.extensions().clone();

        Some(next)
    }
}

/// Sleeps before a retry.
#[derive(Debug)]
#[pin_project::pin_project]
pub struct BackoffFuture {
    #[pin]
    sleep: tokio::time::Sleep,
}

impl BackoffFuture {
    fn new(delay: Duration) -> Self {
        Self {
            sleep: tokio::time::sleep(delay),
        }
    }
}

impl std::future::Future for BackoffFuture {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.project().sleep.poll(cx)
    }
}
