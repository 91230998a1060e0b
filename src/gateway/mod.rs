// Shared plumbing for calls to external model services
// Timeout enforcement for async callers and an HTTP retry loop for ureq


use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};
use url::Url;

use crate::{RagError, Result};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Await `future`, failing with [`RagError::GatewayTimeout`] once `timeout` elapses.
///
/// Dropping the returned future drops `future` with it, so an abandoned
/// query stops waiting on its collaborator.
#[inline]
pub async fn call_with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if let Ok(result) = tokio::time::timeout(timeout, future).await {
        result
    } else {
        warn!("{} did not finish within {:?}", operation, timeout);
        Err(RagError::GatewayTimeout { operation, timeout })
    }
}

/// Run a blocking gateway call on the blocking pool, bounded by `timeout`
#[inline]
pub async fn run_blocking<T, F>(operation: &'static str, timeout: Duration, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    call_with_timeout(operation, timeout, async move {
        tokio::task::spawn_blocking(call)
            .await
            .map_err(|e| RagError::Gateway(format!("{} task failed: {}", operation, e)))?
    })
    .await
}

/// Blocking HTTP client with retry and error classification
#[derive(Debug, Clone)]
pub struct HttpGateway {
    operation: &'static str,
    agent: ureq::Agent,
    timeout: Duration,
    retry_attempts: u32,
    backoff: Duration,
}

impl HttpGateway {
    #[inline]
    pub fn new(operation: &'static str, timeout: Duration) -> Self {
        Self {
            operation,
            agent: build_agent(timeout),
            timeout,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: Duration::from_secs(1),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; doubles on each further attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    #[inline]
    pub fn get(&self, url: &Url) -> Result<String> {
        self.execute_with_retry(url, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    #[inline]
    pub fn post_json(&self, url: &Url, body: &str, bearer: Option<&str>) -> Result<String> {
        self.execute_with_retry(url, || {
            let mut request = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            if let Some(key) = bearer {
                request = request.header("Authorization", format!("Bearer {}", key));
            }
            request
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn execute_with_retry<F>(&self, url: &Url, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "{} request attempt {}/{} to {}",
                self.operation, attempt, self.retry_attempts, url
            );

            let error = match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => error,
            };

            let classified = match &error {
                ureq::Error::StatusCode(429) => {
                    warn!("{} rate limited by {}", self.operation, url);
                    return Err(RagError::RateLimited(format!(
                        "{} endpoint returned HTTP 429",
                        self.operation
                    )));
                }
                ureq::Error::StatusCode(status) if *status >= 500 => {
                    warn!(
                        "Server error (status {}), attempt {}/{}",
                        status, attempt, self.retry_attempts
                    );
                    RagError::Gateway(format!(
                        "{} endpoint returned HTTP {}",
                        self.operation, status
                    ))
                }
                ureq::Error::StatusCode(status) => {
                    warn!("Client error (status {}), not retrying", status);
                    return Err(RagError::Gateway(format!(
                        "{} request rejected: HTTP {}",
                        self.operation, status
                    )));
                }
                ureq::Error::Timeout(_) => {
                    warn!(
                        "{} timed out, attempt {}/{}",
                        self.operation, attempt, self.retry_attempts
                    );
                    RagError::GatewayTimeout {
                        operation: self.operation,
                        timeout: self.timeout,
                    }
                }
                ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    RagError::Gateway(format!("{} transport error: {}", self.operation, error))
                }
                _ => {
                    warn!("Non-retryable error: {}", error);
                    return Err(RagError::Gateway(format!(
                        "{} request failed: {}",
                        self.operation, error
                    )));
                }
            };
            last_error = Some(classified);

            if attempt < self.retry_attempts {
                let delay = self
                    .backoff
                    .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt - 1));
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All retry attempts failed for request to {}", url);
        Err(last_error.unwrap_or_else(|| {
            RagError::Gateway(format!("{} request failed after retries", self.operation))
        }))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}
