//! Retrying HTTP client.

use crate::error::IngestResult;
use rand::Rng;
use reqwest::{Request, Response, StatusCode};
use std::time::{Duration, SystemTime};

const DEFAULT_DELAY_BASE: Duration = Duration::from_secs(1);
const DEFAULT_DELAY_MAX: Duration = Duration::from_secs(20);
const DEFAULT_MAX_RETRIES: u32 = 4;

/// An HTTP client that retries transient failures with jittered
/// exponential backoff, honoring `Retry-After` where the server sends one.
///
/// Requests must not carry a body: a bodiless request can be replayed
/// verbatim, a bodied one cannot, and passing one is a programmer error.
#[derive(Debug, Clone)]
pub struct RetryClient {
    delay_base: Duration,
    delay_max: Duration,
    max_retries: u32,
    http: reqwest::Client,
}

impl Default for RetryClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl RetryClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            delay_base: DEFAULT_DELAY_BASE,
            delay_max: DEFAULT_DELAY_MAX,
            max_retries: DEFAULT_MAX_RETRIES,
            http,
        }
    }

    /// Override the backoff policy.
    pub fn with_backoff(mut self, base: Duration, max: Duration, max_retries: u32) -> Self {
        self.delay_base = base;
        self.delay_max = max;
        self.max_retries = max_retries;
        self
    }

    /// The underlying client, for building requests.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Execute `req`, retrying on transport failure, 429, and 5xx except
    /// 501. At most `max_retries + 1` attempts; the final outcome is
    /// returned as-is even when it is still retryable. Cancellation is
    /// dropping the future; the backoff sleep is a suspension point.
    ///
    /// # Panics
    ///
    /// Panics if the request has a body.
    pub async fn execute(&self, req: Request) -> IngestResult<Response> {
        assert!(
            req.body().is_none(),
            "retrying client does not support request bodies"
        );

        let mut retry = 0u32;
        loop {
            let attempt = req.try_clone().expect("bodiless requests are cloneable");
            let result = self.http.execute(attempt).await;

            let retryable = match &result {
                Err(_) => true,
                Ok(resp) => should_retry(resp.status()),
            };
            if !retryable || retry >= self.max_retries {
                return Ok(result?);
            }

            let delay = self.backoff(retry, result.as_ref().ok());
            if let Ok(resp) = result {
                // drain the connection before it goes back to the pool
                let _ = resp.bytes().await;
            }
            tracing::debug!(
                url = %req.url(),
                retry = retry + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    fn backoff(&self, retry: u32, resp: Option<&Response>) -> Duration {
        if let Some(delay) = resp.and_then(parse_retry_after) {
            return delay;
        }
        let ceiling = self
            .delay_base
            .saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX));
        let jitter = rand::thread_rng().gen_range(0..ceiling.as_nanos().max(1) as u64);
        Duration::from_nanos(jitter).min(self.delay_max)
    }
}

fn should_retry(status: StatusCode) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED
}

/// `Retry-After` on a 429 or 503: integer seconds, or an RFC-1123 date
/// where past times yield zero.
fn parse_retry_after(resp: &Response) -> Option<Duration> {
    if resp.status() != StatusCode::TOO_MANY_REQUESTS
        && resp.status() != StatusCode::SERVICE_UNAVAILABLE
    {
        return None;
    }
    let header = resp.headers().get("Retry-After")?.to_str().ok()?;

    if let Ok(secs) = header.parse::<i64>() {
        if secs < 0 {
            return None;
        }
        return Some(Duration::from_secs(secs as u64));
    }

    let at = httpdate::parse_http_date(header).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}
