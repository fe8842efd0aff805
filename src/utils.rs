//! Shared HTTP plumbing: status checks, retry backoff and request pacing.

use crate::error::ApiError;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// User agent sent with every request. MangaDex rejects spoofed browser agents.
pub const USER_AGENT: &str = concat!("mangascribe/", env!("CARGO_PKG_VERSION"));

/// Builds the HTTP client shared by the API client and the image fetcher.
pub fn create_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

/// Checks if a status code is worth retrying (rate limiting or server errors).
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Checks if an HTTP response is successful, and if not, returns an error
/// that preserves the status code and the requested URL.
pub fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }
    Ok(response)
}

/// Exponential backoff delay for the given retry attempt (1-based).
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Enforces a minimum spacing between request starts.
///
/// Callers reserve the next free slot under the lock and sleep outside it,
/// so concurrent waiters are released one interval apart.
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    /// Creates a pacer with the given delay between request starts in seconds.
    pub fn new(delay_sec: f64) -> Self {
        let interval = if delay_sec > 0.0 {
            Duration::from_secs_f64(delay_sec)
        } else {
            Duration::ZERO
        };

        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits until the caller may start its request.
    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }

        let start = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let start = match *next_slot {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next_slot = Some(start + self.interval);
            start
        };

        tokio::time::sleep_until(start).await;
    }
}
