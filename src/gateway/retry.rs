use super::GatewayError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Exponential backoff for idempotent gateway calls. Submissions never go
/// through here; the user re-invoking submit is their retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u8,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u8) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn should_retry(&self, attempt: u8, error: &GatewayError) -> bool {
        if attempt >= self.max_retries {
            return false;
        }

        error.is_retryable()
    }

    pub fn delay_for(&self, attempt: u8) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt as u32);
        self.base_delay.saturating_mul(multiplier)
    }

    pub async fn wait_before_retry(&self, attempt: u8) {
        let delay = self.delay_for(attempt);
        tracing::info!(
            "Retrying in {}ms (attempt {})",
            delay.as_millis(),
            attempt + 2
        );
        sleep(delay).await;
    }

    /// Run `call` until it succeeds, fails permanently or retries run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0u8;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}",
                        label,
                        attempt + 1,
                        self.max_retries as u32 + 1,
                        e
                    );
                    if !self.should_retry(attempt, &e) {
                        return Err(e);
                    }
                    self.wait_before_retry(attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    }

    #[test]
    fn only_transient_errors_retry() {
        let policy = RetryPolicy::new(2);
        assert!(policy.should_retry(0, &GatewayError::Timeout));
        assert!(!policy.should_retry(2, &GatewayError::Timeout));
        assert!(!policy.should_retry(0, &GatewayError::Unauthorized));
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = RetryPolicy::new(2)
            .run("completeSection", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(GatewayError::Network("reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_gives_up_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = RetryPolicy::new(1)
            .run("getTtsAudio", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Timeout)
            })
            .await;
        assert_eq!(result, Err(GatewayError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
