use crate::core::error::AppError;
use log::warn;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: usize, base_delay_ms: u64) -> Self {
        Self {
            retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// `base_delay * 2^attempt` plus up to 50% jitter.
    fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let jitter_cap = base.as_millis() as u64 / 2;
        let jitter = if jitter_cap > 0 {
            rand::rng().random_range(0..=jitter_cap)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}

/// Runs `op`, retrying transient failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    label,
                    attempt + 1,
                    policy.retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
