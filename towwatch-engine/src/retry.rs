use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

/// Fixed-interval retry. `max_attempts == None` retries until the operation
/// succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn forever(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent. Returns the
    /// last error in the latter case.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run_if(label, |_| true, op).await
    }

    /// Like [`run`](Self::run), but gives up immediately on errors for which
    /// `retryable` returns false.
    pub async fn run_if<T, E, F, Fut, R>(&self, label: &str, retryable: R, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded after {} attempts", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !retryable(&e) => {
                    error!("{} failed with a non-retryable error: {}", label, e);
                    return Err(e);
                }
                Err(e) => {
                    if self.exhausted(attempt) {
                        error!("{} failed after {} attempts, giving up: {}", label, attempt, e);
                        return Err(e);
                    }
                    error!(
                        "{} failed (attempt {}): {}. Retrying in {:?}",
                        label, attempt, e, self.interval
                    );
                    sleep(self.interval).await;
                }
            }
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.map(|max| attempt >= max).unwrap_or(false)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::forever(Duration::from_secs(30));

        let result: Result<u32, String> = policy
            .run("flaky call", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 4 { Err(format!("failure {}", n)) } else { Ok(n) }
            })
            .await;

        assert_eq!(result, Ok(4));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_gives_up_with_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::bounded(Duration::from_secs(1), 3);

        let result: Result<(), String> = policy
            .run("dead call", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("failure {}", n))
            })
            .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::forever(Duration::from_secs(1));

        let result: Result<(), &str> = policy
            .run_if("purge", |e: &&str| *e != "fatal", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal")
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_interval_between_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::forever(Duration::from_secs(10));
        let started = tokio::time::Instant::now();

        let _: Result<(), String> = policy
            .run("slow", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err("down".to_string()) } else { Ok(()) }
            })
            .await;

        assert!(started.elapsed() >= Duration::from_secs(20));
    }
}
