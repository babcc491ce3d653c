//! Retry logic with exponential backoff for transient backend errors.
//!
//! Plugins wrap individual backend calls with [`with_retry`]; the engine
//! itself never retries a whole task.

use crate::error::TaskError;
use crate::types::RetryConfig;
use std::thread;
use std::time::Duration;

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called before sleeping ahead of the next attempt.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &TaskError, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &TaskError, _delay: Duration) {}
}

/// Callback that logs retries at warn level.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &TaskError, delay: Duration) {
        log::warn!(
            "Attempt {}/{} failed: {}. Retrying in {:.1}s",
            attempt,
            max_attempts,
            error,
            delay.as_secs_f64()
        );
    }
}

/// Execute an operation with retry logic.
///
/// Retries the operation while it returns a retryable error, sleeping with
/// exponential backoff between attempts. Non-retryable errors are returned
/// immediately.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, TaskError>
where
    F: FnMut() -> Result<T, TaskError>,
{
    let mut last_error: Option<TaskError> = None;

    for attempt in 0..config.max_attempts {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }

                if attempt + 1 >= config.max_attempts {
                    last_error = Some(e);
                    break;
                }

                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, config.max_attempts, &e, delay);
                }

                thread::sleep(delay);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| TaskError::Other("retry exhausted".to_string())))
}

/// Execute an operation with the default config, logging each retry.
pub fn with_retry_logged<T, F>(operation: F) -> Result<T, TaskError>
where
    F: FnMut() -> Result<T, TaskError>,
{
    with_retry(&RetryConfig::default(), Some(&LogCallback), operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let result = with_retry(&RetryConfig::no_retry(), None, || Ok::<_, TaskError>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_retry_non_retryable_error() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<(), TaskError> = with_retry(&fast_config(3), None, || {
            attempts_clone.set(attempts_clone.get() + 1);
            Err(TaskError::access_denied("UnauthorizedOperation"))
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry(&fast_config(3), None, || {
            let current = attempts_clone.get();
            attempts_clone.set(current + 1);
            if current < 2 {
                Err(TaskError::transient("RequestLimitExceeded"))
            } else {
                Ok(7)
            }
        });

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_with_retry_exhausted_returns_last_error() {
        let result: Result<(), TaskError> = with_retry(&fast_config(2), None, || {
            Err(TaskError::transient("timeout"))
        });

        assert_eq!(result.unwrap_err(), TaskError::transient("timeout"));
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingCallback(Arc<AtomicU32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: u32, _: u32, _: &TaskError, _: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let callback = CountingCallback(count.clone());

        let _: Result<(), TaskError> = with_retry(&fast_config(3), Some(&callback), || {
            Err(TaskError::transient("timeout"))
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
