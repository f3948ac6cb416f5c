//! Propagation waiting with exponential backoff and cancellation support.
//!
//! A just-created remote object may not be visible to reads for a while.
//! [`wait_for_found`] polls until the object shows up, the window elapses,
//! or the caller cancels.

use std::future::Future;
use std::time::Duration;

use log::debug;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for waiting with exponential backoff.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
    /// Jitter factor (0.0 - 1.0) to add randomness to delays
    pub jitter: f64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
            jitter: 0.25,
        }
    }
}

/// Why waiting stopped without a result
#[derive(Debug, PartialEq)]
pub enum WaitError<E> {
    /// The window elapsed and the last check still found nothing
    Timeout { attempts: u32, waited: Duration },
    /// The cancellation token fired
    Cancelled,
    /// The check itself failed with a non-retryable error
    Check(E),
}

/// Poll `check` until it yields a value.
///
/// `check` returns `Ok(Some(_))` when found, `Ok(None)` when not yet visible
/// (retry), and `Err(_)` to stop immediately. A last check always runs once
/// the window has elapsed, so a resource that appears right at the deadline
/// is still found.
pub async fn wait_for_found<T, E, F, Fut>(
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
    mut check: F,
    resource_name: &str,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let mut delay = config.initial_delay;
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(WaitError::Cancelled);
        }

        match check().await {
            Ok(Some(found)) => {
                debug!("{} visible after {} attempt(s)", resource_name, attempts);
                return Ok(found);
            }
            Ok(None) => {}
            Err(e) => return Err(WaitError::Check(e)),
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            return Err(WaitError::Timeout {
                attempts,
                waited: elapsed,
            });
        }

        let remaining = config.timeout - elapsed;
        let sleep_for = jittered_delay(delay, config.jitter).min(remaining);
        debug!(
            "{} not visible yet (attempt {}), retrying in {}ms",
            resource_name,
            attempts,
            sleep_for.as_millis()
        );

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                return Err(WaitError::Cancelled);
            }
        }

        delay = (delay * 2).min(config.max_delay);
    }
}

/// Add jitter to a duration to prevent thundering herd.
fn jittered_delay(base: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(0.0..jitter_factor);
    Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
}
