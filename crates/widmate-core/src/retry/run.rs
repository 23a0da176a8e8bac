//! Retry loop: run a closure until success or policy says stop.

use super::error::FetchError;
use super::policy::RetryPolicy;

/// Runs `f` until it succeeds or the retry policy says to stop, sleeping the
/// backoff between attempts. Blocking; call from the blocking pool.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut f: F) -> Result<T, FetchError>
where
    F: FnMut() -> Result<T, FetchError>,
{
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let Some(delay) = policy.backoff(attempt, e.class()) else {
                    return Err(e);
                };
                tracing::debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying registry request");
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
