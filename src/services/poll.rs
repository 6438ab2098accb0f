// Bounded Poll
// Suspend until a probe satisfies a predicate or a wall-clock budget runs out

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Why a poll ended without the predicate holding
#[derive(Debug, Clone, PartialEq)]
pub enum PollError<E> {
    /// The deadline passed; carries the time spent polling
    Timeout { elapsed: Duration },
    /// The probe itself failed or reported a terminal value
    Failed(E),
}

/// Repeatedly run `probe` every `interval` until `check` accepts its value.
///
/// `check` returns `Ok(true)` to finish, `Ok(false)` to keep polling and
/// `Err` to abort with a terminal error. A probe still in flight when the
/// deadline passes is abandoned. Dropping the returned future cancels the poll.
pub async fn poll_until<T, E, P, Fut, C>(
    mut probe: P,
    mut check: C,
    interval: Duration,
    timeout: Duration,
) -> Result<T, PollError<E>>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&T) -> Result<bool, E>,
{
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        let value = match tokio::time::timeout_at(deadline, probe()).await {
            Ok(result) => result.map_err(PollError::Failed)?,
            Err(_) => {
                return Err(PollError::Timeout {
                    elapsed: started.elapsed(),
                })
            }
        };

        if check(&value).map_err(PollError::Failed)? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout {
                elapsed: now - started,
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_predicate_holds() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<u32, PollError<String>> = poll_until(
            || {
                let calls = calls.clone();
                async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }
            },
            |n| Ok(*n >= 3),
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_predicate_never_holds() {
        let started = Instant::now();
        let result: Result<(), PollError<String>> = poll_until(
            || async { Ok(()) },
            |_| Ok(false),
            Duration::from_secs(5),
            Duration::from_secs(12),
        )
        .await;

        assert!(matches!(result, Err(PollError::Timeout { .. })));
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_check_aborts_immediately() {
        let result: Result<&str, PollError<String>> = poll_until(
            || async { Ok("CREATE_FAILED") },
            |state| {
                if state.ends_with("FAILED") {
                    Err(format!("channel entered {state}"))
                } else {
                    Ok(false)
                }
            },
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .await;

        assert_eq!(result, Err(PollError::Failed("channel entered CREATE_FAILED".to_string())));
    }
}
