//! Startup readiness: wait until the provider host is reachable.

use std::future::Future;
use std::time::Duration;

use log::{info, warn};

use crate::errors::{Error, Result};

/// Retry `probe` with a fixed backoff until it succeeds. This is the only
/// unbounded retry loop in the agent. Returns the number of attempts made.
pub async fn wait_until_ready<F, Fut>(target: &str, backoff: Duration, mut probe: F) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        match probe().await {
            Ok(()) => {
                info!("[Readiness] DNS ok for {} (attempts: {})", target, attempts);
                return attempts;
            }
            Err(err) => {
                warn!("[Readiness] {}; retrying in {:?}", err, backoff);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Resolve `host` through the system resolver.
pub async fn resolve_host(host: &str) -> Result<()> {
    let mut addrs = tokio::net::lookup_host((host, 443))
        .await
        .map_err(|err| Error::Readiness(format!("DNS lookup failed for {}: {}", host, err)))?;
    if addrs.next().is_none() {
        return Err(Error::Readiness(format!(
            "DNS lookup returned no records for {}",
            host
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn retries_until_probe_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let attempts = wait_until_ready("api.example.test", Duration::from_secs(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(Error::Readiness("not yet".to_string()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn ready_probe_returns_on_first_attempt() {
        let attempts =
            wait_until_ready("localhost", Duration::from_secs(1), || async { Ok(()) }).await;
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn localhost_resolves() {
        resolve_host("localhost").await.unwrap();
    }
}
