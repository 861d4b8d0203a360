//! Timing constants and async timeout helpers.
//!
//! RPC reads are never timed out locally; the daemon enforces DHT timeouts
//! itself. These values bound only local waits such as daemon startup.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Upper bound for the daemon control socket to become connectable
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed interval between readiness probes
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for the daemon to reach its minimum peer count
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed interval between peer count probes
pub const PEER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Grace period for the daemon process to exit after being killed
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `fut`, mapping an elapsed deadline to `ProtocolError::Timeout`
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Number of fixed-interval attempts that fit in `total`
pub fn attempts_within(total: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let count = total.as_millis() / interval.as_millis().max(1);
    u32::try_from(count).unwrap_or(u32::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_within() {
        assert_eq!(attempts_within(Duration::from_secs(1), Duration::from_millis(100)), 10);
        assert_eq!(attempts_within(Duration::from_millis(50), Duration::from_millis(100)), 1);
        assert_eq!(attempts_within(Duration::from_secs(1), Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_timeout_maps_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let result = with_timeout_error(slow, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }
}
