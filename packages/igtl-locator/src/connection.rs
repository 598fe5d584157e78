// Connection manager - owns the device link and brings it up with bounded retry

use crate::device::DeviceLink;
use crate::error::ConnectionError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CONNECT_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// Successful connection report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connected {
    pub host: String,
    pub port: u16,
    /// 1-based attempt that succeeded
    pub attempt: u32,
}

pub struct ConnectionManager<L: DeviceLink> {
    link: L,
    policy: RetryPolicy,
    connected: Option<Connected>,
}

impl<L: DeviceLink> ConnectionManager<L> {
    pub fn new(link: L, policy: RetryPolicy) -> Self {
        Self {
            link,
            policy,
            connected: None,
        }
    }

    /// Start the client connection, retrying up to the policy's attempt bound
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<Connected, ConnectionError> {
        if self.policy.attempts == 0 {
            return Err(ConnectionError::InvalidTarget(
                "connect attempts must be at least 1".to_string(),
            ));
        }
        if host.is_empty() {
            return Err(ConnectionError::InvalidTarget("empty host".to_string()));
        }

        if self.connected.is_some() {
            self.disconnect().await;
        }

        log::info!("Connecting to {}:{}", host, port);
        self.link.set_client_target(host, port);

        for attempt in 1..=self.policy.attempts {
            if self.link.start().await {
                log::info!("Connected to {}:{} after {} attempts", host, port, attempt);
                let connected = Connected {
                    host: host.to_string(),
                    port,
                    attempt,
                };
                self.connected = Some(connected.clone());
                return Ok(connected);
            }

            log::debug!("Connection attempt {} failed, retrying...", attempt);
            if attempt < self.policy.attempts {
                tokio::time::sleep(Duration::from_millis(self.policy.delay_ms)).await;
            }
        }

        log::warn!(
            "Could not connect to {}:{} after {} attempts",
            host,
            port,
            self.policy.attempts
        );
        Err(ConnectionError::Unreachable {
            host: host.to_string(),
            port,
            attempts: self.policy.attempts,
        })
    }

    /// Stop the connection. Calling this while disconnected is a no-op.
    pub async fn disconnect(&mut self) {
        if self.connected.take().is_none() && !self.link.is_connected() {
            return;
        }
        log::info!("Disconnecting device link");
        self.link.stop().await;
    }

    /// Record that the link dropped on its own
    pub fn mark_lost(&mut self) {
        if let Some(lost) = self.connected.take() {
            log::warn!("Connection to {}:{} lost", lost.host, lost.port);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    pub fn connection(&self) -> Option<&Connected> {
        self.connected.as_ref()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ControlQuery;
    use crate::error::LocatorResult;
    use async_trait::async_trait;

    /// Link that refuses the first `failures` starts
    struct FlakyLink {
        failures: u32,
        starts: u32,
        stops: u32,
        up: bool,
        target: Option<(String, u16)>,
    }

    impl FlakyLink {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                starts: 0,
                stops: 0,
                up: false,
                target: None,
            }
        }
    }

    #[async_trait]
    impl DeviceLink for FlakyLink {
        fn set_client_target(&mut self, host: &str, port: u16) {
            self.target = Some((host.to_string(), port));
        }

        async fn start(&mut self) -> bool {
            self.starts += 1;
            self.up = self.starts > self.failures;
            self.up
        }

        async fn stop(&mut self) {
            if self.up {
                self.stops += 1;
            }
            self.up = false;
        }

        async fn send_control_query(&mut self, _query: &ControlQuery) -> LocatorResult<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.up
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 10,
            delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_connect_succeeds_on_third_attempt() {
        let mut manager = ConnectionManager::new(FlakyLink::new(2), fast_policy());

        let connected = manager.connect("localhost", 18944).await.unwrap();
        assert_eq!(connected.attempt, 3);
        assert_eq!(connected.port, 18944);
        assert!(manager.is_connected());
        assert_eq!(
            manager.link().target,
            Some(("localhost".to_string(), 18944))
        );
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_bound() {
        let mut manager = ConnectionManager::new(FlakyLink::new(u32::MAX), fast_policy());

        let err = manager.connect("localhost", 18944).await.unwrap_err();
        assert_eq!(
            err,
            ConnectionError::Unreachable {
                host: "localhost".to_string(),
                port: 18944,
                attempts: 10,
            }
        );
        assert_eq!(manager.link().starts, 10);
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_waits_between_attempts() {
        let mut manager = ConnectionManager::new(FlakyLink::new(u32::MAX), RetryPolicy::default());

        let started = tokio::time::Instant::now();
        assert!(manager.connect("localhost", 18944).await.is_err());
        // Nine gaps of 300 ms between ten attempts
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2700));
        assert!(elapsed < Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut manager = ConnectionManager::new(FlakyLink::new(0), fast_policy());
        manager.disconnect().await;
        assert_eq!(manager.link().stops, 0);

        manager.connect("localhost", 18944).await.unwrap();
        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.link().stops, 1);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let policy = RetryPolicy {
            attempts: 0,
            delay_ms: 1,
        };
        let mut manager = ConnectionManager::new(FlakyLink::new(0), policy);
        assert!(matches!(
            manager.connect("localhost", 18944).await,
            Err(ConnectionError::InvalidTarget(_))
        ));
    }
}
