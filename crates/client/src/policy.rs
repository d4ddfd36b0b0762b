//! Client connection configuration.

use std::time::Duration;

/// Fixed-delay reconnection policy.
///
/// After a lost connection (or a failed first connect) the client makes up to
/// `attempts` further tries, `delay` apart. Each try is abandoned after
/// `connect_timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(20000),
        }
    }
}

impl ReconnectPolicy {
    /// Whether another try is allowed after `retries` retries have been made.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.attempts
    }
}

/// Configuration for a [`RelayClient`](crate::RelayClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the relay, e.g. `ws://localhost:3001/ws`.
    pub url: String,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(policy.connect_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_should_retry_is_bounded() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));

        let never = ReconnectPolicy {
            attempts: 0,
            ..ReconnectPolicy::default()
        };
        assert!(!never.should_retry(0));
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("ws://localhost:3001/ws").with_reconnect(ReconnectPolicy {
            attempts: 2,
            delay: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(100),
        });
        assert_eq!(config.url, "ws://localhost:3001/ws");
        assert_eq!(config.reconnect.attempts, 2);
    }
}
