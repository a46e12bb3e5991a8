//! Injected configuration objects for the connectivity and execution core
//!
//! Everything here is passed in at construction time; there are no global
//! singletons or environment lookups in the core itself.

use std::time::Duration;

pub use crate::rate_limit::RateLimitConfig;
use crate::ws::dispatch::SubscriptionKey;

/// Configuration for the exchange WebSocket session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint URL
    pub ws_url: String,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Timeout applied to individual network calls
    pub call_timeout: Duration,
    /// How long `start()` waits for the first non-zero ticker before giving
    /// up (logged, not raised)
    pub ticker_wait_timeout: Duration,
    /// Subscriptions issued right after the first successful connection
    pub default_subscriptions: Vec<SubscriptionKey>,
    /// Capacity of the bounded callback-dispatch channel; the frame processor
    /// blocks when it is full
    pub callback_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.kraken.com".to_string(),
            reconnect_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            ticker_wait_timeout: Duration::from_secs(30),
            default_subscriptions: Vec::new(),
            callback_queue_capacity: 1024,
        }
    }
}

/// Configuration for the order lifecycle executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Timeout for order placement calls
    pub order_timeout: Duration,
    /// Interval between open-order polls in the monitor loop
    pub monitor_interval: Duration,
    /// Initial backoff after a failed poll
    pub monitor_backoff_initial: Duration,
    /// Backoff ceiling for failed polls
    pub monitor_backoff_max: Duration,
    /// Consecutive poll failures after which monitoring stops permanently
    pub max_consecutive_failures: u32,
    /// Default leverage attached to orders
    pub leverage: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            order_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(10),
            monitor_backoff_initial: Duration::from_secs(1),
            monitor_backoff_max: Duration::from_secs(60),
            max_consecutive_failures: 5,
            leverage: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert!(config.ws_url.starts_with("wss://"));
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert!(config.default_subscriptions.is_empty());
        assert_eq!(config.callback_queue_capacity, 1024);
    }

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_consecutive_failures, 5);
        assert_eq!(config.monitor_backoff_max, Duration::from_secs(60));
    }
}
