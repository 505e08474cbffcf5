use std::time::Duration;

/// Connection and queue tunables.
///
/// Consumed by [`Node`](../meshrpc_net) connections and endpoints; the core
/// never parses configuration files, so callers construct this from
/// whatever configuration source they use.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Timeout for a single TCP dial attempt.
    pub connect_timeout: Duration,
    /// Delay between dial attempts while (re)connecting.
    pub reconnect_delay: Duration,
    /// Idle time before the first keep-alive probe.
    pub keepalive_idle: Duration,
    /// Interval between keep-alive probes.
    pub keepalive_interval: Duration,
    /// Unanswered probes before the connection is considered dead.
    pub keepalive_retries: u32,
    /// Capacity of an endpoint's inbound message queue.
    pub recv_queue_capacity: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            keepalive_idle: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(5),
            keepalive_retries: 3,
            recv_queue_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.keepalive_idle, Duration::from_secs(10));
        assert_eq!(config.keepalive_interval, Duration::from_secs(5));
        assert_eq!(config.keepalive_retries, 3);
        assert_eq!(config.recv_queue_capacity, 1024);
    }

    #[test]
    fn test_custom_config() {
        let config = NetConfig {
            connect_timeout: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(50),
            ..Default::default()
        };
        assert_eq!(config.connect_timeout, Duration::from_millis(200));
        assert_eq!(config.reconnect_delay, Duration::from_millis(50));
        assert_eq!(config.keepalive_retries, 3);
    }
}
