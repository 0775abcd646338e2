use std::time::Duration;

use tracing::Level;

/// Bus-level configuration for the locker and the logging middleware.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// How long a task waits for a lock held by another task before proceeding.
    pub default_lock_timeout: Duration,
    /// Interval between lock state checks while waiting.
    pub lock_poll_interval: Duration,
    /// Level of the line logged before a message is handled.
    pub pre_handle_level: Level,
    /// Level of the line logged after a message was handled.
    pub post_handle_level: Level,
    /// Level of the line logged when handling raised an error.
    pub error_level: Level,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_lock_timeout: Duration::from_secs(5),
            lock_poll_interval: Duration::from_millis(1),
            pre_handle_level: Level::DEBUG,
            post_handle_level: Level::INFO,
            error_level: Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BusConfig::default();
        assert_eq!(config.default_lock_timeout, Duration::from_secs(5));
        assert_eq!(config.lock_poll_interval, Duration::from_millis(1));
        assert_eq!(config.pre_handle_level, Level::DEBUG);
        assert_eq!(config.post_handle_level, Level::INFO);
        assert_eq!(config.error_level, Level::ERROR);
    }
}
