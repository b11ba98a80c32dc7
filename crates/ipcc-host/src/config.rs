use std::time::Duration;

/// Controls the command engine's retry and wait behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Transmissions allowed per call, counting the first.
    pub max_attempts: u32,
    /// How long to wait for reply bytes before sending a keep-alive.
    pub poll_timeout: Duration,
    /// Consecutive keep-alives allowed while waiting for one reply before
    /// resending. `None` waits indefinitely.
    pub keepalive_limit: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            poll_timeout: Duration::from_millis(100),
            keepalive_limit: None,
        }
    }
}
