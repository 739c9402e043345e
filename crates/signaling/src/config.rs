use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Total subscription attempts before `connect` gives up.
    pub subscribe_attempts: u32,
    /// Delay before the first retry; doubles per attempt up to `max_backoff`.
    pub subscribe_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            subscribe_attempts: 3,
            subscribe_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}
