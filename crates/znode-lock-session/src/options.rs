//! Session configuration.

use std::time::Duration;

/// Tunables for one store session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long a caller waits for the session to reach CONNECTED before the
    /// connection gate fails with a timeout.
    pub timeout: Duration,
    /// Session timeout negotiated with the store; ephemeral lock nodes of a
    /// silent client disappear after this long.
    pub session_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_session_timeout(mut self, session_timeout: Duration) -> Self {
        self.session_timeout = session_timeout;
        self
    }
}

/// Joins an endpoint set into the stable key sessions are deduplicated by.
pub fn endpoint_key(endpoints: &[String]) -> String {
    endpoints.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_setters() {
        let options = SessionOptions::default().with_timeout(Duration::from_millis(250));
        assert_eq!(options.timeout, Duration::from_millis(250));
        assert_eq!(options.session_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_endpoint_key_keeps_caller_order() {
        let endpoints = vec!["zk2:2181".to_string(), "zk1:2181".to_string()];
        assert_eq!(endpoint_key(&endpoints), "zk2:2181,zk1:2181");
    }
}
