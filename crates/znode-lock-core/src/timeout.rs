//! Timeout value helpers.

use std::time::Duration;

use tokio::time::Instant;

/// Optional wait bound for lock acquisition.
///
/// - `Some(duration)` - Give up after this long
/// - `None` - Wait for fairness order to resolve, however long that takes
pub type Timeout = Option<Duration>;

/// A point in time after which an acquisition attempt gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    /// A deadline that never expires.
    pub const NEVER: Self = Self {
        at: None,
        budget: Duration::MAX,
    };

    /// Starts counting `timeout` from now.
    pub fn after(timeout: Timeout) -> Self {
        match timeout {
            None => Self::NEVER,
            Some(budget) => Self {
                at: Instant::now().checked_add(budget),
                budget,
            },
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.at.is_none()
    }

    /// The duration originally granted.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before expiry; `None` for an infinite deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Sleeps until the deadline; pends forever when infinite.
    pub async fn elapsed(&self) {
        match self.at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    }
}
