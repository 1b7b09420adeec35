//! Request throttle: a minimum interval between model requests.
//!
//! The external model service is rate limited, so a session never has two
//! requests in flight and consecutive request *starts* are at least
//! `min_interval` apart. This is a leaky bucket with capacity one: the
//! first request goes out immediately, each later one waits until the
//! interval since the previous dispatch has elapsed.
//!
//! Time comes from `tokio::time`, so tests drive the throttle with tokio's
//! paused clock instead of sleeping for real.

use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
    dispatched: u64,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: None,
            dispatched: 0,
        }
    }

    /// A throttle that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Requests dispatched through this throttle so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Wait until the next request may start, then record its dispatch.
    ///
    /// Must be called immediately before every model request.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last_dispatch {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                debug!(
                    "Throttle: waiting {:?} before next request",
                    ready_at - Instant::now()
                );
                sleep_until(ready_at).await;
            }
        }
        self.last_dispatch = Some(Instant::now());
        self.dispatched += 1;
    }
}
