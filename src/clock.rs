use chrono::Utc;
use tokio::time::Instant;

/// Source of the unix time used to stamp and check token expirations.
pub trait Clock {
    fn unix_now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Unix time that advances with tokio's timer instead of the wall clock,
/// so it follows a paused runtime in tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base: i64,
    origin: Instant,
}

impl TokioClock {
    pub fn starting_at(base: i64) -> Self {
        TokioClock { base, origin: Instant::now() }
    }
}

impl Clock for TokioClock {
    fn unix_now(&self) -> i64 {
        self.base + self.origin.elapsed().as_secs() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(1_000);
        assert_eq!(clock.unix_now(), 1_000);
        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(clock.unix_now(), 1_002);
    }
}
