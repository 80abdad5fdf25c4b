use std::time::Duration;

/// Poll timeout used when ticks are disabled or slower than this.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Fires ticks at a steady cadence from the time fed to [`advance`].
///
/// A tick is due once the accumulated time reaches the interval, so after
/// a total `T` exactly `floor(T / interval)` ticks have fired. Time is kept
/// as a `Duration` so chunking the same total differently never changes
/// that count.
///
/// [`advance`]: TickScheduler::advance
#[derive(Debug, Clone)]
pub struct TickScheduler {
    interval: Option<Duration>,
    residual: Duration,
    timeout: Duration,
}

impl TickScheduler {
    /// `ticktime` in seconds; zero, negative or non-finite disables ticks.
    pub fn new(ticktime: f64) -> Self {
        let interval = if ticktime > 0.0 {
            Duration::try_from_secs_f64(ticktime).ok()
        } else {
            None
        };
        Self::from_interval(interval)
    }

    pub fn from_interval(interval: Option<Duration>) -> Self {
        let interval = interval.filter(|d| !d.is_zero());
        let timeout = match interval {
            Some(interval) if interval < DEFAULT_POLL_TIMEOUT => interval,
            _ => DEFAULT_POLL_TIMEOUT,
        };
        Self { interval, residual: Duration::ZERO, timeout }
    }

    pub fn disabled() -> Self {
        Self::new(0.0)
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Effective receive timeout for one poll.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn residual(&self) -> Duration {
        self.residual
    }

    /// Account for `elapsed` and return how many ticks are now due. A stall
    /// longer than one interval yields several ticks at once.
    pub fn advance(&mut self, elapsed: Duration) -> u64 {
        let Some(interval) = self.interval else {
            return 0;
        };
        self.residual += elapsed;
        let mut due = 0;
        while self.residual >= interval {
            due += 1;
            self.residual -= interval;
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn two_second_ticks_over_ten_idle_polls() {
        let mut ticks = TickScheduler::new(2.0);
        assert_eq!(ticks.timeout(), DEFAULT_POLL_TIMEOUT);
        let fired: u64 = (0..10).map(|_| ticks.advance(ticks.timeout())).sum();
        assert_eq!(fired, 2);
        assert_eq!(ticks.residual(), Duration::from_secs(1));
    }

    #[test]
    fn disabled_never_fires() {
        for ticktime in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut ticks = TickScheduler::new(ticktime);
            assert!(!ticks.is_enabled());
            for _ in 0..10 {
                assert_eq!(ticks.advance(ticks.timeout()), 0);
                assert_eq!(ticks.timeout(), DEFAULT_POLL_TIMEOUT);
            }
            assert_eq!(ticks.residual(), Duration::ZERO);
        }
    }

    #[test]
    fn short_ticktime_shrinks_poll_timeout() {
        assert_eq!(TickScheduler::new(0.2).timeout(), ms(200));
        assert_eq!(TickScheduler::new(0.5).timeout(), DEFAULT_POLL_TIMEOUT);
        assert_eq!(TickScheduler::new(3.0).timeout(), DEFAULT_POLL_TIMEOUT);
    }

    #[test]
    fn stall_catches_up() {
        let mut ticks = TickScheduler::new(1.0);
        assert_eq!(ticks.advance(ms(3500)), 3);
        assert_eq!(ticks.residual(), ms(500));
        assert_eq!(ticks.advance(ms(600)), 1);
    }

    #[test]
    fn exact_multiple_fires_on_the_boundary() {
        let mut ticks = TickScheduler::new(1.0);
        assert_eq!(ticks.advance(ms(999)), 0);
        assert_eq!(ticks.advance(ms(1)), 1);
        assert_eq!(ticks.residual(), Duration::ZERO);
        assert_eq!(ticks.advance(ms(2000)), 2);
    }

    #[test]
    fn count_is_floor_of_total_for_any_chunking() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let interval_ms = rng.gen_range(1..=3000u64);
            let mut ticks = TickScheduler::from_interval(Some(ms(interval_ms)));
            let mut total = 0u64;
            let mut fired = 0u64;
            for _ in 0..rng.gen_range(1..50) {
                let chunk = rng.gen_range(0..=5000u64);
                total += chunk;
                fired += ticks.advance(ms(chunk));
            }
            assert_eq!(fired, total / interval_ms, "interval {}ms total {}ms", interval_ms, total);
            assert_eq!(ticks.residual(), ms(total % interval_ms));
        }
    }
}
