use std::time::{Duration, Instant};

/// Wall-clock bookkeeping for one daemon run.
///
/// Remaining time is always `baseline - (now - run_started_at)`. Pausing
/// does not touch the baseline; resuming shifts `run_started_at` forward by
/// the length of the pause, so paused time never counts and nothing is
/// accumulated tick by tick.
#[derive(Debug, Clone)]
pub struct Countdown {
    baseline: Duration,
    run_started_at: Instant,
    paused_at: Option<Instant>,
}

impl Countdown {
    pub fn start(baseline: Duration, now: Instant) -> Self {
        Self {
            baseline,
            run_started_at: now,
            paused_at: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Returns false if the countdown was already paused.
    pub fn pause(&mut self, now: Instant) -> bool {
        if self.is_paused() {
            return false;
        }
        self.paused_at = Some(now);
        true
    }

    /// Returns how long the pause lasted, or `None` if nothing was paused.
    pub fn resume(&mut self, now: Instant) -> Option<Duration> {
        let paused_at = self.paused_at.take()?;
        let paused_for = now.saturating_duration_since(paused_at);
        self.run_started_at += paused_for;
        Some(paused_for)
    }

    /// Running time since start, excluding pauses.
    pub fn elapsed(&self, now: Instant) -> Duration {
        let until = self.paused_at.unwrap_or(now);
        until.saturating_duration_since(self.run_started_at)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.baseline.saturating_sub(self.elapsed(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_counts_down_and_clamps() {
        let t0 = Instant::now();
        let countdown = Countdown::start(secs(3), t0);
        assert_eq!(countdown.remaining(t0), secs(3));
        assert_eq!(countdown.remaining(t0 + secs(2)), secs(1));
        assert_eq!(countdown.remaining(t0 + secs(3)), Duration::ZERO);
        assert_eq!(countdown.remaining(t0 + secs(60)), Duration::ZERO);
    }

    #[test]
    fn test_pause_time_is_not_counted() {
        let t0 = Instant::now();
        let mut countdown = Countdown::start(secs(100), t0);

        assert!(countdown.pause(t0 + secs(10)));
        assert_eq!(countdown.remaining(t0 + secs(40)), secs(90));

        assert_eq!(countdown.resume(t0 + secs(40)), Some(secs(30)));
        assert_eq!(countdown.remaining(t0 + secs(40)), secs(90));
        assert_eq!(countdown.remaining(t0 + secs(50)), secs(80));
    }

    #[test]
    fn test_pause_and_resume_are_idempotent() {
        let t0 = Instant::now();
        let mut countdown = Countdown::start(secs(100), t0);

        assert_eq!(countdown.resume(t0 + secs(1)), None);
        assert!(countdown.pause(t0 + secs(5)));
        assert!(!countdown.pause(t0 + secs(8)));
        assert_eq!(countdown.resume(t0 + secs(10)), Some(secs(5)));
        assert_eq!(countdown.resume(t0 + secs(12)), None);
        assert_eq!(countdown.remaining(t0 + secs(20)), secs(85));
    }

    #[test]
    fn test_repeated_pauses_accumulate() {
        let t0 = Instant::now();
        let mut countdown = Countdown::start(secs(60), t0);
        for i in 0..3u64 {
            let base = t0 + secs(i * 10);
            countdown.pause(base + secs(2));
            countdown.resume(base + secs(7));
        }
        // 30s of wall time, 15s of it paused.
        assert_eq!(countdown.elapsed(t0 + secs(30)), secs(15));
    }
}
