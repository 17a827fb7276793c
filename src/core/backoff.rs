use std::time::Duration;
use tokio::time::Instant;

/// Oracle throttling window. At most one backoff is active at a time.
#[derive(Debug, Clone)]
pub struct Backoff {
    cooldown: Duration,
    resume_at: Option<Instant>,
}

impl Backoff {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            resume_at: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Engages the backoff and returns the delay until resumption.
    /// A signal received while already throttled keeps the original deadline.
    pub fn on_rate_limited(&mut self, now: Instant) -> Duration {
        match self.resume_at {
            Some(at) if at > now => at - now,
            _ => {
                self.resume_at = Some(now + self.cooldown);
                self.cooldown
            }
        }
    }

    pub fn is_throttled(&self, now: Instant) -> bool {
        matches!(self.resume_at, Some(at) if at > now)
    }

    /// Set while a backoff is pending, including after the deadline passed
    /// but before the loop acknowledged it with `clear`.
    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    pub fn clear(&mut self) {
        self.resume_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_does_not_compound() {
        let mut backoff = Backoff::new(Duration::from_secs(15));
        let t0 = Instant::now();

        assert_eq!(backoff.on_rate_limited(t0), Duration::from_secs(15));
        assert_eq!(
            backoff.on_rate_limited(t0 + Duration::from_secs(5)),
            Duration::from_secs(10)
        );
        assert_eq!(backoff.resume_at(), Some(t0 + Duration::from_secs(15)));
    }

    #[test]
    fn test_throttle_window() {
        let mut backoff = Backoff::new(Duration::from_secs(15));
        let t0 = Instant::now();
        assert!(!backoff.is_throttled(t0));

        backoff.on_rate_limited(t0);
        assert!(backoff.is_throttled(t0 + Duration::from_secs(14)));
        assert!(!backoff.is_throttled(t0 + Duration::from_secs(15)));

        backoff.clear();
        assert_eq!(backoff.resume_at(), None);
    }

    #[test]
    fn test_expired_backoff_restarts_full_cooldown() {
        let mut backoff = Backoff::new(Duration::from_secs(15));
        let t0 = Instant::now();
        backoff.on_rate_limited(t0);
        let later = t0 + Duration::from_secs(20);
        assert_eq!(backoff.on_rate_limited(later), Duration::from_secs(15));
        assert_eq!(backoff.resume_at(), Some(later + Duration::from_secs(15)));
    }
}
