use super::fingerprint::Fingerprint;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct GateState {
    pub last_fingerprint: Option<Fingerprint>,
    pub last_decision_time: Option<Instant>,
    pub retry_used: bool,
}

impl GateState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First time this situation is seen since the gate was cleared.
    Novel,
    /// Same situation outlived the retry window; allowed exactly once.
    Retry,
    Suppressed,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::Suppressed)
    }
}

/// Dedup/retry policy. Holds no state of its own so the loop stays the only
/// writer of `GateState`.
#[derive(Debug, Clone, Copy)]
pub struct ActionGate {
    retry_window: Duration,
}

impl ActionGate {
    pub fn new(retry_window: Duration) -> Self {
        Self { retry_window }
    }

    pub fn retry_window(&self) -> Duration {
        self.retry_window
    }

    pub fn admit(&self, fp: Fingerprint, now: Instant, gate: &mut GateState) -> Admission {
        if gate.last_fingerprint.as_ref() != Some(&fp) {
            gate.last_fingerprint = Some(fp);
            gate.last_decision_time = Some(now);
            gate.retry_used = false;
            return Admission::Novel;
        }

        let elapsed = gate
            .last_decision_time
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or(Duration::MAX);

        if elapsed > self.retry_window && !gate.retry_used {
            gate.retry_used = true;
            gate.last_decision_time = Some(now);
            Admission::Retry
        } else {
            Admission::Suppressed
        }
    }
}
