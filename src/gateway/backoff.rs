use std::time::Duration;

/// Reconnect delay schedule: the Nth scheduled attempt waits `min(cap, base^N)` seconds.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: f64,
    cap: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: f64, cap: Duration) -> Self {
        Self { base, cap, attempt: 0 }
    }

    /// Count one more attempt and return its delay.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.delay_for(self.attempt)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.base.powi(exponent);
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            self.cap
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
