use chrono::{DateTime, TimeZone, Utc};

/// Source of the current time for marker stamps and connector age checks.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_tracks_wall_time() {
        let before = Utc::now().timestamp_millis();
        let now = SystemClock.now_ms();
        assert!(now >= before);
        assert!(SystemClock.now().timestamp_millis() >= now);
    }
}
