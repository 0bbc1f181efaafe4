use std::time::Duration;

/// Reconnect and heartbeat timing for one room connection.
///
/// Reconnects use a fixed delay rather than backoff: the broker fans
/// out per-room traffic and a lost socket should resubscribe promptly.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    reconnect_delay_ms: u64,
    heartbeat_interval_ms: u64,
}

/// Missed-heartbeat multiple after which a socket counts as half-open.
const HALF_OPEN_GRACE_MULTIPLE: u32 = 2;

impl ReconnectPolicy {
    /// Create a policy; both intervals are clamped to at least 1 ms.
    pub fn new(reconnect_delay_ms: u64, heartbeat_interval_ms: u64) -> Self {
        Self {
            reconnect_delay_ms: reconnect_delay_ms.max(1),
            heartbeat_interval_ms: heartbeat_interval_ms.max(1),
        }
    }

    /// Fixed delay before the next reconnect attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Interval between outgoing heartbeats; also offered to the broker
    /// as the expected incoming cadence.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Milliseconds advertised in the STOMP `heart-beat` header.
    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.heartbeat_interval_ms
    }

    /// Silence window after which the peer is considered half-open,
    /// given the negotiated incoming interval (`0` disables detection).
    pub fn half_open_after(&self, negotiated_incoming_ms: u64) -> Option<Duration> {
        if negotiated_incoming_ms == 0 {
            return None;
        }
        Some(Duration::from_millis(
            negotiated_incoming_ms.saturating_mul(u64::from(HALF_OPEN_GRACE_MULTIPLE)),
        ))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        // The service contract: ~5s reconnect, ~10s bidirectional heartbeat.
        Self::new(5_000, 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_service_contract() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(policy.heartbeat_interval(), Duration::from_secs(10));
    }

    #[test]
    fn reconnect_delay_is_fixed_across_attempts() {
        let policy = ReconnectPolicy::new(5_000, 10_000);
        let first = policy.reconnect_delay();
        let later = policy.reconnect_delay();
        assert_eq!(first, later);
    }

    #[test]
    fn clamps_zero_intervals() {
        let policy = ReconnectPolicy::new(0, 0);
        assert_eq!(policy.reconnect_delay(), Duration::from_millis(1));
        assert_eq!(policy.heartbeat_interval(), Duration::from_millis(1));
    }

    #[test]
    fn half_open_window_scales_with_negotiated_interval() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.half_open_after(10_000),
            Some(Duration::from_secs(20))
        );
        assert_eq!(policy.half_open_after(0), None);
    }
}
