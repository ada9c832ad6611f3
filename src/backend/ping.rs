use std::time::{Duration, Instant};

/// What the loop has to do about keep-alive on this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PingAction {
    Idle,
    SendPing,
    Expired,
}

/// Keep-alive scheduler.
///
/// A PINGREQ is due once nothing was received for half the keep-alive interval. The connection is considered dead when
/// an outstanding PINGREQ goes unanswered for that same half interval. A keep-alive of zero disables both.
#[derive(Clone, Debug)]
pub struct Pinger {
    timeout: Option<Duration>,
    last_received: Instant,
    ping_sent_at: Option<Instant>,
}

impl Pinger {
    pub fn new(keep_alive: Duration) -> Pinger {
        Pinger {
            timeout: if keep_alive.is_zero() {
                None
            } else {
                Some(keep_alive / 2)
            },
            last_received: Instant::now(),
            ping_sent_at: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Starts over, as if a packet had just been received and no ping was outstanding.
    pub fn reset(&mut self, now: Instant) {
        self.last_received = now;
        self.ping_sent_at = None;
    }

    pub fn packet_received(&mut self, now: Instant) {
        self.last_received = now;
    }

    pub fn pong_received(&mut self) {
        self.ping_sent_at = None;
    }

    pub fn ping_sent(&mut self, now: Instant) {
        self.ping_sent_at = Some(now);
    }

    pub fn is_ping_outstanding(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    pub fn need_to_ping(&self, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => {
                self.ping_sent_at.is_none()
                    && now.saturating_duration_since(self.last_received) > timeout
            }
            None => false,
        }
    }

    pub fn is_ping_expired(&self, now: Instant) -> bool {
        match (self.timeout, self.ping_sent_at) {
            (Some(timeout), Some(sent)) => now.saturating_duration_since(sent) > timeout,
            _ => false,
        }
    }

    pub fn poll(&self, now: Instant) -> PingAction {
        if self.need_to_ping(now) {
            PingAction::SendPing
        } else if self.is_ping_expired(now) {
            PingAction::Expired
        } else {
            PingAction::Idle
        }
    }
}
