//! Session State Machine: connection lifecycle, keep-alive and the PING
//! cycle. This module owns only timers and state; sending and receiving
//! frames is the caller's job (see [`crate::pubsub`]).

use mqttsn_core::ReturnCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Awake,
    Asleep,
    Lost,
}

/// `1.5x` keep-alive with no activity and no PINGRESP after a retransmit
/// declares the session lost (§4.E).
const LOST_MULTIPLIER: u32 = 3;
const LOST_DIVISOR: u32 = 2;

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    keep_alive_ms: u32,
    last_ping_sent: Option<u32>,
    last_activity: u32,
}

impl Session {
    pub fn new(keep_alive_sec: u16, now: u32) -> Self {
        Session {
            state: SessionState::Disconnected,
            keep_alive_ms: u32::from(keep_alive_sec) * 1_000,
            last_ping_sent: None,
            last_activity: now,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected | SessionState::Awake)
    }

    pub fn on_connect_requested(&mut self) {
        self.state = SessionState::Connecting;
    }

    pub fn on_connack(&mut self, code: ReturnCode, now: u32) -> bool {
        if code == ReturnCode::Accepted {
            self.state = SessionState::Connected;
            self.last_activity = now;
            true
        } else {
            self.state = SessionState::Disconnected;
            false
        }
    }

    pub fn on_connack_timeout(&mut self) {
        self.state = SessionState::Disconnected;
    }

    pub fn on_activity(&mut self, now: u32) {
        self.last_activity = now;
    }

    pub fn on_pingresp(&mut self, now: u32) {
        self.last_activity = now;
    }

    pub fn on_disconnect_requested(&mut self) {
        self.state = SessionState::Disconnected;
    }

    pub fn on_disconnect_received(&mut self) {
        self.state = SessionState::Disconnected;
    }

    /// `true` once (now - last_ping_sent) >= keep_alive / 2, i.e. it is time
    /// to emit a PINGREQ. `keep_alive_ms == 0` disables the keep-alive cycle.
    pub fn should_ping(&self, now: u32) -> bool {
        if self.keep_alive_ms == 0 || !self.is_connected() {
            return false;
        }
        let since = mqttsn_core::clock::elapsed_since(now, self.last_ping_sent.unwrap_or(self.last_activity));
        since >= self.keep_alive_ms / 2
    }

    pub fn on_ping_sent(&mut self, now: u32) {
        self.last_ping_sent = Some(now);
    }

    /// `true` once the keep-alive has been lost: more than 1.5x keep-alive
    /// has passed since the last activity and a PINGREQ retransmit already
    /// went unanswered.
    pub fn is_lost(&self, now: u32) -> bool {
        if self.keep_alive_ms == 0 || !self.is_connected() {
            return false;
        }
        let since_activity = mqttsn_core::clock::elapsed_since(now, self.last_activity);
        let threshold = (self.keep_alive_ms * LOST_MULTIPLIER) / LOST_DIVISOR;
        since_activity > threshold
    }

    pub fn on_lost(&mut self) {
        self.state = SessionState::Lost;
    }
}
