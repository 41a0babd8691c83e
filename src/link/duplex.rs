//! Half-duplex transmit/receive arbiter.
//!
//! One radio cannot send and listen at once. In half-duplex mode the link
//! alternates between a TRANSMIT window and a RECEIVE window of equal length;
//! outbound calls are refused while receiving and inbound polls are refused
//! while transmitting.

use std::fmt;
use std::time::{Duration, Instant};

/// Current half-duplex window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexState {
    Transmit,
    Receive,
}

impl DuplexState {
    /// The other window.
    pub fn flipped(self) -> Self {
        match self {
            Self::Transmit => Self::Receive,
            Self::Receive => Self::Transmit,
        }
    }
}

impl fmt::Display for DuplexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transmit => write!(f, "transmit"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Timer-driven TRANSMIT/RECEIVE state machine.
///
/// The scheduler never reads the clock itself; callers pass `now`, which
/// keeps it deterministic under test.
#[derive(Debug, Clone)]
pub struct DuplexScheduler {
    state: DuplexState,
    interval: Duration,
    switch_deadline: Instant,
}

impl DuplexScheduler {
    /// Start in TRANSMIT, switching after `interval`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            state: DuplexState::Transmit,
            interval,
            switch_deadline: now + interval,
        }
    }

    pub fn state(&self) -> DuplexState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn switch_deadline(&self) -> Instant {
        self.switch_deadline
    }

    /// New window length; takes effect at the next switch.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Whether the current window has expired.
    pub fn tick(&self, now: Instant) -> bool {
        now >= self.switch_deadline
    }

    /// Switch to the other window and restart the timer.
    pub fn flip(&mut self, now: Instant) -> DuplexState {
        self.force(self.state.flipped(), now);
        self.state
    }

    /// Enter `state` regardless of the timer and restart it.
    pub fn force(&mut self, state: DuplexState, now: Instant) {
        self.state = state;
        self.switch_deadline = now + self.interval;
    }

    pub fn may_send(&self) -> bool {
        self.state == DuplexState::Transmit
    }

    pub fn may_receive(&self) -> bool {
        self.state == DuplexState::Receive
    }
}
