//! Operating modes.

use super::duplex::{DuplexScheduler, DuplexState};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Operating mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Send and receive whenever asked.
    Normal,
    /// Alternate TRANSMIT and RECEIVE windows.
    HalfDuplex,
    /// Addressed multi-hop operation.
    Mesh,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::HalfDuplex => write!(f, "half-duplex"),
            Self::Mesh => write!(f, "mesh"),
        }
    }
}

/// Mode plus the state only that mode needs.
#[derive(Debug, Clone)]
pub(crate) enum OperatingMode {
    Normal,
    HalfDuplex(DuplexScheduler),
    Mesh,
}

impl OperatingMode {
    pub(crate) fn new(mode: Mode, interval: Duration, now: Instant) -> Self {
        match mode {
            Mode::Normal => Self::Normal,
            Mode::HalfDuplex => Self::HalfDuplex(DuplexScheduler::new(interval, now)),
            Mode::Mesh => Self::Mesh,
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        match self {
            Self::Normal => Mode::Normal,
            Self::HalfDuplex(_) => Mode::HalfDuplex,
            Self::Mesh => Mode::Mesh,
        }
    }

    pub(crate) fn scheduler(&self) -> Option<&DuplexScheduler> {
        match self {
            Self::HalfDuplex(sched) => Some(sched),
            _ => None,
        }
    }

    pub(crate) fn scheduler_mut(&mut self) -> Option<&mut DuplexScheduler> {
        match self {
            Self::HalfDuplex(sched) => Some(sched),
            _ => None,
        }
    }

    /// Outside half-duplex both directions are always open.
    pub(crate) fn may_send(&self) -> bool {
        self.scheduler().map_or(true, DuplexScheduler::may_send)
    }

    pub(crate) fn may_receive(&self) -> bool {
        self.scheduler().map_or(true, DuplexScheduler::may_receive)
    }

    /// Force a half-duplex window; no effect in other modes.
    pub(crate) fn force(&mut self, state: DuplexState, now: Instant) {
        if let Some(sched) = self.scheduler_mut() {
            if sched.state() != state {
                sched.force(state, now);
            }
        }
    }
}
