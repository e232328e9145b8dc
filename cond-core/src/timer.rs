//! Deadline table for the state machine. "Waiting" is never a blocked
//! task: it is a state value plus an armed deadline here, and the event
//! loop sleeps until the earliest one.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Periodic re-evaluation while IDLE.
    Idle,
    /// Scan operation watchdog.
    Scan,
    /// Associate operation watchdog.
    Join,
    /// WPS walk-time watchdog.
    Wps,
    /// Address acquisition (NO_IP) deadline.
    Dhcp,
    /// Cloud connectivity (CLIENT_TIME) deadline.
    Client,
    /// AP-window auto close.
    ApWindowClose,
    /// Graceful delayed AP stop.
    ApStopDelay,
    /// Cooldown before shutdown after a critical driver error.
    ErrCooldown,
}

const TIMER_CT: usize = 9;

impl TimerKind {
    fn index(self) -> usize {
        match self {
            TimerKind::Idle => 0,
            TimerKind::Scan => 1,
            TimerKind::Join => 2,
            TimerKind::Wps => 3,
            TimerKind::Dhcp => 4,
            TimerKind::Client => 5,
            TimerKind::ApWindowClose => 6,
            TimerKind::ApStopDelay => 7,
            TimerKind::ErrCooldown => 8,
        }
    }

    fn from_index(i: usize) -> Self {
        match i {
            0 => TimerKind::Idle,
            1 => TimerKind::Scan,
            2 => TimerKind::Join,
            3 => TimerKind::Wps,
            4 => TimerKind::Dhcp,
            5 => TimerKind::Client,
            6 => TimerKind::ApWindowClose,
            7 => TimerKind::ApStopDelay,
            _ => TimerKind::ErrCooldown,
        }
    }
}

#[derive(Debug, Default)]
pub struct Timers {
    deadlines: [Option<Instant>; TIMER_CT],
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.deadlines[kind.index()] = Some(Instant::now() + after);
    }

    pub fn clear(&mut self, kind: TimerKind) {
        self.deadlines[kind.index()] = None;
    }

    pub fn clear_all(&mut self) {
        self.deadlines = [None; TIMER_CT];
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.index()].is_some()
    }

    /// Earliest armed deadline, if any.
    pub fn next(&self) -> Option<(TimerKind, Instant)> {
        self.deadlines
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.map(|at| (TimerKind::from_index(i), at)))
            .min_by_key(|&(_, at)| at)
    }
}
